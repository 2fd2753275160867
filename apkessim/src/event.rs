//! Event types and ordering for the discrete event simulation.

use std::cmp::Ordering;

use apkes::{RxFrame, ShortAddr, Timestamp};

/// Unique sequence number for deterministic ordering of same-time
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Disable a link in both directions.
    DisableLink { a: ShortAddr, b: ShortAddr },
    /// Enable a link in both directions.
    EnableLink { a: ShortAddr, b: ShortAddr },
    /// Set the loss rate of a link.
    SetLossRate { a: ShortAddr, b: ShortAddr, rate: f64 },
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// Deliver a sealed frame to a node.
    FrameDelivery { to: ShortAddr, frame: RxFrame },
    /// Tick a node's engine.
    TimerFire { node: ShortAddr },
    /// Execute a scenario action.
    Action(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    pub seq: SequenceNumber,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// BinaryHeap is a max-heap; reverse the ordering for earliest-first.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.time.as_millis().cmp(&self.time.as_millis()) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}
