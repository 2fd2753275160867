//! Discrete event simulator for handshake scenarios.
//!
//! A priority queue of `(time, seq)`-ordered events drives node
//! engines directly through `handle_frame` / `handle_timer`, the same
//! entry points a real scheduler would use. Everything is seeded, so
//! every run of a scenario is bit-identical.

use std::collections::BinaryHeap;

use apkes::{EngineConfig, ExtendedAddr, FrameDst, PlainScheme, SecretScheme, ShortAddr, Timestamp};
use apkes::Duration;
use hashbrown::HashMap;

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::node::{FastConfig, SealedFrame, SimNode};
use crate::topology::Topology;

/// Frame-level counters for a simulation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimMetrics {
    /// Frames handed to the air by any node.
    pub frames_sent: u64,
    /// Frame deliveries that reached a node.
    pub frames_delivered: u64,
    /// Deliveries suppressed by link loss.
    pub frames_dropped: u64,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Result of a simulation run.
#[derive(Debug, Clone, Copy)]
pub struct SimulationResult {
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
}

/// Discrete event simulator over a set of [`SimNode`]s.
pub struct Simulator<S: SecretScheme = PlainScheme, Cfg: EngineConfig = FastConfig> {
    nodes: HashMap<ShortAddr, SimNode<S, Cfg>>,
    by_extended: HashMap<ExtendedAddr, ShortAddr>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    rng_state: u64,
    metrics: SimMetrics,
}

impl<S: SecretScheme, Cfg: EngineConfig> Simulator<S, Cfg> {
    /// Create a simulator; `seed` drives link-loss decisions.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            by_extended: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            next_seq: 0,
            rng_state: seed,
            metrics: SimMetrics::new(),
        }
    }

    /// Set the topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Add a node. It stays silent until
    /// [`bootstrap_node`](Self::bootstrap_node) (it still answers
    /// HELLOs it hears).
    pub fn add_node(&mut self, short: ShortAddr, seed: u64, scheme: S) {
        let node = SimNode::new(short, seed, scheme);
        self.by_extended.insert(node.extended(), short);
        self.nodes.insert(short, node);
    }

    /// Start a node's bootstrap at the current time.
    pub fn bootstrap_node(&mut self, short: ShortAddr) {
        let now = self.current_time;
        if let Some(node) = self.nodes.get_mut(&short) {
            node.bootstrap(now);
        }
        self.after_node_event(short);
    }

    /// Start every node's bootstrap at the current time.
    pub fn bootstrap_all(&mut self) {
        let mut shorts: Vec<ShortAddr> = self.nodes.keys().copied().collect();
        shorts.sort_unstable();
        for short in shorts {
            self.bootstrap_node(short);
        }
    }

    /// Get a node.
    pub fn node(&self, short: ShortAddr) -> Option<&SimNode<S, Cfg>> {
        self.nodes.get(&short)
    }

    /// Get a node mutably.
    pub fn node_mut(&mut self, short: ShortAddr) -> Option<&mut SimNode<S, Cfg>> {
        self.nodes.get_mut(&short)
    }

    /// Current simulation time.
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    /// The topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The topology, mutably.
    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    /// Collected metrics.
    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an event.
    fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::Action(action));
    }

    /// Run until `end_time`, processing every event due by then.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some(event) = self.event_queue.peek() {
            if event.time > end_time {
                break;
            }
            let event = self.event_queue.pop().unwrap();
            if event.time > self.current_time {
                self.current_time = event.time;
            }
            self.process_event(event.event);
        }

        if end_time > self.current_time {
            self.current_time = end_time;
        }

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics,
        }
    }

    /// Run for `duration` from the current time.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::FrameDelivery { to, frame } => {
                let now = self.current_time;
                if let Some(node) = self.nodes.get_mut(&to) {
                    node.handle_frame(&frame, now);
                    self.metrics.frames_delivered += 1;
                }
                self.after_node_event(to);
            }
            Event::TimerFire { node } => {
                let now = self.current_time;
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.handle_timer(now);
                }
                self.after_node_event(node);
            }
            Event::Action(action) => self.execute_action(action),
        }
    }

    /// Route what a node just sent and re-arm its timer.
    fn after_node_event(&mut self, short: ShortAddr) {
        let sealed = match self.nodes.get_mut(&short) {
            Some(node) => node.take_outgoing(),
            None => return,
        };
        for frame in sealed {
            self.route_frame(short, frame);
        }

        let wakeup = self.nodes.get(&short).and_then(|n| n.next_wakeup());
        if let Some(at) = wakeup {
            let at = if at > self.current_time {
                at
            } else {
                self.current_time
            };
            self.schedule(at, Event::TimerFire { node: short });
        }
    }

    /// Deliver a sealed frame to everyone in range.
    fn route_frame(&mut self, sender: ShortAddr, sealed: SealedFrame) {
        self.metrics.frames_sent += 1;

        let targets: Vec<ShortAddr> = match sealed.dst {
            FrameDst::Broadcast => self.topology.neighbors(sender),
            FrameDst::Unicast(extended) => self
                .by_extended
                .get(&extended)
                .copied()
                .into_iter()
                .collect(),
        };

        for target in targets {
            let Some(link) = self.topology.get_link(sender, target) else {
                continue;
            };
            if !link.active {
                continue;
            }
            let loss_rate = link.loss_rate;
            let delay = link.delay;
            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                self.metrics.frames_dropped += 1;
                continue;
            }
            self.schedule(
                self.current_time + delay,
                Event::FrameDelivery {
                    to: target,
                    frame: sealed.frame.clone(),
                },
            );
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::DisableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { a, b, rate } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
        }
    }

    /// Random f64 in [0, 1) for loss decisions.
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apkes::NeighborStatus;

    const SECRET: [u8; 16] = [0x42; 16];

    fn plain_sim(nodes: &[ShortAddr]) -> Simulator {
        let mut sim = Simulator::new(99).with_topology(Topology::fully_connected(nodes));
        for (i, &short) in nodes.iter().enumerate() {
            sim.add_node(short, (i as u64 + 1) * 17, PlainScheme::new(SECRET));
        }
        sim
    }

    #[test]
    fn initiator_and_passive_responder_pair_up() {
        let mut sim = plain_sim(&[1, 2]);
        sim.bootstrap_node(1);
        sim.run_for(Duration::from_secs(10));

        let a = sim.node(1).unwrap();
        let b = sim.node(2).unwrap();
        assert!(a.is_bootstrapped());
        assert_eq!(a.permanent_count(), 1);
        assert_eq!(b.permanent_count(), 1);

        let b_at_a = a.engine().neighbors().lookup(&b.extended()).unwrap();
        let a_at_b = b.engine().neighbors().lookup(&a.extended()).unwrap();
        let na = a.engine().neighbors().get(b_at_a).unwrap();
        let nb = b.engine().neighbors().get(a_at_b).unwrap();
        assert_eq!(na.status, NeighborStatus::Permanent);
        assert_eq!(nb.status, NeighborStatus::Permanent);
        assert_eq!(na.pairwise_key, nb.pairwise_key);
    }

    #[test]
    fn frames_do_not_cross_inactive_links() {
        let mut sim = plain_sim(&[1, 2]);
        sim.topology_mut().get_link_mut(1, 2).unwrap().active = false;
        sim.bootstrap_node(1);
        sim.run_for(Duration::from_secs(10));

        assert_eq!(sim.node(1).unwrap().permanent_count(), 0);
        assert_eq!(sim.node(2).unwrap().permanent_count(), 0);
        assert_eq!(sim.metrics().frames_delivered, 0);
    }

    #[test]
    fn unicast_reaches_only_its_addressee() {
        let mut sim = plain_sim(&[1, 2, 3]);
        sim.bootstrap_node(1);
        sim.run_for(Duration::from_secs(10));

        // 2 and 3 both answered 1's broadcasts; they never spoke to
        // each other.
        assert_eq!(sim.node(1).unwrap().permanent_count(), 2);
        assert_eq!(sim.node(2).unwrap().permanent_count(), 1);
        assert_eq!(sim.node(3).unwrap().permanent_count(), 1);
        let n2 = sim.node(2).unwrap();
        assert!(n2
            .engine()
            .neighbors()
            .lookup(&crate::node::extended_addr(3))
            .is_none());
    }

    #[test]
    fn runs_are_deterministic() {
        let run = || {
            let mut sim = plain_sim(&[1, 2, 3]);
            sim.bootstrap_node(1);
            let result = sim.run_for(Duration::from_secs(10));
            (
                result.metrics.frames_sent,
                result.metrics.frames_delivered,
                sim.node(1).unwrap().permanent_count(),
            )
        };
        assert_eq!(run(), run());
    }
}
