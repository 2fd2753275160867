//! Core types and constants for the pairwise key establishment protocol.

use alloc::vec::Vec;
use core::fmt;

/// Length of a pairwise key in bytes (AES-128).
pub const PAIRWISE_KEY_LEN: usize = 16;
/// Length of a handshake challenge: half a pairwise key.
pub const CHALLENGE_LEN: usize = PAIRWISE_KEY_LEN / 2;
/// Length of the per-neighbor metadata scratch (both challenges).
pub const METADATA_LEN: usize = 2 * CHALLENGE_LEN;
/// Length of a neighborhood broadcast key in bytes.
pub const BROADCAST_KEY_LEN: usize = 16;
/// Length of a short link-layer address in bytes.
pub const SHORT_ADDR_LEN: usize = 2;
/// Length of an extended link-layer address in bytes.
pub const EXTENDED_ADDR_LEN: usize = 8;
/// Length of the message integrity code appended to secured frames.
pub const MIC_LEN: usize = 4;

// Command frame identifiers
pub const HELLO_IDENTIFIER: u8 = 0x0A;
pub const HELLOACK_IDENTIFIER: u8 = 0x0B;
pub const ACK_IDENTIFIER: u8 = 0x0C;

// Link-layer security levels. The base level authenticates only; the
// encryption bit is added when the broadcast-key option is enabled.
pub const SEC_LEVEL_MIC32: u8 = 0x01;
pub const SEC_LEVEL_ENC_BIT: u8 = 0x04;
/// Key identifier mode carrying a 4-byte key source plus a 1-byte index.
pub const KEY_ID_MODE_SRC4_INDEX: u8 = 0x02;

/// 8-byte extended link-layer address, the canonical peer identity.
pub type ExtendedAddr = [u8; EXTENDED_ADDR_LEN];

/// 2-byte short link-layer address (little-endian on the wire).
pub type ShortAddr = u16;

/// 8-byte handshake challenge.
pub type Challenge = [u8; CHALLENGE_LEN];

/// 16-byte pairwise key.
pub type PairwiseKey = [u8; PAIRWISE_KEY_LEN];

/// 16-byte long-term shared secret supplied by a secret scheme.
pub type SharedSecret = [u8; PAIRWISE_KEY_LEN];

/// 16-byte neighborhood broadcast key.
pub type BroadcastKey = [u8; BROADCAST_KEY_LEN];

/// Both link-layer addresses of a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct NeighborIds {
    /// Extended address; unique per device, used to resolve senders.
    pub extended: ExtendedAddr,
    /// Short address; carried in handshake payloads.
    pub short: ShortAddr,
}

impl NeighborIds {
    /// Bundle an extended and a short address.
    pub const fn new(extended: ExtendedAddr, short: ShortAddr) -> Self {
        Self { extended, short }
    }
}

/// Handshake progress of a neighbor entry.
///
/// Entries only move forward; a free table slot is represented by the
/// absence of an entry, not by a status value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeighborStatus {
    /// HELLO heard, reply delay in progress, no pairwise key yet.
    Tentative,
    /// HELLOACK sent and pairwise key stored; waiting for the peer's ACK.
    TentativeAwaitingAck,
    /// Handshake complete; pairwise key valid, anti-replay initialized.
    Permanent,
}

/// Per-neighbor receive-counter window for replay rejection.
///
/// Tracks the highest link-layer frame counter accepted from the peer.
/// Kept deliberately small; persistent storage of counters is the
/// platform's concern.
#[derive(Clone, Copy, Debug, Default)]
pub struct AntiReplayInfo {
    last_counter: Option<u32>,
}

impl AntiReplayInfo {
    /// Fresh window accepting any counter.
    pub const fn new() -> Self {
        Self { last_counter: None }
    }

    /// Check a received frame counter, advancing the window on success.
    ///
    /// Returns `true` if the frame must be treated as replayed.
    pub fn was_replayed(&mut self, counter: u32) -> bool {
        match self.last_counter {
            Some(last) if counter <= last => true,
            _ => {
                self.last_counter = Some(counter);
                false
            }
        }
    }

    /// Start the window at the counter of the frame that installed the
    /// key; anything at or below it is rejected from now on.
    pub fn init(&mut self, counter: u32) {
        self.last_counter = Some(counter);
    }

    /// Forget all history, e.g. after the peer re-keyed.
    pub fn reset(&mut self) {
        self.last_counter = None;
    }
}

/// Destination of an outgoing command frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDst {
    /// One-hop broadcast.
    Broadcast,
    /// Unicast to the given extended address.
    Unicast(ExtendedAddr),
}

/// Link-layer security attributes for an outgoing frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecurityHeader {
    /// Security level bits (MIC length, encryption bit).
    pub level: u8,
    /// Key identifier mode; 0 selects the implicit pairwise key.
    pub key_id_mode: u8,
    /// Key index; the handshake uses the command identifier here.
    pub key_index: u8,
    /// Key source, present in key-id modes that carry one.
    pub key_source: Option<ShortAddr>,
}

/// An assembled command frame on its way to the gateway.
///
/// `key` is the key the gateway must secure the frame with; `None`
/// sends the frame unsecured (HELLO broadcasts).
#[derive(Clone, Debug)]
pub struct TxFrame {
    pub dst: FrameDst,
    pub security: Option<SecurityHeader>,
    pub key: Option<PairwiseKey>,
    /// Command identifier byte followed by the command body.
    pub payload: Vec<u8>,
}

/// A received command frame as delivered by the gateway.
#[derive(Clone, Debug)]
pub struct RxFrame {
    /// Extended address of the transmitter.
    pub src: ExtendedAddr,
    /// Key source from the auxiliary security header, when present.
    pub key_source: Option<ShortAddr>,
    /// Link-layer frame counter, fed to anti-replay.
    pub frame_counter: u32,
    /// Command identifier byte followed by the command body.
    pub payload: Vec<u8>,
    /// Message integrity code over the secured frame.
    pub mic: [u8; MIC_LEN],
}

/// Why a received frame was discarded.
///
/// Drops are silent on the air; these values feed metrics and the
/// event channel so a flood or a provisioning gap is visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Wait-timer pool exhausted (HELLO flood).
    WaitSlotsExhausted,
    /// HELLO from a peer that already has an entry.
    AlreadyKnown,
    /// Neighbor table full.
    TableFull,
    /// The secret scheme has no secret for this peer.
    NoSecret,
    /// Decrypt-verify of a secured frame failed.
    AuthFailed,
    /// HELLOACK does not echo the challenge of the current burst.
    ChallengeMismatch,
    /// Frame not admissible in the sender's current handshake state.
    BadState,
    /// Frame counter already seen from this permanent neighbor.
    Replayed,
    /// Payload too short or otherwise unparseable.
    Malformed,
    /// Command identifier not part of the handshake.
    UnknownCommand,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::WaitSlotsExhausted => "wait-timer pool exhausted",
            DropReason::AlreadyKnown => "peer already known",
            DropReason::TableFull => "neighbor table full",
            DropReason::NoSecret => "no shared secret",
            DropReason::AuthFailed => "authentication failed",
            DropReason::ChallengeMismatch => "challenge mismatch",
            DropReason::BadState => "inadmissible handshake state",
            DropReason::Replayed => "replayed frame",
            DropReason::Malformed => "malformed payload",
            DropReason::UnknownCommand => "unknown command identifier",
        };
        f.write_str(s)
    }
}

/// Events emitted by the engine for the network layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// All bootstrap rounds finished; the completion hook has run.
    Bootstrapped,
    /// A peer reached `Permanent`; its pairwise key is installed.
    NeighborEstablished { short_addr: ShortAddr },
    /// A received frame was discarded.
    FrameDropped { reason: DropReason },
}

/// Handshake traffic counters for monitoring.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineMetrics {
    pub hellos_sent: u64,
    pub hellos_received: u64,
    pub helloacks_sent: u64,
    pub helloacks_received: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    /// Neighbors promoted to `Permanent`.
    pub handshakes_completed: u64,
    /// Received frames discarded for any [`DropReason`].
    pub frames_dropped: u64,
}

impl EngineMetrics {
    /// Create new zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total handshake frames sent.
    pub fn total_sent(&self) -> u64 {
        self.hellos_sent + self.helloacks_sent + self.acks_sent
    }

    /// Total handshake frames received, dropped or not.
    pub fn total_received(&self) -> u64 {
        self.hellos_received + self.helloacks_received + self.acks_received
    }
}
