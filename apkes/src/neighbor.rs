//! Fixed-capacity neighbor table.
//!
//! Entries live in stable slots so a [`NeighborHandle`] (the slot
//! index) stays valid for the entry's whole lifetime. The slot index
//! doubles as the `local_index` transmitted to the peer during the
//! handshake, letting the peer tag future frames with it.
//!
//! The table itself never resolves identity conflicts; the engine
//! checks [`NeighborTable::lookup`] before allocating so that one peer
//! never owns two entries at once.

use alloc::vec::Vec;

use crate::time::Timestamp;
use crate::types::{
    AntiReplayInfo, BroadcastKey, NeighborIds, NeighborStatus, PairwiseKey, ShortAddr,
    METADATA_LEN, PAIRWISE_KEY_LEN,
};

/// Stable index of an entry in its table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborHandle(u8);

impl NeighborHandle {
    /// The raw slot index; this is the `local_index` sent to the peer.
    pub fn index(self) -> u8 {
        self.0
    }
}

/// State kept for one peer across its handshake and beyond.
#[derive(Clone, Debug)]
pub struct Neighbor {
    /// Peer identity.
    pub ids: NeighborIds,
    /// Handshake progress.
    pub status: NeighborStatus,
    /// The peer's slot index for us, learned from HELLOACK/ACK.
    pub remote_index: u8,
    /// Valid once `status` is `TentativeAwaitingAck` (responder) or
    /// `Permanent` (initiator).
    pub pairwise_key: PairwiseKey,
    /// `peer_challenge ‖ own_challenge` scratch; only meaningful while
    /// the handshake is in flight, reused as key-derivation plaintext.
    pub metadata: [u8; METADATA_LEN],
    /// The peer's broadcast key, when piggybacked on the handshake.
    pub broadcast_key: Option<BroadcastKey>,
    /// Receive-counter window for replay rejection.
    pub anti_replay: AntiReplayInfo,
    /// Deadline after which a non-permanent entry is reclaimed.
    pub expires_at: Timestamp,
}

impl Neighbor {
    fn blank() -> Self {
        Self {
            ids: NeighborIds::default(),
            status: NeighborStatus::Tentative,
            remote_index: 0,
            pairwise_key: [0u8; PAIRWISE_KEY_LEN],
            metadata: [0u8; METADATA_LEN],
            broadcast_key: None,
            anti_replay: AntiReplayInfo::new(),
            expires_at: Timestamp::MAX,
        }
    }
}

/// Trailer of a table update, mirroring the HELLOACK/ACK trailers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateTrailer {
    /// Learn the peer's short address (HELLOACK without broadcast key).
    ShortAddr(ShortAddr),
    /// Learn the peer's broadcast key.
    BroadcastKey(BroadcastKey),
    /// Nothing to learn (ACK without broadcast key).
    None,
}

/// Promotion data consumed from a HELLOACK or ACK payload.
#[derive(Clone, Copy, Debug)]
pub struct NeighborUpdate {
    /// The peer's slot index for us.
    pub remote_index: u8,
    pub trailer: UpdateTrailer,
}

/// Fixed-capacity table of neighbor entries.
pub struct NeighborTable {
    slots: Vec<Option<Neighbor>>,
}

impl NeighborTable {
    /// Create a table with the given capacity (at most 256 slots, so
    /// slot indices fit the 1-byte `local_index` wire field).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(256);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True when no entry is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim a free slot and return its handle, or `None` when full.
    ///
    /// The fresh entry is `Tentative` with blank fields; the caller
    /// fills identity and challenges.
    pub fn allocate(&mut self) -> Option<NeighborHandle> {
        let idx = self.slots.iter().position(|s| s.is_none())?;
        self.slots[idx] = Some(Neighbor::blank());
        Some(NeighborHandle(idx as u8))
    }

    /// Find the entry for an extended address.
    pub fn lookup(&self, extended: &[u8; 8]) -> Option<NeighborHandle> {
        self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|n| &n.ids.extended == extended)
        })
        .map(|idx| NeighborHandle(idx as u8))
    }

    /// Borrow an entry.
    pub fn get(&self, handle: NeighborHandle) -> Option<&Neighbor> {
        self.slots.get(handle.0 as usize)?.as_ref()
    }

    /// Borrow an entry mutably.
    pub fn get_mut(&mut self, handle: NeighborHandle) -> Option<&mut Neighbor> {
        self.slots.get_mut(handle.0 as usize)?.as_mut()
    }

    /// Promote an entry to `Permanent`, consuming the peer's update.
    ///
    /// Stores the peer's `remote_index` and trailer, initializes the
    /// anti-replay window at the promoting frame's counter and clears
    /// the expiration deadline. Returns `false` for a dead handle.
    pub fn update(
        &mut self,
        handle: NeighborHandle,
        update: NeighborUpdate,
        frame_counter: u32,
    ) -> bool {
        let Some(neighbor) = self.get_mut(handle) else {
            return false;
        };
        neighbor.remote_index = update.remote_index;
        match update.trailer {
            UpdateTrailer::ShortAddr(addr) => neighbor.ids.short = addr,
            UpdateTrailer::BroadcastKey(key) => neighbor.broadcast_key = Some(key),
            UpdateTrailer::None => {}
        }
        neighbor.status = NeighborStatus::Permanent;
        neighbor.anti_replay.reset();
        neighbor.anti_replay.init(frame_counter);
        neighbor.expires_at = Timestamp::MAX;
        true
    }

    /// Free an entry, returning it.
    pub fn remove(&mut self, handle: NeighborHandle) -> Option<Neighbor> {
        self.slots.get_mut(handle.0 as usize)?.take()
    }

    /// Iterate live entries with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (NeighborHandle, &Neighbor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| s.as_ref().map(|n| (NeighborHandle(idx as u8), n)))
    }

    /// Number of `Permanent` entries.
    pub fn permanent_count(&self) -> usize {
        self.iter()
            .filter(|(_, n)| n.status == NeighborStatus::Permanent)
            .count()
    }

    /// Handles of non-permanent entries whose deadline has passed.
    pub fn expired(&self, now: Timestamp) -> Vec<NeighborHandle> {
        self.iter()
            .filter(|(_, n)| n.status != NeighborStatus::Permanent && n.expires_at <= now)
            .map(|(h, _)| h)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u8) -> NeighborIds {
        NeighborIds::new([n; 8], n as u16)
    }

    #[test]
    fn allocate_until_full() {
        let mut table = NeighborTable::new(2);
        let a = table.allocate().unwrap();
        let b = table.allocate().unwrap();
        assert_ne!(a.index(), b.index());
        assert!(table.allocate().is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn slot_index_is_stable_across_removals() {
        let mut table = NeighborTable::new(4);
        let a = table.allocate().unwrap();
        let b = table.allocate().unwrap();
        table.remove(a);

        // b keeps its slot; the freed slot is reused
        assert!(table.get(b).is_some());
        let c = table.allocate().unwrap();
        assert_eq!(c.index(), a.index());
    }

    #[test]
    fn lookup_by_extended_address() {
        let mut table = NeighborTable::new(4);
        let h = table.allocate().unwrap();
        table.get_mut(h).unwrap().ids = ids(7);

        assert_eq!(table.lookup(&[7; 8]), Some(h));
        assert_eq!(table.lookup(&[9; 8]), None);
    }

    #[test]
    fn update_promotes_and_arms_anti_replay() {
        let mut table = NeighborTable::new(4);
        let h = table.allocate().unwrap();
        table.get_mut(h).unwrap().ids = ids(1);

        assert!(table.update(
            h,
            NeighborUpdate {
                remote_index: 5,
                trailer: UpdateTrailer::ShortAddr(0x2211),
            },
            42,
        ));

        let n = table.get(h).unwrap();
        assert_eq!(n.status, NeighborStatus::Permanent);
        assert_eq!(n.remote_index, 5);
        assert_eq!(n.ids.short, 0x2211);
        assert_eq!(n.expires_at, Timestamp::MAX);

        let mut replay = n.anti_replay;
        assert!(replay.was_replayed(42));
        assert!(!replay.was_replayed(43));
    }

    #[test]
    fn update_stores_broadcast_key() {
        let mut table = NeighborTable::new(2);
        let h = table.allocate().unwrap();
        assert!(table.update(
            h,
            NeighborUpdate {
                remote_index: 0,
                trailer: UpdateTrailer::BroadcastKey([3; 16]),
            },
            1,
        ));
        assert_eq!(table.get(h).unwrap().broadcast_key, Some([3; 16]));
    }

    #[test]
    fn expired_skips_permanent() {
        let mut table = NeighborTable::new(4);
        let stale = table.allocate().unwrap();
        table.get_mut(stale).unwrap().expires_at = Timestamp::from_secs(10);

        let done = table.allocate().unwrap();
        table.update(
            done,
            NeighborUpdate {
                remote_index: 0,
                trailer: UpdateTrailer::None,
            },
            1,
        );

        let expired = table.expired(Timestamp::from_secs(10));
        assert_eq!(expired, alloc::vec![stale]);
        assert!(table.expired(Timestamp::from_secs(9)).is_empty());
    }

    #[test]
    fn capacity_clamped_to_index_range() {
        let table = NeighborTable::new(1000);
        assert_eq!(table.capacity(), 256);
    }
}
