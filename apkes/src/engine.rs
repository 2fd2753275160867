//! The handshake engine.
//!
//! Drives the three-message discovery handshake (HELLO -> HELLOACK ->
//! ACK) across all one-hop peers: bootstrap rounds of HELLO
//! broadcasts, tentative-neighbor admission under a bounded wait-timer
//! pool, randomized HELLOACK reply delays, pairwise key derivation and
//! promotion to permanent neighbors.
//!
//! Execution is cooperative and single-threaded. Every handler runs to
//! completion; the engine never suspends mid-frame. The surrounding
//! runtime (or a simulator) calls [`Engine::handle_timer`] whenever
//! [`Engine::next_wakeup`] comes due and
//! [`Engine::on_command_frame`] for every received command frame.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData;

use crate::config::{DefaultConfig, EngineConfig};
use crate::flash::{FlashDevice, KeyingMaterialStore};
use crate::neighbor::{NeighborHandle, NeighborTable, NeighborUpdate, UpdateTrailer};
use crate::scheme::SecretScheme;
use crate::time::Timestamp;
use crate::traits::{Aes128, Clock, Csprng, EventChannel, FrameGateway};
use crate::types::{
    BroadcastKey, Challenge, DropReason, Event, EngineMetrics, FrameDst, NeighborIds,
    NeighborStatus, PairwiseKey, RxFrame, SecurityHeader, SharedSecret, TxFrame, ACK_IDENTIFIER,
    BROADCAST_KEY_LEN, CHALLENGE_LEN, EXTENDED_ADDR_LEN, HELLOACK_IDENTIFIER,
    KEY_ID_MODE_SRC4_INDEX, METADATA_LEN, PAIRWISE_KEY_LEN, SEC_LEVEL_ENC_BIT, SEC_LEVEL_MIC32,
    SHORT_ADDR_LEN,
};
use crate::wire::{Ack, Command, DecodeError, Hello, HelloAck, HelloAckTrailer, Reader};

/// Completion hook invoked exactly once when all bootstrap rounds are
/// over, successful handshakes or not.
pub type BootstrapHook = Box<dyn FnOnce() + Send>;

/// Length of one serialized keying-material record (see
/// [`Engine::backup_keying_material`]).
pub const KEYING_RECORD_LEN: usize =
    EXTENDED_ADDR_LEN + SHORT_ADDR_LEN + 1 + PAIRWISE_KEY_LEN + 1 + BROADCAST_KEY_LEN;

/// Bootstrap driver state, advanced by `handle_timer`.
#[derive(Clone, Copy, Debug)]
enum BootstrapPhase {
    /// `bootstrap` not called yet.
    Idle,
    /// HELLO round `current` in flight; the next round (or completion)
    /// happens at `deadline`.
    Rounds { current: u8, deadline: Timestamp },
    /// All rounds finished; the completion hook has run.
    Done,
}

/// Pending HELLOACK: the only evidence that a reply is owed to a peer.
///
/// Holds a table handle, not a reference, so the timer's lifetime is
/// independent of the entry's. There is no cancel operation: the
/// callback checks the entry's status and frees the slot either way.
#[derive(Clone, Copy, Debug)]
struct WaitTimer {
    fire_at: Timestamp,
    neighbor: NeighborHandle,
}

/// The pairwise key establishment engine.
///
/// Generic over:
/// - `G`: command-frame gateway
/// - `C`: clock
/// - `R`: random source
/// - `K`: AES-128 implementation
/// - `S`: secret scheme
/// - `Cfg`: timing and memory bounds (defaults to [`DefaultConfig`])
///
/// All mutable protocol state lives in this value; two engines in one
/// process never share anything.
pub struct Engine<G, C, R, K, S, Cfg: EngineConfig = DefaultConfig> {
    gateway: G,
    clock: C,
    csprng: R,
    cipher: K,
    scheme: S,

    _config: PhantomData<Cfg>,

    /// Our own addresses, advertised in handshake payloads.
    ids: NeighborIds,
    neighbors: NeighborTable,
    wait_timers: Vec<WaitTimer>,
    /// Challenge of the current HELLO burst; refreshed per broadcast.
    our_challenge: Challenge,
    /// Our neighborhood broadcast key (all zero unless the option is on).
    broadcast_key: BroadcastKey,

    phase: BootstrapPhase,
    on_bootstrapped: Option<BootstrapHook>,

    events: EventChannel,
    metrics: EngineMetrics,
}

impl<G, C, R, K, S, Cfg> Engine<G, C, R, K, S, Cfg>
where
    G: FrameGateway,
    C: Clock,
    R: Csprng,
    K: Aes128,
    S: SecretScheme,
    Cfg: EngineConfig,
{
    /// Create an engine for the node with the given addresses.
    pub fn new(gateway: G, clock: C, mut csprng: R, cipher: K, scheme: S, ids: NeighborIds) -> Self {
        let mut broadcast_key = [0u8; BROADCAST_KEY_LEN];
        if Cfg::WITH_BROADCAST_KEY {
            csprng.fill_bytes(&mut broadcast_key);
        }

        Self {
            gateway,
            clock,
            csprng,
            cipher,
            scheme,

            _config: PhantomData,

            ids,
            neighbors: NeighborTable::new(Cfg::MAX_NEIGHBORS),
            wait_timers: Vec::with_capacity(Cfg::MAX_TENTATIVE_NEIGHBORS),
            our_challenge: [0u8; CHALLENGE_LEN],
            broadcast_key,

            phase: BootstrapPhase::Idle,
            on_bootstrapped: None,

            events: EventChannel::new(),
            metrics: EngineMetrics::new(),
        }
    }

    /// Our own link-layer addresses.
    pub fn node_ids(&self) -> &NeighborIds {
        &self.ids
    }

    /// The neighbor table.
    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// Handshake traffic counters.
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Channel of [`Event`]s for the network layer.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// The gateway.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// The gateway, mutably (simulators drain transmitted frames here).
    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Our neighborhood broadcast key (all zero unless
    /// `Cfg::WITH_BROADCAST_KEY`).
    pub fn broadcast_key(&self) -> &BroadcastKey {
        &self.broadcast_key
    }

    /// Number of HELLOACKs currently owed to peers. Never exceeds
    /// `Cfg::MAX_TENTATIVE_NEIGHBORS`.
    pub fn pending_helloacks(&self) -> usize {
        self.wait_timers.len()
    }

    #[cfg(test)]
    pub(crate) fn current_challenge(&self) -> Challenge {
        self.our_challenge
    }

    /// True once all bootstrap rounds have completed.
    pub fn is_bootstrapped(&self) -> bool {
        matches!(self.phase, BootstrapPhase::Done)
    }

    /// Start the bootstrap process.
    ///
    /// Broadcasts the first HELLO immediately, then one per round until
    /// `Cfg::ROUNDS` rounds have elapsed. `on_done` runs exactly once
    /// when the last round ends, even if no handshake succeeded; a
    /// second `bootstrap` call is ignored.
    pub fn bootstrap(&mut self, on_done: impl FnOnce() + Send + 'static) {
        if !matches!(self.phase, BootstrapPhase::Idle) {
            return;
        }
        self.scheme.init();
        self.on_bootstrapped = Some(Box::new(on_done));

        let now = self.clock.now();
        self.broadcast_hello();
        self.phase = BootstrapPhase::Rounds {
            current: 1,
            deadline: now + Cfg::ROUND_DURATION,
        };
    }

    /// Earliest instant at which [`handle_timer`](Self::handle_timer)
    /// has work to do, or `None` when fully quiescent.
    pub fn next_wakeup(&self) -> Option<Timestamp> {
        let mut next: Option<Timestamp> = None;
        let mut consider = |t: Timestamp| {
            next = Some(match next {
                Some(n) if n <= t => n,
                _ => t,
            });
        };

        if let BootstrapPhase::Rounds { deadline, .. } = self.phase {
            consider(deadline);
        }
        for timer in &self.wait_timers {
            consider(timer.fire_at);
        }
        for (_, neighbor) in self.neighbors.iter() {
            if neighbor.status != NeighborStatus::Permanent && neighbor.expires_at != Timestamp::MAX
            {
                consider(neighbor.expires_at);
            }
        }
        next
    }

    /// Advance all timer-driven work to `now`.
    ///
    /// Progresses bootstrap rounds, fires due wait-timers (sending the
    /// owed HELLOACKs) and reclaims expired half-open handshakes.
    pub fn handle_timer(&mut self, now: Timestamp) {
        while let BootstrapPhase::Rounds { current, deadline } = self.phase {
            if now < deadline {
                break;
            }
            if current >= Cfg::ROUNDS {
                self.phase = BootstrapPhase::Done;
                if let Some(hook) = self.on_bootstrapped.take() {
                    hook();
                }
                self.emit(Event::Bootstrapped);
            } else {
                self.broadcast_hello();
                self.phase = BootstrapPhase::Rounds {
                    current: current + 1,
                    deadline: deadline + Cfg::ROUND_DURATION,
                };
            }
        }

        self.service_wait_timers(now);

        for handle in self.neighbors.expired(now) {
            self.neighbors.remove(handle);
        }
    }

    /// Dispatch a received command frame.
    ///
    /// Resolves the sender by extended address and routes on the
    /// leading command identifier; anything unparseable or unknown is
    /// dropped and counted.
    pub fn on_command_frame(&mut self, frame: &RxFrame) {
        let command = match Command::decode_from_slice(&frame.payload, Cfg::WITH_BROADCAST_KEY) {
            Ok(command) => command,
            Err(DecodeError::UnknownCommand(_)) => {
                return self.drop_frame(DropReason::UnknownCommand)
            }
            Err(_) => return self.drop_frame(DropReason::Malformed),
        };

        let sender = self.neighbors.lookup(&frame.src);
        match command {
            Command::Hello(hello) => self.on_hello(sender, frame, hello),
            Command::HelloAck(helloack) => self.on_helloack(sender, frame, helloack),
            Command::Ack(ack) => self.on_ack(sender, frame, ack),
        }
    }

    /// Key for an outbound secured frame to `handle`.
    ///
    /// A `TentativeAwaitingAck` peer is still keyed by the HELLOACK-time
    /// secret, recomputed on demand so it does not linger in the entry;
    /// a `Permanent` peer uses the stored pairwise key.
    pub fn pairwise_key_with(&self, handle: NeighborHandle) -> Option<PairwiseKey> {
        let neighbor = self.neighbors.get(handle)?;
        match neighbor.status {
            NeighborStatus::TentativeAwaitingAck => {
                self.scheme.secret_with_hello_sender(&neighbor.ids)
            }
            NeighborStatus::Permanent => Some(neighbor.pairwise_key),
            NeighborStatus::Tentative => None,
        }
    }

    // --- frame handlers ---------------------------------------------------

    /// Broadcast one HELLO with a fresh challenge.
    fn broadcast_hello(&mut self) {
        self.csprng.fill_bytes(&mut self.our_challenge);

        let payload = Hello {
            challenge: self.our_challenge,
            short_addr: self.ids.short,
        }
        .encode_to_vec();

        let frame = TxFrame {
            dst: FrameDst::Broadcast,
            security: None,
            key: None,
            payload,
        };
        if self.gateway.transmit(frame).is_ok() {
            self.metrics.hellos_sent += 1;
        }
    }

    fn on_hello(&mut self, sender: Option<NeighborHandle>, frame: &RxFrame, hello: Hello) {
        self.metrics.hellos_received += 1;
        let now = self.clock.now();

        // Flood protection: no free wait-timer slot, no admission.
        if self.wait_timers.len() >= Cfg::MAX_TENTATIVE_NEIGHBORS {
            return self.drop_frame(DropReason::WaitSlotsExhausted);
        }
        // At most one handshake per peer per bootstrap.
        if sender.is_some() {
            return self.drop_frame(DropReason::AlreadyKnown);
        }
        let Some(handle) = self.neighbors.allocate() else {
            return self.drop_frame(DropReason::TableFull);
        };

        let mut own_challenge = [0u8; CHALLENGE_LEN];
        self.csprng.fill_bytes(&mut own_challenge);
        // Spread replies across the neighborhood to dodge collisions.
        let reply_delay = self
            .csprng
            .gen_range(0, Cfg::MAX_WAITING_PERIOD.as_millis() + 1);

        let Some(neighbor) = self.neighbors.get_mut(handle) else {
            return;
        };
        neighbor.status = NeighborStatus::Tentative;
        neighbor.ids = NeighborIds::new(frame.src, hello.short_addr);
        neighbor.metadata[..CHALLENGE_LEN].copy_from_slice(&hello.challenge);
        neighbor.metadata[CHALLENGE_LEN..].copy_from_slice(&own_challenge);
        // Budget: the reply delay plus one ACK round trip.
        neighbor.expires_at = now + Cfg::MAX_WAITING_PERIOD + Cfg::ACK_DELAY;

        self.wait_timers.push(WaitTimer {
            fire_at: now + crate::time::Duration::from_millis(reply_delay),
            neighbor: handle,
        });
    }

    /// Fire every due wait-timer. The slot is freed in all cases; the
    /// HELLOACK only goes out if the entry is still `Tentative` (a
    /// crossing HELLOACK may have promoted it first).
    fn service_wait_timers(&mut self, now: Timestamp) {
        let mut i = 0;
        while i < self.wait_timers.len() {
            if self.wait_timers[i].fire_at > now {
                i += 1;
                continue;
            }
            let timer = self.wait_timers.swap_remove(i);
            let still_tentative = self
                .neighbors
                .get(timer.neighbor)
                .is_some_and(|n| n.status == NeighborStatus::Tentative);
            if still_tentative {
                self.send_helloack(timer.neighbor);
            }
        }
    }

    fn send_helloack(&mut self, handle: NeighborHandle) {
        let Some(neighbor) = self.neighbors.get_mut(handle) else {
            return;
        };
        neighbor.status = NeighborStatus::TentativeAwaitingAck;
        let ids = neighbor.ids;
        let metadata = neighbor.metadata;

        let Some(secret) = self.scheme.secret_with_hello_sender(&ids) else {
            // No provisioned secret: abort this handshake entirely.
            self.neighbors.remove(handle);
            return self.drop_frame(DropReason::NoSecret);
        };

        // Derive and store the pairwise key before transmitting: the
        // peer's ACK will be verified under it.
        let key = self.derive_key(&secret, &metadata);
        if let Some(neighbor) = self.neighbors.get_mut(handle) {
            neighbor.pairwise_key = key;
        }

        let mut peer_challenge = [0u8; CHALLENGE_LEN];
        let mut own_challenge = [0u8; CHALLENGE_LEN];
        peer_challenge.copy_from_slice(&metadata[..CHALLENGE_LEN]);
        own_challenge.copy_from_slice(&metadata[CHALLENGE_LEN..]);

        let trailer = if Cfg::WITH_BROADCAST_KEY {
            HelloAckTrailer::BroadcastKey(self.broadcast_key)
        } else {
            HelloAckTrailer::ShortAddr(self.ids.short)
        };
        let payload = HelloAck {
            peer_challenge,
            own_challenge,
            local_index: handle.index(),
            trailer,
        }
        .encode_to_vec();

        // HELLOACK rides under the long-term secret; the peer has no
        // pairwise key yet.
        let frame = TxFrame {
            dst: FrameDst::Unicast(ids.extended),
            security: Some(self.unicast_security(HELLOACK_IDENTIFIER)),
            key: Some(secret),
            payload,
        };
        if self.gateway.transmit(frame).is_ok() {
            self.metrics.helloacks_sent += 1;
        }
    }

    fn on_helloack(&mut self, sender: Option<NeighborHandle>, frame: &RxFrame, helloack: HelloAck) {
        self.metrics.helloacks_received += 1;

        // Reconstruct the peer identity before any state change.
        let short = match helloack.trailer {
            HelloAckTrailer::ShortAddr(addr) => addr,
            HelloAckTrailer::BroadcastKey(_) => match frame.key_source {
                Some(addr) => addr,
                None => return self.drop_frame(DropReason::Malformed),
            },
        };
        let ids = NeighborIds::new(frame.src, short);

        let Some(secret) = self.scheme.secret_with_helloack_sender(&ids) else {
            return self.drop_frame(DropReason::NoSecret);
        };
        if !self.gateway.decrypt_verify_unicast(frame, &secret) {
            return self.drop_frame(DropReason::AuthFailed);
        }
        if helloack.peer_challenge != self.our_challenge {
            return self.drop_frame(DropReason::ChallengeMismatch);
        }

        let handle = match sender {
            Some(handle) => {
                let status = match self.neighbors.get(handle) {
                    Some(neighbor) => neighbor.status,
                    None => return,
                };
                match status {
                    NeighborStatus::Permanent => {
                        // Re-keying an established neighbor.
                        let replayed = self
                            .neighbors
                            .get_mut(handle)
                            .map(|n| n.anti_replay.was_replayed(frame.frame_counter))
                            .unwrap_or(true);
                        if replayed {
                            return self.drop_frame(DropReason::Replayed);
                        }
                        handle
                    }
                    // The pending wait-timer keys off this status; it
                    // will see it changed and only free its slot.
                    NeighborStatus::Tentative => handle,
                    NeighborStatus::TentativeAwaitingAck => {
                        return self.drop_frame(DropReason::BadState)
                    }
                }
            }
            None => match self.neighbors.allocate() {
                Some(handle) => handle,
                None => return self.drop_frame(DropReason::TableFull),
            },
        };

        // Both challenges, exactly as echoed, are the derivation input.
        let mut challenges = [0u8; METADATA_LEN];
        challenges[..CHALLENGE_LEN].copy_from_slice(&helloack.peer_challenge);
        challenges[CHALLENGE_LEN..].copy_from_slice(&helloack.own_challenge);
        let key = self.derive_key(&secret, &challenges);

        let Some(neighbor) = self.neighbors.get_mut(handle) else {
            return;
        };
        neighbor.ids = ids;
        neighbor.metadata = challenges;
        neighbor.pairwise_key = key;

        let trailer = match helloack.trailer {
            HelloAckTrailer::ShortAddr(addr) => UpdateTrailer::ShortAddr(addr),
            HelloAckTrailer::BroadcastKey(bkey) => UpdateTrailer::BroadcastKey(bkey),
        };
        if !self.neighbors.update(
            handle,
            NeighborUpdate {
                remote_index: helloack.local_index,
                trailer,
            },
            frame.frame_counter,
        ) {
            return;
        }

        self.metrics.handshakes_completed += 1;
        self.emit(Event::NeighborEstablished { short_addr: short });
        self.send_ack(handle);
    }

    fn send_ack(&mut self, handle: NeighborHandle) {
        let Some(neighbor) = self.neighbors.get(handle) else {
            return;
        };
        let dst = neighbor.ids.extended;
        let key = neighbor.pairwise_key;

        let payload = Ack {
            local_index: handle.index(),
            broadcast_key: Cfg::WITH_BROADCAST_KEY.then_some(self.broadcast_key),
        }
        .encode_to_vec();

        let frame = TxFrame {
            dst: FrameDst::Unicast(dst),
            security: Some(self.unicast_security(ACK_IDENTIFIER)),
            key: Some(key),
            payload,
        };
        if self.gateway.transmit(frame).is_ok() {
            self.metrics.acks_sent += 1;
        }
    }

    fn on_ack(&mut self, sender: Option<NeighborHandle>, frame: &RxFrame, ack: Ack) {
        self.metrics.acks_received += 1;

        let Some(handle) = sender else {
            return self.drop_frame(DropReason::BadState);
        };
        let (status, key, short) = match self.neighbors.get(handle) {
            Some(neighbor) => (neighbor.status, neighbor.pairwise_key, neighbor.ids.short),
            None => return,
        };
        if status != NeighborStatus::TentativeAwaitingAck {
            return self.drop_frame(DropReason::BadState);
        }
        if !self.gateway.decrypt_verify_unicast(frame, &key) {
            return self.drop_frame(DropReason::AuthFailed);
        }

        let trailer = match ack.broadcast_key {
            Some(bkey) => UpdateTrailer::BroadcastKey(bkey),
            None => UpdateTrailer::None,
        };
        if !self.neighbors.update(
            handle,
            NeighborUpdate {
                remote_index: ack.local_index,
                trailer,
            },
            frame.frame_counter,
        ) {
            return;
        }

        self.metrics.handshakes_completed += 1;
        self.emit(Event::NeighborEstablished { short_addr: short });
    }

    // --- helpers ----------------------------------------------------------

    /// Derive a pairwise key: install the shared secret as the key
    /// schedule and encrypt both challenges; the ciphertext is the key.
    fn derive_key(&mut self, secret: &SharedSecret, challenges: &[u8; METADATA_LEN]) -> PairwiseKey {
        let mut block = *challenges;
        self.cipher.encrypt(secret, &mut block);
        block
    }

    fn unicast_security(&self, command_id: u8) -> SecurityHeader {
        if Cfg::WITH_BROADCAST_KEY {
            SecurityHeader {
                level: SEC_LEVEL_MIC32 | SEC_LEVEL_ENC_BIT,
                key_id_mode: KEY_ID_MODE_SRC4_INDEX,
                key_index: command_id,
                key_source: Some(self.ids.short),
            }
        } else {
            SecurityHeader {
                level: SEC_LEVEL_MIC32,
                key_id_mode: 0,
                key_index: command_id,
                key_source: None,
            }
        }
    }

    fn drop_frame(&mut self, reason: DropReason) {
        self.metrics.frames_dropped += 1;
        self.emit(Event::FrameDropped { reason });
    }

    fn emit(&self, event: Event) {
        let _ = self.events.try_send(event);
    }

    // --- keying-material persistence --------------------------------------

    /// Serialize every `Permanent` neighbor into `store`.
    ///
    /// Erases the region first, then appends one fixed-size record per
    /// neighbor: extended address, short address, remote index,
    /// pairwise key, broadcast-key flag and bytes. Returns the record
    /// count.
    pub fn backup_keying_material<F: FlashDevice>(
        &self,
        store: &mut KeyingMaterialStore<F>,
    ) -> Result<usize, F::Error> {
        store.erase()?;
        let mut count = 0;
        for (_, neighbor) in self.neighbors.iter() {
            if neighbor.status != NeighborStatus::Permanent {
                continue;
            }
            let mut record = [0u8; KEYING_RECORD_LEN];
            let mut pos = 0;
            record[pos..pos + EXTENDED_ADDR_LEN].copy_from_slice(&neighbor.ids.extended);
            pos += EXTENDED_ADDR_LEN;
            record[pos..pos + SHORT_ADDR_LEN].copy_from_slice(&neighbor.ids.short.to_le_bytes());
            pos += SHORT_ADDR_LEN;
            record[pos] = neighbor.remote_index;
            pos += 1;
            record[pos..pos + PAIRWISE_KEY_LEN].copy_from_slice(&neighbor.pairwise_key);
            pos += PAIRWISE_KEY_LEN;
            match neighbor.broadcast_key {
                Some(bkey) => {
                    record[pos] = 1;
                    record[pos + 1..pos + 1 + BROADCAST_KEY_LEN].copy_from_slice(&bkey);
                }
                None => record[pos] = 0,
            }
            store.append(&record)?;
            count += 1;
        }
        Ok(count)
    }

    /// Re-admit `count` neighbors previously written by
    /// [`backup_keying_material`](Self::backup_keying_material).
    ///
    /// Each record becomes a `Permanent` entry with a fresh anti-replay
    /// window. Stops early when the table fills or a record's identity
    /// already has an entry; returns the number restored.
    pub fn restore_keying_material<F: FlashDevice>(
        &mut self,
        store: &mut KeyingMaterialStore<F>,
        count: usize,
    ) -> Result<usize, F::Error> {
        let mut restored = 0;
        for i in 0..count {
            let mut record = [0u8; KEYING_RECORD_LEN];
            store.restore(&mut record, (i * KEYING_RECORD_LEN) as u16)?;

            let mut r = Reader::new(&record);
            let Ok(extended_bytes) = r.read_bytes(EXTENDED_ADDR_LEN) else {
                break;
            };
            let mut extended = [0u8; EXTENDED_ADDR_LEN];
            extended.copy_from_slice(extended_bytes);
            let Ok(short) = r.read_u16_le() else { break };
            let Ok(remote_index) = r.read_u8() else { break };
            let Ok(key_bytes) = r.read_bytes(PAIRWISE_KEY_LEN) else {
                break;
            };
            let mut pairwise_key = [0u8; PAIRWISE_KEY_LEN];
            pairwise_key.copy_from_slice(key_bytes);
            let Ok(has_bkey) = r.read_u8() else { break };
            let Ok(bkey) = r.read_broadcast_key() else { break };

            if self.neighbors.lookup(&extended).is_some() {
                break;
            }
            let Some(handle) = self.neighbors.allocate() else {
                break;
            };
            let Some(neighbor) = self.neighbors.get_mut(handle) else {
                break;
            };
            neighbor.ids = NeighborIds::new(extended, short);
            neighbor.remote_index = remote_index;
            neighbor.pairwise_key = pairwise_key;
            neighbor.broadcast_key = (has_bkey == 1).then_some(bkey);
            neighbor.status = NeighborStatus::Permanent;
            neighbor.expires_at = Timestamp::MAX;
            restored += 1;
        }
        Ok(restored)
    }
}
