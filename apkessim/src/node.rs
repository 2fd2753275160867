//! SimNode: a simulated mote wrapping the handshake engine.

use std::cell::Cell;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use apkes::traits::frame_mic;
use apkes::types::MIC_LEN;
use apkes::{
    Clock, Csprng, Duration, Engine, EngineConfig, Event, ExtendedAddr, FrameDst, FrameGateway,
    NeighborIds, PairwiseKey, PlainScheme, RxFrame, SecretScheme, ShortAddr, SoftwareAes,
    Timestamp, TxFrame,
};

/// Extended address a simulated node derives from its short address.
///
/// The trailing marker keeps it distinct from a blank table entry.
pub fn extended_addr(short: ShortAddr) -> ExtendedAddr {
    let s = short.to_le_bytes();
    [s[0], s[1], 0, 0, 0, 0, 0, 0xA5]
}

/// A transmitted frame sealed for the air: destination plus the
/// receive-side view every listener gets.
#[derive(Debug, Clone)]
pub struct SealedFrame {
    pub dst: FrameDst,
    pub frame: RxFrame,
}

/// Gateway for simulation: queues outgoing frames for the simulator to
/// route, secures them with the software cipher at seal time.
pub struct SimGateway {
    outgoing: Vec<TxFrame>,
    frame_counter: u32,
    cipher: SoftwareAes,
}

impl SimGateway {
    pub fn new() -> Self {
        Self {
            outgoing: Vec::new(),
            frame_counter: 0,
            cipher: SoftwareAes,
        }
    }

    /// Seal and drain all queued frames as transmitted from `src`.
    pub fn take_sealed(&mut self, src: ExtendedAddr) -> Vec<SealedFrame> {
        let frames = std::mem::take(&mut self.outgoing);
        frames
            .into_iter()
            .map(|tx| {
                self.frame_counter += 1;
                let counter = self.frame_counter;
                let mic = match &tx.key {
                    Some(key) => frame_mic(&mut self.cipher, key, &src, counter, &tx.payload),
                    None => [0u8; MIC_LEN],
                };
                SealedFrame {
                    dst: tx.dst,
                    frame: RxFrame {
                        src,
                        key_source: tx.security.as_ref().and_then(|s| s.key_source),
                        frame_counter: counter,
                        payload: tx.payload,
                        mic,
                    },
                }
            })
            .collect()
    }
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameGateway for SimGateway {
    type Error = Infallible;

    fn transmit(&mut self, frame: TxFrame) -> Result<(), Self::Error> {
        self.outgoing.push(frame);
        Ok(())
    }

    fn decrypt_verify_unicast(&mut self, frame: &RxFrame, key: &PairwiseKey) -> bool {
        let expected = frame_mic(
            &mut self.cipher,
            key,
            &frame.src,
            frame.frame_counter,
            &frame.payload,
        );
        expected == frame.mic
    }
}

/// Clock for simulation; time is set externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            current: Cell::new(Timestamp::ZERO),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        self.current.get()
    }
}

/// Deterministic random source for simulation (LCG, not secure).
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Csprng for SimRng {
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let bytes = self.state.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

/// Short rounds so scenarios finish in simulated seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastConfig;

impl EngineConfig for FastConfig {
    const ROUNDS: u8 = 3;
    const ROUND_DURATION: Duration = Duration::from_secs(1);
    const MAX_TENTATIVE_NEIGHBORS: usize = 2;
    const MAX_WAITING_PERIOD: Duration = Duration::from_millis(800);
    const ACK_DELAY: Duration = Duration::from_secs(1);
    const MAX_NEIGHBORS: usize = 16;
    const WITH_BROADCAST_KEY: bool = false;
}

/// Engine type used by simulated nodes.
pub type SimEngine<S, Cfg> = Engine<SimGateway, SimClock, SimRng, SoftwareAes, S, Cfg>;

/// A simulated mote.
pub struct SimNode<S: SecretScheme = PlainScheme, Cfg: EngineConfig = FastConfig> {
    inner: SimEngine<S, Cfg>,
    short: ShortAddr,
    completions: Arc<AtomicU32>,
}

impl<S: SecretScheme, Cfg: EngineConfig> SimNode<S, Cfg> {
    /// Create a node with a deterministic identity and random stream.
    pub fn new(short: ShortAddr, seed: u64, scheme: S) -> Self {
        let ids = NeighborIds::new(extended_addr(short), short);
        let inner = Engine::new(
            SimGateway::new(),
            SimClock::new(),
            SimRng::with_seed(seed),
            SoftwareAes,
            scheme,
            ids,
        );
        Self {
            inner,
            short,
            completions: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The node's short address (its identity within the simulator).
    pub fn short_addr(&self) -> ShortAddr {
        self.short
    }

    /// The node's extended address.
    pub fn extended(&self) -> ExtendedAddr {
        extended_addr(self.short)
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &SimEngine<S, Cfg> {
        &self.inner
    }

    /// The wrapped engine, mutably.
    pub fn engine_mut(&mut self) -> &mut SimEngine<S, Cfg> {
        &mut self.inner
    }

    /// Start bootstrapping at `now`; completions are counted.
    pub fn bootstrap(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        let completions = self.completions.clone();
        self.inner.bootstrap(move || {
            completions.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// How many times the bootstrap-complete hook has run.
    pub fn completion_count(&self) -> u32 {
        self.completions.load(Ordering::Relaxed)
    }

    /// True once all bootstrap rounds have completed.
    pub fn is_bootstrapped(&self) -> bool {
        self.inner.is_bootstrapped()
    }

    /// Number of permanent neighbors.
    pub fn permanent_count(&self) -> usize {
        self.inner.neighbors().permanent_count()
    }

    /// Deliver a received frame.
    pub fn handle_frame(&mut self, frame: &RxFrame, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.on_command_frame(frame);
    }

    /// Advance timer-driven work to `now`.
    pub fn handle_timer(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_timer(now);
    }

    /// Earliest pending timer work.
    pub fn next_wakeup(&self) -> Option<Timestamp> {
        self.inner.next_wakeup()
    }

    /// Seal and drain everything the node transmitted.
    pub fn take_outgoing(&mut self) -> Vec<SealedFrame> {
        let src = self.extended();
        self.inner.gateway_mut().take_sealed(src)
    }

    /// Drain the engine's event channel.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.events().try_receive() {
            events.push(event);
        }
        events
    }
}
