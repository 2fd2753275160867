//! Platform traits for the handshake engine.
//!
//! The engine is generic over:
//! - [`FrameGateway`] - command-frame transmission and unicast verification
//! - [`Aes128`] - the block cipher underlying key derivation and MICs
//! - [`Csprng`] - the random source for challenges and reply delays
//! - [`Clock`] - the time source
//!
//! Implementations range from radio drivers with hardware AES to the
//! in-process mocks in `test_impls`.

use core::fmt::Debug;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{Event, ExtendedAddr, PairwiseKey, RxFrame, TxFrame, MIC_LEN, PAIRWISE_KEY_LEN};

/// Bounded channel carrying [`Event`]s to the network layer.
///
/// The engine writes with `try_send`; overflow is dropped.
pub type EventChannel = Channel<CriticalSectionRawMutex, Event, 16>;

/// AES-128 block encryption.
///
/// One call per 16-byte block, key supplied per call; the engine keys
/// the cipher with a different secret for every peer. Hardware
/// implementations may cache the key schedule internally.
pub trait Aes128 {
    /// Encrypt `block` in place under `key`.
    fn encrypt(&mut self, key: &[u8; PAIRWISE_KEY_LEN], block: &mut [u8; PAIRWISE_KEY_LEN]);
}

/// Cryptographically secure random source.
pub trait Csprng {
    /// Fill `buf` with random bytes.
    fn fill_bytes(&mut self, buf: &mut [u8]);

    /// Uniform draw from `[min, max)`.
    ///
    /// The default draws eight bytes and reduces modulo the range.
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        let range = max.saturating_sub(min);
        if range == 0 {
            return min;
        }
        let mut bytes = [0u8; 8];
        self.fill_bytes(&mut bytes);
        min + (u64::from_le_bytes(bytes) % range)
    }
}

/// Time source.
///
/// Must be monotonically non-decreasing within one engine instance.
pub trait Clock {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Command-frame transmission and link-layer security.
///
/// The gateway owns framing: it turns a [`TxFrame`] into an on-air
/// frame (applying the frame counter and MIC when a key is attached)
/// and checks the MIC of received secured frames under a key the
/// engine selects.
pub trait FrameGateway {
    /// Transport-specific error type.
    type Error: Debug;

    /// Secure (when `frame.key` is set) and transmit a command frame.
    fn transmit(&mut self, frame: TxFrame) -> Result<(), Self::Error>;

    /// Verify a received secured unicast frame under `key`.
    ///
    /// Returns `false` when the integrity code does not match.
    fn decrypt_verify_unicast(&mut self, frame: &RxFrame, key: &PairwiseKey) -> bool;
}

/// Reference MIC construction for gateways that secure frames in
/// software: AES-128 CBC-MAC over the source address, the frame
/// counter and the payload, truncated to [`MIC_LEN`] bytes.
///
/// Every gateway on a link must use the same construction; radios with
/// hardware CCM replace this wholesale.
pub fn frame_mic<A: Aes128>(
    cipher: &mut A,
    key: &PairwiseKey,
    src: &ExtendedAddr,
    frame_counter: u32,
    payload: &[u8],
) -> [u8; MIC_LEN] {
    let mut block = [0u8; PAIRWISE_KEY_LEN];
    block[..src.len()].copy_from_slice(src);
    block[src.len()..src.len() + 4].copy_from_slice(&frame_counter.to_le_bytes());
    cipher.encrypt(key, &mut block);

    for chunk in payload.chunks(PAIRWISE_KEY_LEN) {
        for (b, p) in block.iter_mut().zip(chunk) {
            *b ^= p;
        }
        cipher.encrypt(key, &mut block);
    }

    let mut mic = [0u8; MIC_LEN];
    mic.copy_from_slice(&block[..MIC_LEN]);
    mic
}

#[cfg(feature = "soft-aes")]
mod soft {
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};

    use crate::types::PAIRWISE_KEY_LEN;

    /// Software AES-128 backed by the RustCrypto `aes` crate.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SoftwareAes;

    impl super::Aes128 for SoftwareAes {
        fn encrypt(&mut self, key: &[u8; PAIRWISE_KEY_LEN], block: &mut [u8; PAIRWISE_KEY_LEN]) {
            let cipher = aes::Aes128::new(GenericArray::from_slice(key));
            let mut b = *GenericArray::from_slice(&block[..]);
            cipher.encrypt_block(&mut b);
            block.copy_from_slice(&b);
        }
    }
}

#[cfg(feature = "soft-aes")]
pub use soft::SoftwareAes;

#[cfg(any(test, feature = "test-impls"))]
pub mod test_impls {
    //! Deterministic trait implementations for unit testing.

    use alloc::vec::Vec;
    use core::cell::Cell;
    use core::convert::Infallible;

    use super::*;
    use crate::time::Duration;

    /// Mock clock; time is advanced by the test.
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, d: Duration) {
            self.current.set(self.current.get() + d);
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Timestamp {
            self.current.get()
        }
    }

    /// Deterministic random source (LCG, NOT cryptographically secure).
    pub struct MockCsprng {
        state: u64,
    }

    impl Default for MockCsprng {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockCsprng {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Csprng for MockCsprng {
        fn fill_bytes(&mut self, buf: &mut [u8]) {
            for chunk in buf.chunks_mut(8) {
                self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let bytes = self.state.to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
        }
    }

    /// Random source emitting one constant byte, for tests that pin
    /// challenge values.
    pub struct ConstCsprng {
        byte: u8,
    }

    impl ConstCsprng {
        pub fn new(byte: u8) -> Self {
            Self { byte }
        }
    }

    impl Csprng for ConstCsprng {
        fn fill_bytes(&mut self, buf: &mut [u8]) {
            buf.fill(self.byte);
        }
    }

    /// Deterministic keyed permutation standing in for AES-128.
    ///
    /// Same inputs give the same output and distinct keys diverge
    /// quickly, which is all the tests need.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct MockAes;

    impl Aes128 for MockAes {
        fn encrypt(&mut self, key: &[u8; PAIRWISE_KEY_LEN], block: &mut [u8; PAIRWISE_KEY_LEN]) {
            for round in 0..4 {
                for i in 0..PAIRWISE_KEY_LEN {
                    let k = key[(i + round) % PAIRWISE_KEY_LEN];
                    let next = block[(i + 1) % PAIRWISE_KEY_LEN];
                    block[i] = block[i]
                        .wrapping_add(k)
                        .rotate_left((i as u32 % 7) + 1)
                        ^ next;
                }
            }
        }
    }

    /// Mock gateway logging transmitted frames.
    ///
    /// `seal` converts a logged [`TxFrame`] into the [`RxFrame`] a peer
    /// would receive, assigning the per-device frame counter and MIC.
    pub struct MockGateway {
        tx_log: Vec<TxFrame>,
        frame_counter: u32,
        cipher: MockAes,
    }

    impl Default for MockGateway {
        fn default() -> Self {
            Self {
                tx_log: Vec::new(),
                frame_counter: 0,
                cipher: MockAes,
            }
        }
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Drain all transmitted frames.
        pub fn take_sent(&mut self) -> Vec<TxFrame> {
            core::mem::take(&mut self.tx_log)
        }

        /// Number of frames sitting in the log.
        pub fn sent_count(&self) -> usize {
            self.tx_log.len()
        }

        /// Turn a transmitted frame into the frame a receiver sees.
        pub fn seal(&mut self, frame: &TxFrame, src: ExtendedAddr) -> RxFrame {
            self.frame_counter += 1;
            let counter = self.frame_counter;
            let mic = match &frame.key {
                Some(key) => frame_mic(&mut self.cipher, key, &src, counter, &frame.payload),
                None => [0u8; MIC_LEN],
            };
            RxFrame {
                src,
                key_source: frame.security.as_ref().and_then(|s| s.key_source),
                frame_counter: counter,
                payload: frame.payload.clone(),
                mic,
            }
        }
    }

    impl FrameGateway for MockGateway {
        type Error = Infallible;

        fn transmit(&mut self, frame: TxFrame) -> Result<(), Self::Error> {
            self.tx_log.push(frame);
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
}

#[cfg(test)]
mod tests {
    use super::test_impls::{MockAes, MockCsprng};
    use super::*;

    #[test]
    fn gen_range_stays_in_bounds() {
        let mut rng = MockCsprng::with_seed(7);
        for _ in 0..100 {
            let v = rng.gen_range(10, 20);
            assert!((10..20).contains(&v));
        }
        assert_eq!(rng.gen_range(5, 5), 5);
    }

    #[test]
    fn mock_aes_is_deterministic_and_keyed() {
        let mut aes = MockAes;
        let mut a = [1u8; 16];
        let mut b = [1u8; 16];
        aes.encrypt(&[2u8; 16], &mut a);
        aes.encrypt(&[2u8; 16], &mut b);
        assert_eq!(a, b);

        let mut c = [1u8; 16];
        aes.encrypt(&[3u8; 16], &mut c);
        assert_ne!(a, c);
    }

    #[test]
    fn frame_mic_depends_on_every_input() {
        let mut aes = MockAes;
        let key = [9u8; 16];
        let src = [1u8; 8];
        let base = frame_mic(&mut aes, &key, &src, 1, b"payload");

        assert_ne!(base, frame_mic(&mut aes, &[8u8; 16], &src, 1, b"payload"));
        assert_ne!(base, frame_mic(&mut aes, &key, &[2u8; 8], 1, b"payload"));
        assert_ne!(base, frame_mic(&mut aes, &key, &src, 2, b"payload"));
        assert_ne!(base, frame_mic(&mut aes, &key, &src, 1, b"payloae"));
        assert_eq!(base, frame_mic(&mut aes, &key, &src, 1, b"payload"));
    }
}
