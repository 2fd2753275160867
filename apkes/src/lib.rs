//! apkes - Adaptable pairwise key establishment for constrained
//! wireless link layers.
//!
//! Each node, on start-up, discovers its one-hop neighbors and derives
//! with each a unique symmetric pairwise key for subsequent secured
//! link-layer traffic, via a three-message handshake:
//!
//! - **HELLO** - broadcast, unauthenticated, carries a fresh challenge
//! - **HELLOACK** - secured unicast reply after a randomized delay,
//!   echoing the challenge and adding one of its own
//! - **ACK** - secured unicast under the freshly derived key
//!
//! Both sides end up with `AES_secret(challenge_a ‖ challenge_b)` as
//! the pairwise key. Admission of HELLO senders is bounded by a small
//! wait-timer pool, which doubles as flood protection.
//!
//! # Platform integration
//!
//! The engine is generic over a [`FrameGateway`], [`Clock`],
//! [`Csprng`], [`Aes128`] cipher and [`SecretScheme`]; implement those
//! for your radio stack and drive the engine from your scheduler:
//!
//! ```ignore
//! let mut engine: Engine<_, _, _, _, _, DefaultConfig> =
//!     Engine::new(gateway, clock, csprng, cipher, scheme, ids);
//! engine.bootstrap(|| defmt::info!("link layer ready"));
//!
//! loop {
//!     if let Some(frame) = radio.poll() {
//!         engine.on_command_frame(&frame);
//!     }
//!     if engine.next_wakeup().is_some_and(|t| clock.now() >= t) {
//!         engine.handle_timer(clock.now());
//!     }
//! }
//! ```
//!
//! # Module structure
//!
//! - [`types`] - constants, identities, frames, events, metrics
//! - [`time`] - millisecond [`Timestamp`]/[`Duration`] newtypes
//! - [`traits`] - platform traits and deterministic test impls
//! - [`config`] - compile-time timing and memory bounds
//! - [`wire`] - command-frame payload layouts
//! - [`neighbor`] - the fixed-capacity neighbor table
//! - [`scheme`] - secret schemes (plain and per-pair provisioning)
//! - [`engine`] - the handshake engine and bootstrap driver
//! - [`flash`] - non-volatile keying-material store

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod config;
pub mod engine;
pub mod flash;
pub mod neighbor;
pub mod scheme;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{DefaultConfig, DenseConfig, EngineConfig};
pub use engine::{Engine, BootstrapHook, KEYING_RECORD_LEN};
pub use flash::{FlashDevice, KeyingMaterialStore};
pub use neighbor::{Neighbor, NeighborHandle, NeighborTable, NeighborUpdate, UpdateTrailer};
pub use scheme::{PairingScheme, PlainScheme, SecretScheme};
pub use time::{Duration, Timestamp};
#[cfg(feature = "soft-aes")]
pub use traits::SoftwareAes;
pub use traits::{Aes128, Clock, Csprng, EventChannel, FrameGateway};
pub use types::{
    AntiReplayInfo, BroadcastKey, Challenge, DropReason, EngineMetrics, Event, ExtendedAddr,
    FrameDst, NeighborIds, NeighborStatus, PairwiseKey, RxFrame, SecurityHeader, SharedSecret,
    ShortAddr, TxFrame,
};

// Re-export constants
pub use types::{
    ACK_IDENTIFIER, BROADCAST_KEY_LEN, CHALLENGE_LEN, HELLOACK_IDENTIFIER, HELLO_IDENTIFIER,
    METADATA_LEN, PAIRWISE_KEY_LEN,
};
