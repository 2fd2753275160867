//! Secret schemes: the policy that turns a peer identity into the
//! long-term secret under which pairwise keys are derived.
//!
//! The two lookups are split by handshake role because some
//! provisioning schemes treat the roles asymmetrically; the provided
//! schemes answer both the same way. Returning `None` cleanly aborts
//! the handshake with that peer.

use hashbrown::HashMap;

use crate::types::{NeighborIds, SharedSecret, ShortAddr};

/// Capability object supplying long-term secrets.
pub trait SecretScheme {
    /// One-time setup at bootstrap.
    fn init(&mut self) {}

    /// Secret for a peer we heard a HELLO from, about to be answered
    /// with a HELLOACK.
    fn secret_with_hello_sender(&self, ids: &NeighborIds) -> Option<SharedSecret>;

    /// Secret for a peer whose HELLOACK we are about to verify and
    /// answer with an ACK.
    fn secret_with_helloack_sender(&self, ids: &NeighborIds) -> Option<SharedSecret>;
}

/// One network-wide secret shared by every node.
#[derive(Clone, Copy, Debug)]
pub struct PlainScheme {
    secret: SharedSecret,
}

impl PlainScheme {
    /// Scheme answering every lookup with `secret`.
    pub fn new(secret: SharedSecret) -> Self {
        Self { secret }
    }
}

impl SecretScheme for PlainScheme {
    fn secret_with_hello_sender(&self, _ids: &NeighborIds) -> Option<SharedSecret> {
        Some(self.secret)
    }

    fn secret_with_helloack_sender(&self, _ids: &NeighborIds) -> Option<SharedSecret> {
        Some(self.secret)
    }
}

/// Pre-shared per-pair secrets, indexed by the peer's short address.
///
/// Peers without an entry are refused; this is how a deployment pins
/// exactly which pairings may form.
#[derive(Clone, Debug, Default)]
pub struct PairingScheme {
    pairs: HashMap<ShortAddr, SharedSecret>,
}

impl PairingScheme {
    /// Empty scheme refusing everyone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision the secret shared with one peer.
    pub fn insert(&mut self, peer: ShortAddr, secret: SharedSecret) {
        self.pairs.insert(peer, secret);
    }

    /// Number of provisioned pairings.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no pairing is provisioned.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl SecretScheme for PairingScheme {
    fn secret_with_hello_sender(&self, ids: &NeighborIds) -> Option<SharedSecret> {
        self.pairs.get(&ids.short).copied()
    }

    fn secret_with_helloack_sender(&self, ids: &NeighborIds) -> Option<SharedSecret> {
        self.pairs.get(&ids.short).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(short: ShortAddr) -> NeighborIds {
        NeighborIds::new([short as u8; 8], short)
    }

    #[test]
    fn plain_answers_everyone() {
        let scheme = PlainScheme::new([0x42; 16]);
        assert_eq!(scheme.secret_with_hello_sender(&ids(1)), Some([0x42; 16]));
        assert_eq!(scheme.secret_with_helloack_sender(&ids(999)), Some([0x42; 16]));
    }

    #[test]
    fn pairing_refuses_unknown_peers() {
        let mut scheme = PairingScheme::new();
        scheme.insert(7, [1; 16]);
        scheme.insert(8, [2; 16]);

        assert_eq!(scheme.secret_with_hello_sender(&ids(7)), Some([1; 16]));
        assert_eq!(scheme.secret_with_helloack_sender(&ids(8)), Some([2; 16]));
        assert_eq!(scheme.secret_with_hello_sender(&ids(9)), None);
        assert_eq!(scheme.secret_with_helloack_sender(&ids(9)), None);
    }

    #[test]
    fn pairing_roles_agree() {
        let mut scheme = PairingScheme::new();
        scheme.insert(3, [9; 16]);
        assert_eq!(
            scheme.secret_with_hello_sender(&ids(3)),
            scheme.secret_with_helloack_sender(&ids(3))
        );
    }
}
