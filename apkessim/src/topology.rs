//! Radio topology and link properties.

use apkes::{Duration, ShortAddr};
use hashbrown::HashMap;

/// Properties of a bidirectional link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Packet loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation plus processing delay.
    pub delay: Duration,
    /// Whether the link currently carries frames.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            active: true,
        }
    }
}

impl Link {
    /// Link with default properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loss rate.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Connectivity between simulated nodes.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Links keyed by canonical (lower, higher) address pairs.
    links: HashMap<(ShortAddr, ShortAddr), Link>,
}

impl Topology {
    /// Empty topology; nothing hears anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node hears every other node.
    pub fn fully_connected(nodes: &[ShortAddr]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// First node is the hub; the rest only hear the hub.
    pub fn star(nodes: &[ShortAddr]) -> Self {
        let mut topo = Self::new();
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    fn canonical(a: ShortAddr, b: ShortAddr) -> (ShortAddr, ShortAddr) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Add (or replace) a bidirectional link.
    pub fn add_link(&mut self, a: ShortAddr, b: ShortAddr, link: Link) {
        self.links.insert(Self::canonical(a, b), link);
    }

    /// Get a link.
    pub fn get_link(&self, a: ShortAddr, b: ShortAddr) -> Option<&Link> {
        self.links.get(&Self::canonical(a, b))
    }

    /// Get a link mutably.
    pub fn get_link_mut(&mut self, a: ShortAddr, b: ShortAddr) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical(a, b))
    }

    /// All nodes linked to `node`, active or not.
    pub fn neighbors(&self, node: ShortAddr) -> Vec<ShortAddr> {
        let mut result: Vec<ShortAddr> = self
            .links
            .keys()
            .filter_map(|&(a, b)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        // Deterministic routing order regardless of hash state.
        result.sort_unstable();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_connected_links_all_pairs() {
        let topo = Topology::fully_connected(&[1, 2, 3]);
        assert_eq!(topo.neighbors(1), vec![2, 3]);
        assert_eq!(topo.neighbors(2), vec![1, 3]);
        assert!(topo.get_link(1, 3).is_some());
        assert!(topo.get_link(3, 1).is_some());
    }

    #[test]
    fn star_isolates_spokes() {
        let topo = Topology::star(&[10, 1, 2, 3]);
        assert_eq!(topo.neighbors(10), vec![1, 2, 3]);
        assert_eq!(topo.neighbors(1), vec![10]);
        assert!(topo.get_link(1, 2).is_none());
    }

    #[test]
    fn links_are_bidirectional() {
        let mut topo = Topology::new();
        topo.add_link(5, 4, Link::default().with_loss_rate(0.5));
        assert_eq!(topo.get_link(4, 5).unwrap().loss_rate, 0.5);
        topo.get_link_mut(5, 4).unwrap().active = false;
        assert!(!topo.get_link(4, 5).unwrap().active);
    }
}
