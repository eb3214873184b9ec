//! Rendezvous (highest-random-weight) hashing for the outbound client's
//! cluster load balancing (spec §4.6 "Load balancing"), ported from
//! `original_source/raster/util/RendezvousHash.cpp`.
//!
//! Each candidate node gets a stable hash from its name; a lookup key is
//! combined with every node's hash, scaled into `[0, 1)`, then raised to
//! `1/weight` so heavier nodes win more often without needing a
//! consistent-hash ring. Adding or removing one node only reshuffles that
//! node's share of keys, not the whole mapping.

struct Node {
    name: String,
    hash: u64,
    weight: u64,
}

pub struct RendezvousHash {
    nodes: Vec<Node>,
}

impl RendezvousHash {
    pub fn new() -> RendezvousHash {
        RendezvousHash { nodes: Vec::new() }
    }

    /// Replaces the node set. `weight` of 0 is valid — such a node only
    /// scores above 0 when every node in the set has weight 0.
    pub fn build(&mut self, nodes: Vec<(String, u64)>) {
        self.nodes = nodes
            .into_iter()
            .map(|(name, weight)| {
                let hash = fnv1a_hash(name.as_bytes());
                Node { name, hash, weight }
            })
            .collect();
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the name of the node ranked `rank` (0 = highest score) for
    /// `key`. `rank` wraps modulo the node count, so callers can always
    /// ask for a fallback without checking bounds first.
    pub fn get(&self, key: u64, rank: usize) -> Option<&str> {
        if self.nodes.is_empty() {
            return None;
        }
        let mod_rank = rank % self.nodes.len();

        let mut scored: Vec<(f64, usize)> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (score(node, key), i))
            .collect();

        scored.select_nth_unstable_by(mod_rank, |a, b| {
            b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
        });

        let (_, idx) = scored[mod_rank];
        Some(&self.nodes[idx].name)
    }
}

impl Default for RendezvousHash {
    fn default() -> RendezvousHash {
        RendezvousHash::new()
    }
}

fn score(node: &Node, key: u64) -> f64 {
    let combined = combine_hash(node.hash.wrapping_add(key));
    let scaled_hash = combined as f64 / u64::MAX as f64;
    if node.weight == 0 {
        0.0
    } else {
        scaled_hash.powf(1.0 / node.weight as f64)
    }
}

fn fnv1a_hash(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Google's `twang_mix64` bit-mixing function, used to combine a node's
/// name hash with the lookup key into a single well-distributed value.
fn combine_hash(mut key: u64) -> u64 {
    key = (!key).wrapping_add(key << 21);
    key ^= key >> 24;
    key = key.wrapping_add(key << 3).wrapping_add(key << 8);
    key ^= key >> 14;
    key = key.wrapping_add(key << 2).wrapping_add(key << 4);
    key ^= key >> 28;
    key = key.wrapping_add(key << 31);
    key
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stable_under_node_removal() {
        let mut full = RendezvousHash::new();
        full.build(vec![
            ("a".into(), 1),
            ("b".into(), 1),
            ("c".into(), 1),
            ("d".into(), 1),
        ]);

        let mut without_c = RendezvousHash::new();
        without_c.build(vec![("a".into(), 1), ("b".into(), 1), ("d".into(), 1)]);

        let mut reassigned = 0;
        for key in 0..2000u64 {
            let before = full.get(key, 0).unwrap();
            if before == "c" {
                continue;
            }
            let after = without_c.get(key, 0).unwrap();
            if before != after {
                reassigned += 1;
            }
        }
        assert_eq!(reassigned, 0);
    }

    #[test]
    fn zero_weight_only_picked_when_all_zero() {
        let mut hash = RendezvousHash::new();
        hash.build(vec![("a".into(), 0), ("b".into(), 1)]);
        for key in 0..100u64 {
            assert_eq!(hash.get(key, 0), Some("b"));
        }

        let mut all_zero = RendezvousHash::new();
        all_zero.build(vec![("a".into(), 0), ("b".into(), 0)]);
        assert!(all_zero.get(42, 0).is_some());
    }

    #[test]
    fn rank_wraps_modulo_node_count() {
        let mut hash = RendezvousHash::new();
        hash.build(vec![("a".into(), 1), ("b".into(), 1)]);
        assert_eq!(hash.get(7, 0), hash.get(7, 2));
    }
}
