//! Consistent-hash ring with virtual nodes (§4.9). Rebuilt wholesale on
//! every membership change rather than mutated incrementally, so any two
//! nodes that agree on the member set compute byte-identical rings.

use std::collections::HashMap;

/// Default virtual nodes placed per real node, absent an override.
pub const DEFAULT_REPLICAS: usize = 256;

fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[derive(Clone)]
pub struct HashRing {
    replicas: usize,
    /// Sorted ascending; parallel to nothing else, looked up via binary
    /// search and cross-referenced against `by_hash`.
    ring: Vec<u32>,
    by_hash: HashMap<u32, String>,
}

impl HashRing {
    pub fn empty(replicas: usize) -> Self {
        HashRing {
            replicas,
            ring: Vec::new(),
            by_hash: HashMap::new(),
        }
    }

    /// Rebuilds the ring from scratch for the given real-node addresses.
    /// Each node contributes exactly `replicas` distinct virtual nodes;
    /// label collisions are resolved by re-salting until a free hash is
    /// found, so a node never silently ends up with fewer than `replicas`
    /// virtual nodes.
    pub fn init(addrs: &[String], replicas: usize) -> Self {
        let mut ring = Vec::with_capacity(addrs.len() * replicas);
        let mut by_hash = HashMap::with_capacity(addrs.len() * replicas);

        for addr in addrs {
            for i in 0..replicas {
                let mut salt = 0u32;
                loop {
                    let label = if salt == 0 {
                        format!("{i}:{addr}")
                    } else {
                        format!("{i}:{addr}:{salt}")
                    };
                    let h = crc32(label.as_bytes());
                    if !by_hash.contains_key(&h) {
                        by_hash.insert(h, addr.clone());
                        ring.push(h);
                        break;
                    }
                    salt += 1;
                }
            }
        }

        ring.sort_unstable();
        HashRing {
            replicas,
            ring,
            by_hash,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn virtual_node_count(&self) -> usize {
        self.ring.len()
    }

    /// Returns the real-node address owning `key`, or `None` if the ring
    /// has no members.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let h = crc32(key.as_bytes());
        let idx = match self.ring.binary_search(&h) {
            Ok(i) => i,
            Err(i) => {
                if i == self.ring.len() {
                    0
                } else {
                    i
                }
            }
        };
        self.by_hash.get(&self.ring[idx]).map(|s| s.as_str())
    }
}

impl Default for HashRing {
    fn default() -> Self {
        HashRing::empty(DEFAULT_REPLICAS)
    }
}
