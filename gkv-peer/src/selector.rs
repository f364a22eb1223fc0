//! Wraps the ring behind a read-write lock and translates ring ownership
//! into the local-vs-remote decision the `Group` façade needs (§4.10).

use parking_lot::RwLock;
use tracing::info;

use crate::error::PeerError;
use crate::ring::{HashRing, DEFAULT_REPLICAS};

pub struct PeerSelector {
    local_addr: String,
    replicas: usize,
    ring: RwLock<HashRing>,
}

impl PeerSelector {
    pub fn new(local_addr: impl Into<String>) -> Self {
        Self::with_replicas(local_addr, DEFAULT_REPLICAS)
    }

    pub fn with_replicas(local_addr: impl Into<String>, replicas: usize) -> Self {
        PeerSelector {
            local_addr: local_addr.into(),
            replicas,
            ring: RwLock::new(HashRing::empty(replicas)),
        }
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Re-initializes the ring for the full cluster membership, which
    /// must include this node's own address. Ring rebuilds are atomic
    /// with respect to `get_peer`: a concurrent reader observes either
    /// the full old ring or the full new one, never a partial rebuild.
    /// Rejects an empty membership list rather than silently leaving
    /// every lookup unresolvable.
    pub fn register_peers(&self, members: &[String]) -> Result<(), PeerError> {
        if members.is_empty() {
            return Err(PeerError::NoMembers);
        }
        let ring = HashRing::init(members, self.replicas);
        info!(members = members.len(), "peer ring rebuilt");
        *self.ring.write() = ring;
        Ok(())
    }

    /// Returns `None` when the owning node is the local node ("handle
    /// locally"), `Some(addr)` for a remote owner, and `None` when the
    /// ring has no members at all (nothing registered yet).
    pub fn get_peer(&self, key: &str) -> Option<String> {
        let ring = self.ring.read();
        match ring.get(key) {
            Some(addr) if addr == self.local_addr => None,
            Some(addr) => Some(addr.to_string()),
            None => None,
        }
    }
}
