//! Time-bucketed index of keys with expirations, so cleanup is a single
//! bucket removal rather than a full scan of the store (§4.7 / §3).

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::policy::Policy;
use crate::store::ShardedStore;

/// Bucket width in seconds. Small and constant so cleanup sweeps stay cheap.
pub const BUCKET_WIDTH_SECS: u64 = 5;

pub struct TtlBuckets {
    buckets: Mutex<HashMap<u64, Vec<(u64, u64)>>>,
}

impl TtlBuckets {
    pub fn new() -> Self {
        TtlBuckets {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_id(expires_at: u64) -> u64 {
        expires_at / BUCKET_WIDTH_SECS + 1
    }

    /// A zero expiration means "never expires" and is not tracked here.
    pub fn add(&self, primary: u64, secondary: u64, expires_at: u64) {
        if expires_at == 0 {
            return;
        }
        let id = Self::bucket_id(expires_at);
        self.buckets
            .lock()
            .entry(id)
            .or_default()
            .push((primary, secondary));
    }

    /// Removes the bucket that is guaranteed to be fully expired by now —
    /// one bucket-width behind `now`'s own bucket — and deletes every key
    /// it listed from both the store and the policy. The one-bucket
    /// offset (relative to `add`'s `+1`) is a two-bucket safety margin:
    /// an entry can never be cleaned before it has actually expired.
    pub fn clean<V: Clone>(&self, store: &ShardedStore<V>, policy: &Policy, now_unix_secs: u64) {
        let id = now_unix_secs / BUCKET_WIDTH_SECS;
        let id = id.saturating_sub(1);
        let expired = self.buckets.lock().remove(&id);
        let Some(expired) = expired else { return };
        for (primary, secondary) in expired {
            store.del(primary, secondary);
            policy.del(primary);
        }
    }

    pub fn bucket_len(&self, expires_at: u64) -> usize {
        self.buckets
            .lock()
            .get(&Self::bucket_id(expires_at))
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for TtlBuckets {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyConfig;

    #[test]
    fn add_ignores_zero_expiration() {
        let ttl = TtlBuckets::new();
        ttl.add(1, 2, 0);
        assert_eq!(ttl.bucket_len(0), 0);
    }

    #[test]
    fn add_places_key_in_the_expected_bucket() {
        let ttl = TtlBuckets::new();
        let expires_at = 100;
        ttl.add(1, 2, expires_at);
        assert_eq!(ttl.bucket_len(expires_at), 1);
    }

    #[test]
    fn clean_removes_keys_from_store_and_policy() {
        let ttl = TtlBuckets::new();
        let store: ShardedStore<&'static str> = ShardedStore::new();
        let policy = Policy::new(PolicyConfig {
            max_cost: 100,
            num_counters: 16,
        });

        store.add(1, 2, "value", 50);
        policy.add(1, 1);
        ttl.add(1, 2, 50);

        // bucket id for expires_at=50 is 50/5 + 1 = 11; it becomes
        // cleanable once now/5 - 1 >= 11, i.e. now >= 60.
        ttl.clean(&store, &policy, 59);
        assert_eq!(store.get(1, 2), Some("value"), "not yet cleanable");

        ttl.clean(&store, &policy, 60);
        assert_eq!(store.get(1, 2), None);
        assert!(!policy.contains(1));
    }
}
