//! 256-way striped map from `primary` hash to value + secondary hash +
//! expiry (§4.3). Each shard is its own independently locked map so
//! concurrent callers touching different shards never contend.

use std::time::{SystemTime, UNIX_EPOCH};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

pub const SHARD_COUNT: usize = 256;

struct Entry<V> {
    secondary: u64,
    value: V,
    /// Unix-epoch seconds; 0 means "never expires".
    expires_at: u64,
}

impl<V> Entry<V> {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at == 0 || self.expires_at > now
    }
}

struct Shard<V> {
    map: Mutex<HashMap<u64, Entry<V>, RandomState>>,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Shard {
            map: Mutex::new(HashMap::default()),
        }
    }
}

pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// The sharded, TTL-aware value store. Generic over the stored value type
/// so the admission/eviction engine can host arbitrary `V`; the peer
/// boundary is the only place that fixes `V = ByteView`.
pub struct ShardedStore<V> {
    shards: Vec<Shard<V>>,
}

impl<V: Clone> ShardedStore<V> {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        shards.resize_with(SHARD_COUNT, Shard::default);
        ShardedStore { shards }
    }

    fn shard_for(&self, primary: u64) -> &Shard<V> {
        &self.shards[(primary & (SHARD_COUNT as u64 - 1)) as usize]
    }

    pub fn get(&self, primary: u64, secondary: u64) -> Option<V> {
        let shard = self.shard_for(primary);
        let map = shard.map.lock();
        let entry = map.get(&primary)?;
        if entry.secondary != secondary {
            return None;
        }
        if !entry.is_live(now_unix_secs()) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Inserts a new entry. Returns `false` (without overwriting) if the
    /// primary already maps to a live entry; a dead (expired) entry is
    /// silently overwritten. `expires_at` is unix-epoch seconds, 0 = never.
    pub fn add(&self, primary: u64, secondary: u64, value: V, expires_at: u64) -> bool {
        let shard = self.shard_for(primary);
        let mut map = shard.map.lock();
        let now = now_unix_secs();
        if let Some(existing) = map.get(&primary) {
            if existing.is_live(now) {
                return false;
            }
        }
        map.insert(
            primary,
            Entry {
                secondary,
                value,
                expires_at,
            },
        );
        true
    }

    /// `secondary = 0` matches any stored secondary (used when the policy
    /// evicts or expires by primary alone).
    pub fn del(&self, primary: u64, secondary: u64) -> (Option<V>, bool) {
        let shard = self.shard_for(primary);
        let mut map = shard.map.lock();
        let matches = match map.get(&primary) {
            Some(entry) => secondary == 0 || entry.secondary == secondary,
            None => false,
        };
        if !matches {
            return (None, false);
        }
        let removed = map.remove(&primary).map(|e| e.value);
        (removed, true)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.lock().len()).sum()
    }
}

impl<V: Clone> Default for ShardedStore<V> {
    fn default() -> Self {
        Self::new()
    }
}
