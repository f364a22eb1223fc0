//! Coordinator (§4.6): wires the store, the admission/eviction policy, the
//! TTL bucket index, and the ring buffer pool behind a small async API.
//! Writes land on a bounded ingest channel and are applied by a dedicated
//! worker task; a periodic ticker drives TTL cleanup. Both are
//! process-lifetime background tasks, running for as long as the cache
//! itself does.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use gkv_common::Hashable;

use crate::buffer::RingBufferPool;
use crate::error::CacheError;
use crate::policy::{Policy, PolicyConfig};
use crate::store::{now_unix_secs, ShardedStore};
use crate::ttl::{TtlBuckets, BUCKET_WIDTH_SECS};

/// Default capacity of the ingest channel (§4.6): large enough to absorb
/// write bursts, small enough that a stalled ingest worker becomes visible
/// as dropped writes rather than unbounded memory growth.
pub const DEFAULT_INGEST_CAPACITY: usize = 32_768;

pub struct CacheConfig {
    /// Maximum aggregate cost the policy will admit.
    pub max_cost: i64,
    /// Sizes the frequency sketch; recommended ~10x the expected item
    /// count (§6).
    pub num_counters: usize,
    pub ingest_capacity: usize,
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_cost: 1 << 20,
            num_counters: 1 << 16,
            ingest_capacity: DEFAULT_INGEST_CAPACITY,
            cleanup_interval: Duration::from_secs(BUCKET_WIDTH_SECS),
        }
    }
}

struct IngestItem<V> {
    primary: u64,
    secondary: u64,
    value: V,
    cost: i64,
    expires_at: u64,
}

/// The admission/eviction cache engine, generic over a stored value type.
/// `cost_fn` assigns an admission weight to each value; the peer boundary
/// is the only place that fixes `V = ByteView` and derives cost from byte
/// length (§9, "type-erased values").
pub struct Cache<V> {
    store: Arc<ShardedStore<V>>,
    policy: Arc<Policy>,
    ttl: Arc<TtlBuckets>,
    buffer_pool: Arc<RingBufferPool>,
    ingest_tx: mpsc::Sender<IngestItem<V>>,
    tasks: CacheTasks,
}

struct CacheTasks {
    ingest: JoinHandle<()>,
    batch: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Rejects a non-positive `max_cost` or a zero `num_counters` up
    /// front — either would make the admission policy unable to admit
    /// anything or size its frequency sketch at all.
    pub fn new(cfg: CacheConfig) -> Result<Arc<Self>, CacheError> {
        if cfg.max_cost <= 0 {
            return Err(CacheError::InvalidConfig(format!(
                "max_cost must be positive, got {}",
                cfg.max_cost
            )));
        }
        if cfg.num_counters == 0 {
            return Err(CacheError::InvalidConfig("num_counters must be nonzero".to_string()));
        }

        let store = Arc::new(ShardedStore::new());
        let policy = Arc::new(Policy::new(PolicyConfig {
            max_cost: cfg.max_cost,
            num_counters: cfg.num_counters,
        }));
        let ttl = Arc::new(TtlBuckets::new());
        let (buffer_pool, mut batch_rx) = RingBufferPool::new();
        let buffer_pool = Arc::new(buffer_pool);
        let (ingest_tx, mut ingest_rx) = mpsc::channel::<IngestItem<V>>(cfg.ingest_capacity);

        let ingest_task = {
            let store = store.clone();
            let policy = policy.clone();
            let ttl = ttl.clone();
            tokio::spawn(async move {
                while let Some(item) = ingest_rx.recv().await {
                    let (evicted, admitted) = policy.add(item.primary, item.cost);
                    for victim in evicted {
                        store.del(victim, 0);
                    }
                    if admitted {
                        store.add(item.primary, item.secondary, item.value, item.expires_at);
                        if item.expires_at > 0 {
                            ttl.add(item.primary, item.secondary, item.expires_at);
                        }
                        trace!(primary = item.primary, "ingest admitted entry");
                    } else {
                        debug!(primary = item.primary, "ingest rejected entry by policy");
                    }
                }
            })
        };

        let batch_task = {
            let policy = policy.clone();
            tokio::spawn(async move {
                while let Some(batch) = batch_rx.recv().await {
                    policy.record_accesses(&batch);
                }
            })
        };

        let cleanup_task = {
            let store = store.clone();
            let policy = policy.clone();
            let ttl = ttl.clone();
            let interval = cfg.cleanup_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    ttl.clean(&store, &policy, now_unix_secs());
                }
            })
        };

        Ok(Arc::new(Cache {
            store,
            policy,
            ttl,
            buffer_pool,
            ingest_tx,
            tasks: CacheTasks {
                ingest: ingest_task,
                batch: batch_task,
                cleanup: cleanup_task,
            },
        }))
    }

    /// Computes `(primary, secondary)` for `key`, records the read for
    /// frequency accounting (hit or miss alike), and consults the store.
    pub fn get(&self, key: &(impl Hashable + ?Sized)) -> Option<V> {
        let (primary, secondary) = key.hash_pair();
        self.buffer_pool.push(primary);
        self.store.get(primary, secondary)
    }

    pub fn add(&self, key: &(impl Hashable + ?Sized), value: V, cost: i64) -> bool {
        self.add_with_ttl(key, value, cost, Duration::ZERO)
    }

    /// Enqueues the write on the ingest channel. `ttl == Duration::ZERO`
    /// means never expires. A full channel drops the write and returns
    /// `false` — the cache is best-effort under overload (§9).
    pub fn add_with_ttl(&self, key: &(impl Hashable + ?Sized), value: V, cost: i64, ttl: Duration) -> bool {
        if cost <= 0 {
            return false;
        }
        let (primary, secondary) = key.hash_pair();
        let expires_at = if ttl.is_zero() {
            0
        } else {
            now_unix_secs() + ttl.as_secs().max(1)
        };
        let item = IngestItem {
            primary,
            secondary,
            value,
            cost,
            expires_at,
        };
        match self.ingest_tx.try_send(item) {
            Ok(()) => true,
            Err(_) => {
                warn!("ingest channel full, dropping write");
                false
            }
        }
    }

    pub fn used_cost(&self) -> i64 {
        self.policy.used()
    }

    pub fn max_cost(&self) -> i64 {
        self.policy.max_cost()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Stops the background ingest/batch/cleanup tasks. Not needed in
    /// normal operation — the cache is meant to live for the process —
    /// but useful for deterministic test teardown.
    pub fn shutdown(&self) {
        self.tasks.ingest.abort();
        self.tasks.batch.abort();
        self.tasks.cleanup.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn small_cache() -> Arc<Cache<String>> {
        Cache::new(CacheConfig {
            max_cost: 1024,
            num_counters: 256,
            ingest_capacity: 64,
            cleanup_interval: StdDuration::from_millis(50),
        })
        .unwrap()
    }

    #[test]
    fn rejects_non_positive_max_cost() {
        let err = Cache::<String>::new(CacheConfig {
            max_cost: 0,
            ..CacheConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_num_counters() {
        let err = Cache::<String>::new(CacheConfig {
            num_counters: 0,
            ..CacheConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn local_hit_after_ingest_drains() {
        let cache = small_cache();
        assert!(cache.add("ayang", "ayangValue".to_string(), 10));
        // Give the ingest worker a chance to drain the channel.
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(cache.get("ayang"), Some("ayangValue".to_string()));
        cache.shutdown();
    }

    #[tokio::test]
    async fn ttl_expiry_removes_from_store() {
        // TTL bucketing keys off real unix-epoch seconds (needed so the
        // bucket math stays meaningful across process boundaries), so
        // this test cannot use tokio's virtual clock and genuinely waits
        // out a couple of bucket widths.
        let cache = small_cache();
        assert!(cache.add_with_ttl("k", "v".to_string(), 1, StdDuration::from_secs(1)));
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(cache.get("k"), Some("v".to_string()));

        tokio::time::sleep(StdDuration::from_secs(BUCKET_WIDTH_SECS * 3)).await;
        assert_eq!(cache.get("k"), None);
        cache.shutdown();
    }

    #[tokio::test]
    async fn zero_cost_write_is_rejected_synchronously() {
        let cache = small_cache();
        assert!(!cache.add("k", "v".to_string(), 0));
        cache.shutdown();
    }
}
