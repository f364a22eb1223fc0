//! TinyLFU admission combined with sampled-LFU eviction (§4.4): a single
//! mutex guards the frequency sketch and the admission index together,
//! which is the design's intentional contention hotspot (§5, §9) — the
//! get-side ring buffer batches access accounting so this lock sees far
//! fewer operations than raw read traffic.

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::sketch::CountMinSketch;

/// Up to this many existing entries are sampled per eviction-loop
/// iteration when room must be made for an incoming admission.
const SAMPLE_SIZE: usize = 5;

pub struct PolicyConfig {
    pub max_cost: i64,
    /// Recommended ~10x the expected item count (§6); sizes the sketch.
    pub num_counters: usize,
}

struct PolicyInner {
    sketch: CountMinSketch,
    increments: u64,
    reset_threshold: u64,
    costs: HashMap<u64, i64, RandomState>,
    used: i64,
    max_cost: i64,
}

pub struct Policy {
    inner: Mutex<PolicyInner>,
}

impl Policy {
    pub fn new(cfg: PolicyConfig) -> Self {
        let num_counters = cfg.num_counters.max(1);
        Policy {
            inner: Mutex::new(PolicyInner {
                sketch: CountMinSketch::new(num_counters),
                increments: 0,
                // Aging kicks in roughly every 10x the counter budget,
                // mirroring the sample-threshold sizing used for the
                // admission sketch itself.
                reset_threshold: (num_counters as u64) * 10,
                costs: HashMap::default(),
                used: 0,
                max_cost: cfg.max_cost,
            }),
        }
    }

    /// Attempts to admit `h` at `cost`. Returns the primary hashes of any
    /// entries evicted to make room, and whether `h` itself was admitted.
    pub fn add(&self, h: u64, cost: i64) -> (Vec<u64>, bool) {
        let mut inner = self.inner.lock();
        if cost > inner.max_cost {
            return (Vec::new(), false);
        }
        if inner.costs.contains_key(&h) {
            return (Vec::new(), false);
        }
        if inner.max_cost - inner.used - cost >= 0 {
            inner.costs.insert(h, cost);
            inner.used += cost;
            return (Vec::new(), true);
        }

        let incoming_freq = inner.sketch.estimate(h);
        let mut evicted = Vec::new();
        loop {
            let sample: Vec<(u64, i64)> = inner
                .costs
                .iter()
                .take(SAMPLE_SIZE)
                .map(|(k, v)| (*k, *v))
                .collect();
            if sample.is_empty() {
                // Nothing left to evict; can't make room.
                return (evicted, false);
            }

            let victim = sample
                .iter()
                .min_by_key(|(k, _)| inner.sketch.estimate(*k))
                .copied()
                .expect("sample is non-empty");
            let victim_freq = inner.sketch.estimate(victim.0);

            if victim_freq > incoming_freq {
                return (evicted, false);
            }

            inner.costs.remove(&victim.0);
            inner.used -= victim.1;
            evicted.push(victim.0);

            if inner.max_cost - inner.used - cost >= 0 {
                inner.costs.insert(h, cost);
                inner.used += cost;
                return (evicted, true);
            }
        }
    }

    pub fn del(&self, h: u64) {
        let mut inner = self.inner.lock();
        if let Some(cost) = inner.costs.remove(&h) {
            inner.used -= cost;
        }
    }

    pub fn contains(&self, h: u64) -> bool {
        self.inner.lock().costs.contains_key(&h)
    }

    /// Batch access accounting fed by the ring buffer pool (§4.5). Ages
    /// the sketch (halves every counter) once the increment count reaches
    /// the configured reset threshold.
    pub fn record_accesses(&self, hashes: &[u64]) {
        let mut inner = self.inner.lock();
        for &h in hashes {
            inner.sketch.increment(h);
            inner.increments += 1;
            if inner.increments >= inner.reset_threshold {
                inner.sketch.reset();
                inner.increments = 0;
            }
        }
    }

    pub fn used(&self) -> i64 {
        self.inner.lock().used
    }

    pub fn max_cost(&self) -> i64 {
        self.inner.lock().max_cost
    }

    pub fn estimate(&self, h: u64) -> u8 {
        self.inner.lock().sketch.estimate(h)
    }
}
