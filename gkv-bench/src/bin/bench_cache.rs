//! Dependency-free throughput bench for the admission/eviction cache:
//! fixed PRNG seed, pre-built keys/values so setup cost stays off the hot
//! path, and a direct call into the concrete type to avoid dynamic
//! dispatch.

use std::env;
use std::hint::black_box;
use std::time::{Duration, Instant};

use gkv_cache::{Cache, CacheConfig};

const DEFAULT_KEY_COUNT: usize = 1 << 16;
const DEFAULT_OP_COUNT: usize = 200_000;

struct BenchConfig {
    key_count: usize,
    key_mask: usize,
    op_count: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let requested_keys = parse_usize(args.next(), DEFAULT_KEY_COUNT);
        let op_count = parse_usize(args.next(), DEFAULT_OP_COUNT);
        let key_count = normalize_power_of_two(requested_keys);
        BenchConfig {
            key_count,
            key_mask: key_count - 1,
            op_count,
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

fn normalize_power_of_two(value: usize) -> usize {
    let value = value.max(1);
    if value.is_power_of_two() {
        value
    } else {
        value.next_power_of_two()
    }
}

/// Tiny deterministic PRNG, kept dependency-free so the bench stays
/// reproducible across runs without pulling in `rand`.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        XorShift64 { state: seed }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

#[tokio::main]
async fn main() {
    let cfg = BenchConfig::from_args();
    let cache: std::sync::Arc<Cache<Vec<u8>>> = Cache::new(CacheConfig {
        max_cost: (cfg.key_count as i64) * 2,
        num_counters: cfg.key_count * 10,
        ..CacheConfig::default()
    })
    .expect("bench cache config is valid");

    let keys: Vec<String> = (0..cfg.key_count).map(|i| format!("bench-key-{i}")).collect();
    let value = vec![0u8; 128];

    for key in &keys {
        cache.add(key, value.clone(), 1);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut rng = XorShift64::new(0x9E3779B97F4A7C15);
    let start = Instant::now();
    let mut hits = 0u64;
    for _ in 0..cfg.op_count {
        let idx = (rng.next() as usize) & cfg.key_mask;
        if black_box(cache.get(&keys[idx])).is_some() {
            hits += 1;
        }
    }
    let elapsed = start.elapsed();

    let ops_per_sec = cfg.op_count as f64 / elapsed.as_secs_f64();
    println!(
        "keys={} ops={} hits={} elapsed={:?} ops/sec={:.0}",
        cfg.key_count, cfg.op_count, hits, elapsed, ops_per_sec
    );

    cache.shutdown();
}
