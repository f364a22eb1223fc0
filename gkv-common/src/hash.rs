//! `hash(key) -> (primary, secondary)`.
//!
//! `primary` addresses the shard and indexes every internal map; `secondary`
//! rides along with the stored entry and is compared on lookup to catch
//! `primary` collisions. The two hashes come from independent algorithms so
//! a collision in one is very unlikely to coincide with a collision in the
//! other.
//!
//! Rust has no equivalent of a dynamically typed cache key, so "unsupported
//! key types fail fatally" becomes a compile-time property here: only types
//! that implement [`Hashable`] can be used as cache keys at all. Byte-like
//! keys go through both hash functions; integer-like keys skip hashing
//! entirely (`primary = value as u64`, `secondary = 0`).

use std::hash::Hasher;

use ahash::AHasher;
use xxhash_rust::xxh3::xxh3_64;

/// Hashes a byte string into the `(primary, secondary)` pair used
/// throughout the store, policy, and TTL index.
pub fn hash_bytes(bytes: &[u8]) -> (u64, u64) {
    let mut primary = AHasher::default();
    primary.write(bytes);
    (primary.finish(), xxh3_64(bytes))
}

pub trait Hashable {
    fn hash_pair(&self) -> (u64, u64);
}

impl Hashable for str {
    fn hash_pair(&self) -> (u64, u64) {
        hash_bytes(self.as_bytes())
    }
}

impl Hashable for String {
    fn hash_pair(&self) -> (u64, u64) {
        hash_bytes(self.as_bytes())
    }
}

impl Hashable for [u8] {
    fn hash_pair(&self) -> (u64, u64) {
        hash_bytes(self)
    }
}

impl Hashable for Vec<u8> {
    fn hash_pair(&self) -> (u64, u64) {
        hash_bytes(self)
    }
}

macro_rules! impl_hashable_for_integer {
    ($($t:ty),* $(,)?) => {
        $(
            impl Hashable for $t {
                fn hash_pair(&self) -> (u64, u64) {
                    (*self as u64, 0)
                }
            }
        )*
    };
}

impl_hashable_for_integer!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);
