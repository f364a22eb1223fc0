//! The `Group` façade (§4.15): composes the admission/eviction cache, the
//! consistent-hash peer selector, single-flight deduplication, and the
//! peer RPC transport into the node-level lookup algorithm. This crate is
//! a thin composition layer — the hard engineering lives in the four
//! crates it wires together.

pub mod config;
pub mod error;
pub mod group;

pub use config::{ConfigError, NodeConfig};
pub use error::GroupError;
pub use group::{Group, LoaderFn, LoaderFuture};
