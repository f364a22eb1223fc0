//! Peer RPC transport (§4.11-§4.14): a length-prefixed framed codec, a
//! multiplexed per-peer client connection, a single-flighted client
//! connection pool, and a TCP server with a shared worker pool.

pub mod codec;
pub mod connection;
pub mod error;
pub mod pool;
pub mod server;

pub use codec::{FramedCodec, RequestBody, ResponseBody};
pub use connection::PeerConnection;
pub use error::TransportError;
pub use pool::ClientPool;
pub use server::{GetValueFn, GetValueFuture, PeerServer, ServerConfig};
