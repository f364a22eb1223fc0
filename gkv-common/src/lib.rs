//! Shared types for the group cache: the byte-view value wrapper, the
//! primary/secondary hashing scheme, and the wire-level codec identifier.
//! Kept dependency-light since every other crate in the workspace pulls
//! this one in.

pub mod byteview;
pub mod codec_id;
pub mod hash;

pub use byteview::ByteView;
pub use codec_id::CodecId;
pub use hash::{hash_bytes, Hashable};
