//! The façade's public error type: wraps each subsystem's own error enum
//! behind `#[from]` conversions (§7) rather than collapsing everything
//! into one crate-spanning type. Binaries convert this to `anyhow::Error`
//! at their outermost boundary only.

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("key not found")]
    NotFound,
    #[error(transparent)]
    Transport(#[from] gkv_transport::TransportError),
    #[error(transparent)]
    Cache(#[from] gkv_cache::CacheError),
    #[error("loader failed: {0}")]
    Loader(String),
}
