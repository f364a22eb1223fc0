#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("payload of {0} bytes exceeds the 65535-byte frame limit")]
    FrameTooLarge(usize),
    #[error("frame decode error: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("call timed out")]
    Timeout,
    #[error("peer write channel overloaded, call dropped")]
    Overloaded,
}
