#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer ring has no registered members")]
    NoMembers,
}
