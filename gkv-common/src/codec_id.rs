/// Identifies which wire encoder a cluster has agreed to use for peer RPC
/// payloads. Negotiated out of band (§6): every node in a cluster must be
/// configured with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecId {
    /// The hand-rolled length-prefixed binary layout (§4.11). The only
    /// encoder this workspace ships; kept as an explicit enum rather than
    /// a bare unit type so a cluster config can name its choice and a
    /// second encoder can be added later without breaking the wire
    /// contract of existing deployments.
    Binary,
}

impl Default for CodecId {
    fn default() -> Self {
        CodecId::Binary
    }
}
