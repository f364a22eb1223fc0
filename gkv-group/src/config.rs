//! Node configuration (§6, ambient): the settings a standalone node binary
//! needs to construct a [`crate::Group`] without a discovery service.
//! Deserialized via `serde`, preferring TOML for a config file on disk but
//! accepting JSON too. Absent a file, [`NodeConfig::default`] gives a node
//! ephemeral-loopback defaults suitable for tests and examples.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gkv_common::CodecId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config as TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse config as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config has neither a .toml nor a .json extension: {0}")]
    UnknownFormat(String),
}

/// Settings needed to construct a [`crate::Group`] directly, without an
/// external discovery service. Peer membership itself is still injected
/// separately via `register_peers` — this struct only carries the local
/// node's own identity and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Local address this node listens on for peer RPC traffic.
    pub listen_addr: String,
    /// Sizes the frequency sketch; recommended ~10x the expected item
    /// count (§6).
    pub num_counters: usize,
    /// Maximum aggregate admission cost.
    pub max_cost: i64,
    /// Wire codec every node in the cluster must agree on.
    pub codec_id: CodecId,
    /// Total deadline for one peer RPC, in milliseconds.
    pub peer_timeout_ms: u64,
    /// `tracing-subscriber`'s `EnvFilter` directive string.
    pub log_filter: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            num_counters: 1 << 16,
            max_cost: 1 << 20,
            codec_id: CodecId::Binary,
            peer_timeout_ms: 10_000,
            log_filter: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Loads from a `.toml` or `.json` file, chosen by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&raw)?),
            Some("json") => Ok(serde_json::from_str(&raw)?),
            other => Err(ConfigError::UnknownFormat(other.unwrap_or("").to_string())),
        }
    }

    /// Installs a `tracing-subscriber` global subscriber filtered by
    /// `log_filter`. Intended for a standalone node binary's `main`; a
    /// library embedding `Group` directly should configure its own
    /// subscriber instead.
    pub fn init_tracing(&self) {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_new(&self.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_ephemeral_loopback() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.listen_addr, "127.0.0.1:0");
        assert_eq!(cfg.codec_id, CodecId::Binary);
    }

    #[test]
    fn toml_round_trips_into_node_config() {
        let toml_src = r#"
            listen_addr = "127.0.0.1:7700"
            num_counters = 4096
            max_cost = 1000
            codec_id = "binary"
            peer_timeout_ms = 5000
            log_filter = "debug"
        "#;
        let cfg: NodeConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:7700");
        assert_eq!(cfg.max_cost, 1000);
        assert_eq!(cfg.peer_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults_for_missing_fields() {
        let cfg: NodeConfig = toml::from_str(r#"listen_addr = "127.0.0.1:9000""#).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
        assert_eq!(cfg.max_cost, NodeConfig::default().max_cost);
    }
}
