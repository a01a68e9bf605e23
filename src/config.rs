//! Configuration for the discovery client

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Client configuration
///
/// Immutable after construction; the client only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Control-plane endpoint URL (e.g. `ws://localhost:18000/discovery`)
    pub endpoint: String,

    /// Logical service whose assignments this client watches
    pub service_name: String,

    /// Whether the cluster phase must precede assignment data.
    /// When false, assignment responses are accepted immediately.
    #[serde(default = "default_true")]
    pub require_clusters: bool,

    /// Node identity metadata attached to cluster requests
    #[serde(default)]
    pub node_metadata: BTreeMap<String, String>,

    /// Identity-verification override applied before any network activity
    /// (sent as the Host header on the default WebSocket transport)
    #[serde(default)]
    pub server_name_override: Option<String>,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum retry delay in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_secs() -> u64 {
    120
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:18000".to_string(),
            service_name: String::new(),
            require_clusters: true,
            node_metadata: BTreeMap::new(),
            server_name_override: None,
            initial_backoff_ms: 100,
            max_backoff_secs: 120,
        }
    }
}

impl ClientConfig {
    /// Config for a named service at the given endpoint, defaults elsewhere.
    pub fn new(endpoint: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}
