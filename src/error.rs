//! Error types for waypost

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Unrecoverable configuration error (bad endpoint, bad identity
    /// override). Dialing is non-blocking, so a dial failure reflects
    /// misconfiguration rather than transient network state.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Consumer rejected update: {0}")]
    Consumer(String),

    /// The client was closed; not a fault, just the end.
    #[error("Client closed")]
    Closed,
}

impl DiscoveryError {
    /// Fatal errors terminate `run()`; everything else ends one stream
    /// attempt and is retried with backoff.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiscoveryError::Config(_))
    }
}
