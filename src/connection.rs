//! Connection manager
//!
//! Owns the single channel to the control plane. The channel is created on
//! the run task and closed on whichever task gets there first (run or
//! close), so all access goes through one lock. The lock is held only for
//! slot reads, assignment, and close — never across the dial itself.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::DiscoveryError;
use crate::transport::{Channel, Connector};

#[derive(Default)]
struct Slot {
    closed: bool,
    channel: Option<Arc<dyn Channel>>,
}

/// Exclusive owner of the channel resource.
pub struct ConnectionManager {
    slot: Mutex<Slot>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Dial the control plane and store the channel.
    ///
    /// A dial failure is a fatal configuration error. If the client was
    /// closed while the dial was in flight, the fresh channel is closed
    /// immediately instead of being stored, and `Closed` is returned.
    pub async fn dial(
        &self,
        connector: &dyn Connector,
        config: &ClientConfig,
    ) -> Result<Arc<dyn Channel>, DiscoveryError> {
        let channel = connector.dial(config).await.map_err(|e| {
            // Preserve the fatal taxonomy even if a connector reports
            // something else.
            DiscoveryError::Config(format!("Dial failed: {}", e))
        })?;

        let mut slot = self.slot.lock().await;
        if slot.closed {
            // close() won the race; don't leak the connection.
            warn!("Client closed during dial; discarding fresh channel");
            channel.close().await;
            return Err(DiscoveryError::Closed);
        }
        slot.channel = Some(Arc::clone(&channel));
        info!(endpoint = %config.endpoint, "Control-plane channel established");
        Ok(channel)
    }

    /// Close the stored channel exactly once and refuse future dials.
    /// Safe to call from any task, any number of times.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        slot.closed = true;
        if let Some(channel) = slot.channel.take() {
            channel.close().await;
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
