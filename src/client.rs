//! Discovery client
//!
//! The lifecycle controller and session loop. `run()` dials once and then
//! drives stream attempts forever, backing off between failures; `close()`
//! is the only sanctioned way to stop it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::backoff::ExponentialBackoff;
use crate::codec::{MsgpackCodec, Resource, ResourceCodec};
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::DiscoveryError;
use crate::session::{self, cancelled};
use crate::transport::{Channel, Connector, WsConnector};

/// What the embedding process plugs into the client. A capability
/// interface rather than bare callbacks, so the client is testable with
/// recording implementations.
#[async_trait]
pub trait DiscoveryObserver: Send + Sync {
    /// Deliver a decoded resource update. An error ends the current stream
    /// attempt (and triggers a retry); it never crashes the loop.
    async fn on_update(
        &self,
        update: Resource,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Invoked once after every ended attempt, success or failure: the
    /// data downstream may now be stale.
    async fn on_lost_contact(&self) {}

    /// Invoked exactly once during `close()`.
    fn on_close(&self) {}
}

/// Resilient streaming discovery client.
///
/// `run()` never returns until the client is closed (or the initial dial
/// fails fatally), so it belongs on a dedicated task — see [`Self::spawn`].
pub struct DiscoveryClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn ResourceCodec>,
    observer: Arc<dyn DiscoveryObserver>,
    backoff: ExponentialBackoff,
    conn: ConnectionManager,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl DiscoveryClient {
    /// Build a client with explicit transport and codec seams.
    /// Non-blocking; nothing is dialed until `run()`.
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn ResourceCodec>,
        observer: Arc<dyn DiscoveryObserver>,
    ) -> Self {
        let backoff = ExponentialBackoff::new(config.initial_backoff(), config.max_backoff());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            connector,
            codec,
            observer,
            backoff,
            conn: ConnectionManager::new(),
            shutdown_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Build a client on the default WebSocket transport and msgpack codec.
    pub fn with_websocket(config: ClientConfig, observer: Arc<dyn DiscoveryObserver>) -> Self {
        Self::new(
            config,
            Arc::new(WsConnector),
            Arc::new(MsgpackCodec),
            observer,
        )
    }

    /// Spawn `run()` on its own task.
    pub fn spawn(self) -> (Arc<Self>, tokio::task::JoinHandle<Result<(), DiscoveryError>>) {
        let client = Arc::new(self);
        let runner = Arc::clone(&client);
        let handle = tokio::spawn(async move { runner.run().await });
        (client, handle)
    }

    /// Dial the control plane and drive the session loop until `close()`.
    ///
    /// Returns `Ok(())` once closed. A dial failure is a fatal
    /// configuration error and is the only error this method surfaces.
    pub async fn run(&self) -> Result<(), DiscoveryError> {
        let channel = match self.conn.dial(self.connector.as_ref(), &self.config).await {
            Ok(channel) => channel,
            Err(DiscoveryError::Closed) => return Ok(()),
            Err(e) => {
                error!(error = %e, "Cannot reach control plane; not retrying");
                return Err(e);
            }
        };

        self.session_loop(channel).await;
        Ok(())
    }

    /// Stop the client: signal shutdown, close the channel, run cleanup.
    /// Later calls are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing discovery client");
        let _ = self.shutdown_tx.send(true);
        self.conn.close().await;
        self.observer.on_close();
    }

    /// Repeated stream attempts with backoff between failed ones. Any
    /// attempt that dispatched at least one response resets the backoff
    /// pressure. Cancellation is the only exit.
    async fn session_loop(&self, channel: Arc<dyn Channel>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut retry_count: u32 = 0;
        let mut do_retry = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if do_retry {
                let delay = self.backoff.delay(retry_count);
                debug!(retry_count, delay_ms = delay.as_millis() as u64, "Waiting before next attempt");
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancelled(&mut shutdown) => break,
                }
                retry_count += 1;
            }

            let outcome = session::run_attempt(
                channel.as_ref(),
                &self.config,
                self.codec.as_ref(),
                self.observer.as_ref(),
                &mut shutdown,
            )
            .await;

            if outcome.received_any {
                retry_count = 0;
                do_retry = false;
            } else {
                do_retry = true;
            }

            info!(
                reason = ?outcome.reason,
                received_any = outcome.received_any,
                "Stream attempt ended"
            );
            self.observer.on_lost_contact().await;
        }

        info!("Discovery session loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullObserver;

    #[async_trait]
    impl DiscoveryObserver for NullObserver {
        async fn on_update(
            &self,
            _update: Resource,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_after_close_returns_immediately() {
        let client = DiscoveryClient::with_websocket(
            ClientConfig::new("ws://localhost:18000", "checkout"),
            Arc::new(NullObserver),
        );
        client.close().await;
        assert!(client.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_fatal_dial_error_surfaces() {
        let client = DiscoveryClient::with_websocket(
            ClientConfig::new("not-a-url", "checkout"),
            Arc::new(NullObserver),
        );
        let err = client.run().await.unwrap_err();
        assert!(err.is_fatal());
    }
}
