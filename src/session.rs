//! Stream session
//!
//! Drives one attempt of the bidirectional discovery stream: open the
//! stream, send the request pair, then receive and validate responses until
//! something ends the attempt. Every wait is raced against the shutdown
//! signal. No state survives into the next attempt.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::DiscoveryObserver;
use crate::codec::{Resource, ResourceCodec};
use crate::config::ClientConfig;
use crate::request::{assignment_request, cluster_request};
use crate::transport::Channel;
use crate::wire::ResourceKind;

/// Handshake phase within one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Cluster data must arrive before any assignment is acceptable.
    AwaitingClusters,
    /// Assignments are acceptable.
    Ready,
}

/// Why a stream attempt ended. All reasons except `Cancelled` trigger a
/// fresh attempt after backoff; none of them escapes the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    TransportError,
    EmptyResponse,
    UnexpectedKind,
    DecodeError,
    PhaseViolation,
    ConsumerError,
    Cancelled,
}

/// What one attempt reports back to the session loop.
#[derive(Debug, Clone, Copy)]
pub struct AttemptOutcome {
    /// Whether at least one response was validated and dispatched.
    /// Resets the loop's backoff pressure.
    pub received_any: bool,
    pub reason: EndReason,
}

/// Resolve once the shutdown signal flips to `true` (or the sender is
/// gone, which only happens when the client itself is dropped).
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Run one stream attempt over the channel.
pub(crate) async fn run_attempt(
    channel: &dyn Channel,
    config: &ClientConfig,
    codec: &dyn ResourceCodec,
    observer: &dyn DiscoveryObserver,
    shutdown: &mut watch::Receiver<bool>,
) -> AttemptOutcome {
    let mut outcome = AttemptOutcome {
        received_any: false,
        reason: EndReason::TransportError,
    };

    let mut stream = tokio::select! {
        result = channel.open_stream() => match result {
            Ok(stream) => stream,
            Err(e) => {
                info!(error = %e, "Failed to open discovery stream");
                return outcome;
            }
        },
        _ = cancelled(shutdown) => {
            outcome.reason = EndReason::Cancelled;
            return outcome;
        }
    };

    if config.require_clusters {
        let request = cluster_request(config);
        let sent = tokio::select! {
            result = stream.send(&request) => result,
            _ = cancelled(shutdown) => {
                outcome.reason = EndReason::Cancelled;
                return outcome;
            }
        };
        if let Err(e) = sent {
            info!(error = %e, "Failed to send cluster request");
            return outcome;
        }
    }

    let request = assignment_request(config);
    let sent = tokio::select! {
        result = stream.send(&request) => result,
        _ = cancelled(shutdown) => {
            outcome.reason = EndReason::Cancelled;
            return outcome;
        }
    };
    if let Err(e) = sent {
        info!(error = %e, "Failed to send assignment request");
        return outcome;
    }

    let mut phase = if config.require_clusters {
        Phase::AwaitingClusters
    } else {
        Phase::Ready
    };

    loop {
        let response = tokio::select! {
            result = stream.recv() => match result {
                Ok(Some(response)) => response,
                Ok(None) => {
                    debug!("Discovery stream closed by peer");
                    return outcome;
                }
                Err(e) => {
                    info!(error = %e, "Discovery stream error");
                    return outcome;
                }
            },
            _ = cancelled(shutdown) => {
                outcome.reason = EndReason::Cancelled;
                return outcome;
            }
        };

        if response.resources.is_empty() {
            // Server misbehavior; start a fresh attempt.
            warn!("Discovery response contains no resource payloads");
            outcome.reason = EndReason::EmptyResponse;
            return outcome;
        }

        if response.kind == ResourceKind::Cluster && !config.require_clusters {
            warn!("Received cluster response in assignment-only mode");
            outcome.reason = EndReason::UnexpectedKind;
            return outcome;
        }

        let resource = match codec.decode_first(&response) {
            Ok(resource) => resource,
            Err(e) => {
                warn!(error = %e, "Failed to decode resource payload");
                outcome.reason = EndReason::DecodeError;
                return outcome;
            }
        };

        match &resource {
            Resource::Cluster(_) => {
                // Cluster data satisfies the phase whatever it was.
                phase = Phase::Ready;
            }
            Resource::Assignment(_) if phase == Phase::AwaitingClusters => {
                warn!("Expecting cluster data, got assignment");
                outcome.reason = EndReason::PhaseViolation;
                return outcome;
            }
            Resource::Assignment(_) => {}
        }

        if let Err(e) = observer.on_update(resource).await {
            warn!(error = %e, "Consumer rejected update");
            outcome.reason = EndReason::ConsumerError;
            return outcome;
        }

        outcome.received_any = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::codec::{AssignmentUpdate, ClusterUpdate, Endpoint, MsgpackCodec};
    use crate::error::DiscoveryError;
    use crate::transport::DiscoveryStream;
    use crate::wire::{DiscoveryRequest, DiscoveryResponse};

    struct ScriptedStream {
        responses: VecDeque<DiscoveryResponse>,
        sent: Arc<Mutex<Vec<DiscoveryRequest>>>,
        fail_send_on: Option<ResourceKind>,
        hang_after_script: bool,
    }

    #[async_trait]
    impl DiscoveryStream for ScriptedStream {
        async fn send(&mut self, request: &DiscoveryRequest) -> Result<(), DiscoveryError> {
            if self.fail_send_on == Some(request.kind) {
                return Err(DiscoveryError::Transport("send failed".into()));
            }
            self.sent.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<DiscoveryResponse>, DiscoveryError> {
            match self.responses.pop_front() {
                Some(response) => Ok(Some(response)),
                None if self.hang_after_script => std::future::pending().await,
                None => Ok(None),
            }
        }
    }

    struct ScriptedChannel {
        stream: Mutex<Option<ScriptedStream>>,
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        async fn open_stream(&self) -> Result<Box<dyn DiscoveryStream>, DiscoveryError> {
            match self.stream.lock().unwrap().take() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(DiscoveryError::Transport("no stream scripted".into())),
            }
        }

        async fn close(&self) {}
    }

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<Resource>>,
        lost_contacts: AtomicU32,
        reject_updates: bool,
    }

    #[async_trait]
    impl DiscoveryObserver for Recorder {
        async fn on_update(
            &self,
            update: Resource,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if self.reject_updates {
                return Err("resource rejected".into());
            }
            self.updates.lock().unwrap().push(update);
            Ok(())
        }

        async fn on_lost_contact(&self) {
            self.lost_contacts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn cluster_response(name: &str) -> DiscoveryResponse {
        let update = ClusterUpdate {
            name: name.into(),
            revision: 1,
        };
        DiscoveryResponse {
            kind: ResourceKind::Cluster,
            resources: vec![rmp_serde::to_vec_named(&update).unwrap()],
        }
    }

    fn assignment_response(cluster: &str) -> DiscoveryResponse {
        let update = AssignmentUpdate {
            cluster_name: cluster.into(),
            endpoints: vec![Endpoint {
                address: "10.0.0.4".into(),
                port: 8443,
                weight: 1,
            }],
        };
        DiscoveryResponse {
            kind: ResourceKind::Assignment,
            resources: vec![rmp_serde::to_vec_named(&update).unwrap()],
        }
    }

    struct Harness {
        channel: ScriptedChannel,
        sent: Arc<Mutex<Vec<DiscoveryRequest>>>,
    }

    fn harness(responses: Vec<DiscoveryResponse>, fail_send_on: Option<ResourceKind>) -> Harness {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = ScriptedStream {
            responses: responses.into(),
            sent: Arc::clone(&sent),
            fail_send_on,
            hang_after_script: false,
        };
        Harness {
            channel: ScriptedChannel {
                stream: Mutex::new(Some(stream)),
            },
            sent,
        }
    }

    async fn attempt(
        harness: &Harness,
        config: &ClientConfig,
        recorder: &Recorder,
    ) -> AttemptOutcome {
        let (_tx, mut shutdown) = watch::channel(false);
        run_attempt(&harness.channel, config, &MsgpackCodec, recorder, &mut shutdown).await
    }

    #[tokio::test]
    async fn test_cluster_then_assignment_both_dispatched() {
        let config = ClientConfig::new("ws://cp:1", "checkout");
        let harness = harness(
            vec![cluster_response("checkout"), assignment_response("checkout")],
            None,
        );
        let recorder = Recorder::default();

        let outcome = attempt(&harness, &config, &recorder).await;

        assert!(outcome.received_any);
        // Stream script ran out, so the attempt ends as a transport fault.
        assert_eq!(outcome.reason, EndReason::TransportError);

        let updates = recorder.updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].kind(), ResourceKind::Cluster);
        assert_eq!(updates[1].kind(), ResourceKind::Assignment);

        // Request ordering: cluster request flushed before assignment.
        let sent = harness.sent.lock().unwrap();
        assert_eq!(sent[0].kind, ResourceKind::Cluster);
        assert_eq!(sent[1].kind, ResourceKind::Assignment);
    }

    #[tokio::test]
    async fn test_assignment_before_cluster_is_a_phase_violation() {
        let config = ClientConfig::new("ws://cp:1", "checkout");
        let harness = harness(vec![assignment_response("checkout")], None);
        let recorder = Recorder::default();

        let outcome = attempt(&harness, &config, &recorder).await;

        assert!(!outcome.received_any);
        assert_eq!(outcome.reason, EndReason::PhaseViolation);
        assert!(recorder.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assignment_only_mode_accepts_assignment_first() {
        let mut config = ClientConfig::new("ws://cp:1", "checkout");
        config.require_clusters = false;
        let harness = harness(vec![assignment_response("checkout")], None);
        let recorder = Recorder::default();

        let outcome = attempt(&harness, &config, &recorder).await;

        assert!(outcome.received_any);
        assert_eq!(recorder.updates.lock().unwrap().len(), 1);

        // Only the assignment request goes out in this mode.
        let sent = harness.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, ResourceKind::Assignment);
    }

    #[tokio::test]
    async fn test_cluster_response_in_assignment_only_mode_ends_attempt() {
        let mut config = ClientConfig::new("ws://cp:1", "checkout");
        config.require_clusters = false;
        let harness = harness(vec![cluster_response("checkout")], None);
        let recorder = Recorder::default();

        let outcome = attempt(&harness, &config, &recorder).await;

        assert!(!outcome.received_any);
        assert_eq!(outcome.reason, EndReason::UnexpectedKind);
        assert!(recorder.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_resource_list_ends_attempt_without_dispatch() {
        let config = ClientConfig::new("ws://cp:1", "checkout");
        let harness = harness(
            vec![DiscoveryResponse {
                kind: ResourceKind::Cluster,
                resources: vec![],
            }],
            None,
        );
        let recorder = Recorder::default();

        let outcome = attempt(&harness, &config, &recorder).await;

        assert!(!outcome.received_any);
        assert_eq!(outcome.reason, EndReason::EmptyResponse);
        assert!(recorder.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_payload_ends_attempt() {
        let config = ClientConfig::new("ws://cp:1", "checkout");
        let harness = harness(
            vec![DiscoveryResponse {
                kind: ResourceKind::Cluster,
                resources: vec![vec![0xc1]],
            }],
            None,
        );
        let recorder = Recorder::default();

        let outcome = attempt(&harness, &config, &recorder).await;

        assert!(!outcome.received_any);
        assert_eq!(outcome.reason, EndReason::DecodeError);
    }

    #[tokio::test]
    async fn test_consumer_error_ends_attempt() {
        let config = ClientConfig::new("ws://cp:1", "checkout");
        let harness = harness(vec![cluster_response("checkout")], None);
        let recorder = Recorder {
            reject_updates: true,
            ..Default::default()
        };

        let outcome = attempt(&harness, &config, &recorder).await;

        assert!(!outcome.received_any);
        assert_eq!(outcome.reason, EndReason::ConsumerError);
    }

    #[tokio::test]
    async fn test_assignment_send_failure_ends_attempt_with_nothing_received() {
        let config = ClientConfig::new("ws://cp:1", "checkout");
        let harness = harness(
            vec![cluster_response("checkout")],
            Some(ResourceKind::Assignment),
        );
        let recorder = Recorder::default();

        let outcome = attempt(&harness, &config, &recorder).await;

        assert!(!outcome.received_any);
        assert_eq!(outcome.reason, EndReason::TransportError);
        // The cluster request made it out; the assignment request did not.
        let sent = harness.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, ResourceKind::Cluster);
    }

    #[tokio::test]
    async fn test_stream_open_failure_ends_attempt() {
        let config = ClientConfig::new("ws://cp:1", "checkout");
        let channel = ScriptedChannel {
            stream: Mutex::new(None),
        };
        let recorder = Recorder::default();
        let (_tx, mut shutdown) = watch::channel(false);

        let outcome =
            run_attempt(&channel, &config, &MsgpackCodec, &recorder, &mut shutdown).await;

        assert!(!outcome.received_any);
        assert_eq!(outcome.reason, EndReason::TransportError);
    }

    #[tokio::test]
    async fn test_cancellation_during_receive_wait() {
        let config = ClientConfig::new("ws://cp:1", "checkout");
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = ScriptedStream {
            responses: VecDeque::new(),
            sent,
            fail_send_on: None,
            hang_after_script: true,
        };
        let channel = ScriptedChannel {
            stream: Mutex::new(Some(stream)),
        };
        let recorder = Recorder::default();

        let (tx, mut shutdown) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        let outcome =
            run_attempt(&channel, &config, &MsgpackCodec, &recorder, &mut shutdown).await;

        assert!(!outcome.received_any);
        assert_eq!(outcome.reason, EndReason::Cancelled);
    }
}
