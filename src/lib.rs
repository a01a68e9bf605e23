//! waypost - resilient streaming discovery client
//!
//! Keeps a long-lived discovery session open against a remote control-plane
//! endpoint, validates the cluster-then-assignment handshake ordering,
//! dispatches decoded resource updates to an observer, and retries broken
//! streams with capped exponential backoff. One shutdown signal gates every
//! suspension point, and the channel handle is closed exactly once no
//! matter which task races to close it.
//!
//! # Architecture
//!
//! | Module       | Responsibility                                      |
//! |--------------|-----------------------------------------------------|
//! | `config`     | Immutable client configuration                      |
//! | `error`      | Fatal-vs-retryable error taxonomy                   |
//! | `backoff`    | Capped, jittered exponential retry delays           |
//! | `wire`       | Message shapes + msgpack envelope encoding          |
//! | `request`    | Pure builders for the two outbound request variants |
//! | `codec`      | Typed resource decoding behind a trait seam         |
//! | `transport`  | Connector/Channel/Stream traits + WebSocket default |
//! | `connection` | Lock-guarded, close-once channel ownership          |
//! | `session`    | One stream attempt as a phase-checked state machine |
//! | `client`     | Lifecycle controller and retrying session loop      |
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use waypost::{ClientConfig, DiscoveryClient};
//!
//! let config = ClientConfig::new("ws://control-plane:18000", "checkout");
//! let client = DiscoveryClient::with_websocket(config, Arc::new(MyObserver));
//! let (client, handle) = client.spawn();
//!
//! // ... later, from any task:
//! client.close().await;
//! handle.await??;
//! ```

pub mod backoff;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod request;
pub mod session;
pub mod transport;
pub mod wire;

// Re-exports
pub use backoff::ExponentialBackoff;
pub use client::{DiscoveryClient, DiscoveryObserver};
pub use codec::{AssignmentUpdate, ClusterUpdate, Endpoint, MsgpackCodec, Resource, ResourceCodec};
pub use config::ClientConfig;
pub use error::DiscoveryError;
pub use session::{AttemptOutcome, EndReason};
pub use transport::{Channel, Connector, DiscoveryStream, WsConnector};
pub use wire::{DiscoveryRequest, DiscoveryResponse, NodeMetadata, ResourceKind};
