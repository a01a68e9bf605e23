//! Discovery Wire Protocol
//!
//! Single responsibility: the shapes of discovery messages and their
//! msgpack envelope encoding.
//!
//! # Wire Format
//!
//! Requests and responses are single msgpack maps on binary frames:
//!
//! ## Request
//! ```text
//! {
//!     "kind": "cluster" | "assignment",
//!     "node": { <string>: <string|bool>, ... },   // identity metadata
//!     "resource_names": [<string>, ...],
//! }
//! ```
//!
//! ## Response
//! ```text
//! {
//!     "kind": "cluster" | "assignment",
//!     "resources": [<binary>, ...],   // encoded payloads, index 0 consumed
//! }
//! ```

use rmpv::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::error::DiscoveryError;

/// Node metadata key carrying the watched service name on cluster requests.
pub const SERVICE_NAME_KEY: &str = "waypost.service_name";

/// Node metadata key telling the server whether cluster data is expected
/// ahead of assignments.
pub const CLUSTERS_EXPECTED_KEY: &str = "clusters_expected";

/// The two resource kinds spoken over the discovery stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Cluster descriptions; first handshake phase when required.
    Cluster,
    /// Endpoint assignments for a cluster; the data this client exists for.
    Assignment,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::Assignment => "assignment",
        }
    }

    fn from_wire(s: &str) -> Result<Self, DiscoveryError> {
        match s {
            "cluster" => Ok(ResourceKind::Cluster),
            "assignment" => Ok(ResourceKind::Assignment),
            other => Err(DiscoveryError::Protocol(format!(
                "Unknown resource kind: {}",
                other
            ))),
        }
    }
}

/// A node metadata value; the protocol only ever carries strings and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Str(String),
    Bool(bool),
}

/// Identity metadata attached to outbound requests.
pub type NodeMetadata = BTreeMap<String, MetadataValue>;

/// An outbound discovery request.
///
/// Two shapes exist, produced by the builders in [`crate::request`]:
/// cluster requests carry node identity and no resource names; assignment
/// requests carry a singleton resource-name list and the
/// `clusters_expected` flag.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryRequest {
    pub kind: ResourceKind,
    pub node: NodeMetadata,
    pub resource_names: Vec<String>,
}

/// An inbound discovery response: a kind tag plus an ordered list of
/// encoded resource payloads. Only index 0 is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResponse {
    pub kind: ResourceKind,
    pub resources: Vec<Vec<u8>>,
}

/// Encode a request into wire format.
pub fn encode_request(request: &DiscoveryRequest) -> Result<Vec<u8>, DiscoveryError> {
    use rmpv::encode::write_value;

    let node = Value::Map(
        request
            .node
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    MetadataValue::Str(s) => Value::String(s.as_str().into()),
                    MetadataValue::Bool(b) => Value::Boolean(*b),
                };
                (Value::String(k.as_str().into()), value)
            })
            .collect(),
    );

    let names = Value::Array(
        request
            .resource_names
            .iter()
            .map(|n| Value::String(n.as_str().into()))
            .collect(),
    );

    let envelope = Value::Map(vec![
        (
            Value::String("kind".into()),
            Value::String(request.kind.as_str().into()),
        ),
        (Value::String("node".into()), node),
        (Value::String("resource_names".into()), names),
    ]);

    let mut bytes = Vec::new();
    write_value(&mut bytes, &envelope)
        .map_err(|e| DiscoveryError::Protocol(format!("Failed to encode request: {}", e)))?;

    Ok(bytes)
}

/// Decode a response from wire format.
pub fn decode_response(data: &[u8]) -> Result<DiscoveryResponse, DiscoveryError> {
    use rmpv::decode::read_value;

    let mut cursor = Cursor::new(data);
    let value = read_value(&mut cursor)
        .map_err(|e| DiscoveryError::Protocol(format!("Failed to decode response: {}", e)))?;

    let map = value
        .as_map()
        .ok_or_else(|| DiscoveryError::Protocol("Response is not a map".into()))?;

    let kind = map
        .iter()
        .find(|(k, _)| k.as_str() == Some("kind"))
        .and_then(|(_, v)| v.as_str())
        .ok_or_else(|| DiscoveryError::Protocol("Response missing 'kind' field".into()))?;
    let kind = ResourceKind::from_wire(kind)?;

    let resources = map
        .iter()
        .find(|(k, _)| k.as_str() == Some("resources"))
        .and_then(|(_, v)| v.as_array())
        .ok_or_else(|| DiscoveryError::Protocol("Response missing 'resources' field".into()))?
        .iter()
        .map(|r| {
            r.as_slice()
                .map(|s| s.to_vec())
                .ok_or_else(|| DiscoveryError::Protocol("Resource payload is not binary".into()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DiscoveryResponse { kind, resources })
}

/// Encode a response into wire format.
///
/// The client never sends responses; this exists for control-plane test
/// stubs that speak the same wire format.
pub fn encode_response(response: &DiscoveryResponse) -> Result<Vec<u8>, DiscoveryError> {
    use rmpv::encode::write_value;

    let resources = Value::Array(
        response
            .resources
            .iter()
            .map(|r| Value::Binary(r.clone()))
            .collect(),
    );

    let envelope = Value::Map(vec![
        (
            Value::String("kind".into()),
            Value::String(response.kind.as_str().into()),
        ),
        (Value::String("resources".into()), resources),
    ]);

    let mut bytes = Vec::new();
    write_value(&mut bytes, &envelope)
        .map_err(|e| DiscoveryError::Protocol(format!("Failed to encode response: {}", e)))?;

    Ok(bytes)
}
