//! Resource payload codec
//!
//! Decodes the first payload of a discovery response into a typed
//! [`Resource`]. The codec is a trait so sessions can be driven against
//! alternative encodings (or mocks) without touching the state machine.

use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;
use crate::wire::{DiscoveryResponse, ResourceKind};

/// A cluster description delivered during the cluster phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    pub name: String,
    /// Server-assigned revision of this cluster description
    #[serde(default)]
    pub revision: u64,
}

/// One endpoint inside an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    /// Relative load-balancing weight; 0 means "unset"
    #[serde(default)]
    pub weight: u32,
}

/// Endpoint assignments for a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentUpdate {
    pub cluster_name: String,
    pub endpoints: Vec<Endpoint>,
}

/// A decoded discovery resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Cluster(ClusterUpdate),
    Assignment(AssignmentUpdate),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Cluster(_) => ResourceKind::Cluster,
            Resource::Assignment(_) => ResourceKind::Assignment,
        }
    }
}

/// Decodes resource payloads. Only the first payload of a response is ever
/// interpreted.
pub trait ResourceCodec: Send + Sync {
    fn decode_first(&self, response: &DiscoveryResponse) -> Result<Resource, DiscoveryError>;
}

/// Default codec: payloads are msgpack-encoded update structs, keyed by the
/// response kind tag.
#[derive(Debug, Default, Clone)]
pub struct MsgpackCodec;

impl ResourceCodec for MsgpackCodec {
    fn decode_first(&self, response: &DiscoveryResponse) -> Result<Resource, DiscoveryError> {
        let payload = response
            .resources
            .first()
            .ok_or_else(|| DiscoveryError::Decode("Response has no resource payloads".into()))?;

        match response.kind {
            ResourceKind::Cluster => {
                let update: ClusterUpdate = rmp_serde::from_slice(payload).map_err(|e| {
                    DiscoveryError::Decode(format!("Failed to decode cluster: {}", e))
                })?;
                Ok(Resource::Cluster(update))
            }
            ResourceKind::Assignment => {
                let update: AssignmentUpdate = rmp_serde::from_slice(payload).map_err(|e| {
                    DiscoveryError::Decode(format!("Failed to decode assignment: {}", e))
                })?;
                Ok(Resource::Assignment(update))
            }
        }
    }
}
