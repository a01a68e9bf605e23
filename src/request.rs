//! Outbound request construction
//!
//! Pure builders for the two request variants. Deterministic given the
//! config; no I/O, no error paths.

use crate::config::ClientConfig;
use crate::wire::{
    DiscoveryRequest, MetadataValue, NodeMetadata, ResourceKind, CLUSTERS_EXPECTED_KEY,
    SERVICE_NAME_KEY,
};

/// The cluster request opening the handshake: node identity plus the
/// watched service name, no explicit resource filter.
pub fn cluster_request(config: &ClientConfig) -> DiscoveryRequest {
    let mut node = NodeMetadata::new();
    for (key, value) in &config.node_metadata {
        node.insert(key.clone(), MetadataValue::Str(value.clone()));
    }
    node.insert(
        SERVICE_NAME_KEY.to_string(),
        MetadataValue::Str(config.service_name.clone()),
    );

    DiscoveryRequest {
        kind: ResourceKind::Cluster,
        node,
        resource_names: Vec::new(),
    }
}

/// The assignment request: a singleton resource filter naming the service,
/// plus a flag telling the server whether cluster data is still expected.
pub fn assignment_request(config: &ClientConfig) -> DiscoveryRequest {
    let mut node = NodeMetadata::new();
    node.insert(
        CLUSTERS_EXPECTED_KEY.to_string(),
        MetadataValue::Bool(config.require_clusters),
    );

    DiscoveryRequest {
        kind: ResourceKind::Assignment,
        node,
        resource_names: vec![config.service_name.clone()],
    }
}
