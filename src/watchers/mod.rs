//! Watch-notification sources and the manager that routes them into the
//! transform + store pipeline.
//!
//! The cluster client is an external collaborator behind the [`WatchSource`]
//! trait: a source delivers Add/Update/Delete notifications with full object
//! payloads and can enumerate the custom resource definitions the cluster
//! serves. [`kube::KubeWatchSource`] is the production implementation; tests
//! drive the manager through an in-process channel source.

pub mod kube;
pub mod manager;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::WatchedResource;
use crate::models::EventType;

pub use manager::WatcherManager;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cluster client error: {0}")]
    Client(String),
}

/// One watch notification: the kind of change and the object payload.
///
/// A `Deleted` notification whose final state is unknown may instead carry a
/// tombstone wrapper `{"key": "ns/name", "object": {...last known...}}`;
/// the manager unwraps it before transformation.
#[derive(Debug, Clone)]
pub struct Notification {
    pub event_type: EventType,
    pub object: Value,
}

/// Delivers watch notifications for resource types on request.
#[async_trait]
pub trait WatchSource: Send + Sync + 'static {
    /// Subscribe to notifications for one resource descriptor. Delivery
    /// continues on the returned channel until the source stops or the
    /// receiver is dropped.
    async fn subscribe(
        &self,
        resource: &WatchedResource,
    ) -> Result<mpsc::Receiver<Notification>, SourceError>;

    /// One descriptor per served version of every custom resource
    /// definition currently installed in the cluster.
    async fn list_crds(&self) -> Result<Vec<WatchedResource>, SourceError>;
}

/// Parse a CustomResourceDefinition payload into one watchable descriptor
/// per served version. Definitions missing a kind or plural, and versions
/// not marked as served, yield nothing.
pub fn crd_to_resources(crd: &Value) -> Vec<WatchedResource> {
    let spec_str = |pointer: &str| {
        crd.pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let group = spec_str("/spec/group");
    let kind = spec_str("/spec/names/kind");
    let plural = spec_str("/spec/names/plural");
    if kind.is_empty() || plural.is_empty() {
        return Vec::new();
    }
    let namespaced = spec_str("/spec/scope") == "Namespaced";

    crd.pointer("/spec/versions")
        .and_then(Value::as_array)
        .map(|versions| {
            versions
                .iter()
                .filter(|v| v.get("served").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|v| v.get("name").and_then(Value::as_str))
                .map(|version| WatchedResource::new(&group, version, &kind, &plural, namespaced))
                .collect()
        })
        .unwrap_or_default()
}
