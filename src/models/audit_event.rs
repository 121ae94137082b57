use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Synthetic user recorded on every watch-sourced event.
pub const SYSTEM_WATCHER_USER: &str = "system:k8s-watcher";

/// Stage recorded on every event; watch events are only seen once complete.
pub const STAGE_RESPONSE_COMPLETE: &str = "ResponseComplete";

/// Response status recorded for compatibility with API-server audit logs.
pub const RESPONSE_STATUS_SUCCESS: u16 = 200;

/// One canonical record per observed state change to a cluster object.
///
/// Field names on the wire match the API-server audit log format consumed
/// downstream (`requestURI`, `sourceIPs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub verb: Verb,
    pub user: String,
    pub namespace: String,
    pub resource_type: String,
    pub resource_name: String,
    pub response_status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_changes: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub stage: String,
    #[serde(rename = "requestURI")]
    pub request_uri: String,
    #[serde(rename = "sourceIPs", default, skip_serializing_if = "Vec::is_empty")]
    pub source_ips: Vec<String>,
}

/// Audit verb derived from the watch notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Create,
    Update,
    Delete,
    Unknown,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::Unknown => "unknown",
        }
    }

    /// Capitalized form used in human-readable messages.
    pub fn title(&self) -> &'static str {
        match self {
            Verb::Create => "Create",
            Verb::Update => "Update",
            Verb::Delete => "Delete",
            Verb::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a watch notification as delivered by the cluster.
///
/// Anything the cluster may send beyond the three known kinds deserializes
/// to `Unknown`; transformation maps it to `Verb::Unknown` rather than
/// failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "ADDED")]
    Added,
    #[serde(rename = "MODIFIED")]
    Modified,
    #[serde(rename = "DELETED")]
    Deleted,
    #[serde(other)]
    Unknown,
}

impl EventType {
    pub fn verb(&self) -> Verb {
        match self {
            EventType::Added => Verb::Create,
            EventType::Modified => Verb::Update,
            EventType::Deleted => Verb::Delete,
            EventType::Unknown => Verb::Unknown,
        }
    }
}

/// Reference to another cluster object, extracted from an Event's
/// `involvedObject` sub-document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}
