//! Conversion of raw watch notifications into canonical audit events.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::inflect::kind_to_resource_type;
use crate::models::{
    AuditEvent, EventType, ObjectReference, RESPONSE_STATUS_SUCCESS, STAGE_RESPONSE_COMPLETE,
    SYSTEM_WATCHER_USER,
};

/// Metadata fields stripped from stored object payloads. They churn on every
/// write without carrying audit value (the uid lives in the index keys).
const STRIPPED_METADATA_FIELDS: &[&str] = &[
    "managedFields",
    "resourceVersion",
    "generation",
    "selfLink",
    "uid",
];

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("object cannot be null")]
    NullObject,
}

/// Convert a cluster object and notification kind into an [`AuditEvent`].
///
/// `plural` is the resource type from the watcher's descriptor; when the
/// caller has none, the plural is derived from the object's kind. The
/// timestamp is assigned here, at ingestion, not read from the object.
pub fn transform_watch_event(
    object: &Value,
    event_type: EventType,
    plural: Option<&str>,
) -> Result<AuditEvent, TransformError> {
    if object.is_null() {
        return Err(TransformError::NullObject);
    }

    let verb = event_type.verb();
    let namespace = json_str(object, "/metadata/namespace");
    let name = json_str(object, "/metadata/name");
    let kind = json_str(object, "/kind");
    let resource_type = match plural {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => kind_to_resource_type(&kind),
    };

    Ok(AuditEvent {
        timestamp: Utc::now(),
        verb,
        user: SYSTEM_WATCHER_USER.to_string(),
        namespace: namespace.clone(),
        resource_type: resource_type.clone(),
        resource_name: name.clone(),
        response_status: RESPONSE_STATUS_SUCCESS,
        message: format_message(verb, &resource_type, &namespace, &name),
        object_changes: Some(clean_object(object)),
        annotations: extract_annotations(object),
        stage: STAGE_RESPONSE_COMPLETE.to_string(),
        request_uri: build_request_uri(&namespace, &resource_type, &name),
        source_ips: Vec::new(),
    })
}

/// Deep-copy the object and strip noisy metadata fields. The caller's value
/// (and through it the informer cache) is never mutated.
pub fn clean_object(object: &Value) -> Value {
    let mut cleaned = object.clone();
    if let Some(metadata) = cleaned
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
    {
        for field in STRIPPED_METADATA_FIELDS {
            metadata.remove(*field);
        }
    }
    cleaned
}

/// Extract the `involvedObject` reference from a cluster-native Event.
///
/// Returns `None` for any other kind, and for Events whose reference is
/// missing its `kind` or `name`.
pub fn extract_involved_object(object: &Value) -> Option<ObjectReference> {
    if json_str(object, "/kind") != "Event" {
        return None;
    }

    let involved = object.get("involvedObject")?.as_object()?;
    let field = |key: &str| {
        involved
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let kind = field("kind");
    let name = field("name");
    if kind.is_empty() || name.is_empty() {
        return None;
    }

    Some(ObjectReference {
        kind,
        namespace: field("namespace"),
        name,
        uid: field("uid"),
    })
}

fn format_message(
    verb: crate::models::Verb,
    resource_type: &str,
    namespace: &str,
    name: &str,
) -> String {
    if namespace.is_empty() {
        format!("{} {resource_type} {name}", verb.title())
    } else {
        format!("{} {resource_type} {namespace}/{name}", verb.title())
    }
}

fn build_request_uri(namespace: &str, resource_type: &str, name: &str) -> String {
    if namespace.is_empty() {
        format!("/api/v1/{resource_type}/{name}")
    } else {
        format!("/api/v1/namespaces/{namespace}/{resource_type}/{name}")
    }
}

fn extract_annotations(object: &Value) -> BTreeMap<String, String> {
    object
        .pointer("/metadata/annotations")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn json_str(object: &Value, pointer: &str) -> String {
    object
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
