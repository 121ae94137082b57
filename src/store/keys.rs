//! Key schemas for the three event indexes.
//!
//! Keys are printable ASCII with `/` separators, laid out so that plain
//! lexicographic iteration gives the order the query layer needs. Timestamps
//! are fixed-width second-precision UTC RFC-3339, which makes byte order
//! coincide with chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

pub const TIME_PREFIX: &str = "events/";
pub const OBJECT_PREFIX: &str = "objects/";
pub const REF_PREFIX: &str = "eventRefs/";

/// Format a timestamp for use inside a key: `2026-08-02T10:00:00Z`.
pub fn format_key_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Time index: `events/{timestamp}/{namespace}/{resourceType}/{resourceName}/{uid}`.
pub fn time_key(
    ts: DateTime<Utc>,
    namespace: &str,
    resource_type: &str,
    resource_name: &str,
    uid: &str,
) -> String {
    format!(
        "{TIME_PREFIX}{}/{namespace}/{resource_type}/{resource_name}/{uid}",
        format_key_timestamp(ts)
    )
}

/// Object index: `objects/{namespace}/{resourceType}/{resourceName}/{timestamp}/{uid}`.
pub fn object_key(
    namespace: &str,
    resource_type: &str,
    resource_name: &str,
    ts: DateTime<Utc>,
    uid: &str,
) -> String {
    format!(
        "{OBJECT_PREFIX}{namespace}/{resource_type}/{resource_name}/{}/{uid}",
        format_key_timestamp(ts)
    )
}

/// Prefix covering the full history of one object.
pub fn object_prefix(namespace: &str, resource_type: &str, resource_name: &str) -> String {
    format!("{OBJECT_PREFIX}{namespace}/{resource_type}/{resource_name}/")
}

/// Cross-reference index:
/// `eventRefs/{refNamespace}/{refKind}/{refName}/{timestamp}/{uid}`.
///
/// Keyed by Kind, not resource type, to match the `involvedObject` format.
pub fn ref_key(
    ref_namespace: &str,
    ref_kind: &str,
    ref_name: &str,
    ts: DateTime<Utc>,
    uid: &str,
) -> String {
    format!(
        "{REF_PREFIX}{ref_namespace}/{ref_kind}/{ref_name}/{}/{uid}",
        format_key_timestamp(ts)
    )
}

/// Prefix covering all Events that reference one object.
pub fn ref_prefix(ref_namespace: &str, ref_kind: &str, ref_name: &str) -> String {
    format!("{REF_PREFIX}{ref_namespace}/{ref_kind}/{ref_name}/")
}

/// Segments parsed out of a time-index key.
pub struct TimeKeyParts<'a> {
    pub timestamp: DateTime<Utc>,
    pub namespace: &'a str,
    pub resource_type: &'a str,
    pub resource_name: &'a str,
    pub uid: &'a str,
}

/// Parse a time-index key. Returns `None` for keys that do not follow the
/// six-segment schema.
pub fn parse_time_key(key: &str) -> Option<TimeKeyParts<'_>> {
    let rest = key.strip_prefix(TIME_PREFIX)?;
    let mut segments = rest.splitn(5, '/');
    let ts = segments.next()?;
    let namespace = segments.next()?;
    let resource_type = segments.next()?;
    let resource_name = segments.next()?;
    let uid = segments.next()?;

    let timestamp = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);

    Some(TimeKeyParts {
        timestamp,
        namespace,
        resource_type,
        resource_name,
        uid,
    })
}
