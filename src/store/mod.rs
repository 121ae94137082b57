//! Embedded multi-index store for audit events.
//!
//! Every stored event is written to up to three indexes (time, object,
//! cross-reference) in one atomic batch, with the identical serialized
//! record as the value at each key. Values carry an expiry header; readers
//! treat expired entries as absent and a background sweep reclaims them.

pub mod keys;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use crate::models::AuditEvent;
use crate::transform::extract_involved_object;

/// Cadence of the background expiry sweep.
const GC_INTERVAL: StdDuration = StdDuration::from_secs(3600);

/// Fallback result cap when a query arrives without a limit.
const DEFAULT_QUERY_LIMIT: usize = 1000;

/// Width of the big-endian expiry header prepended to every value.
const EXPIRY_HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Parameters for a time-range scan over the time index.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub namespace: Option<String>,
    pub resource_type: Option<String>,
    pub resource_name: Option<String>,
    pub verb: Option<String>,
    pub user: Option<String>,
    pub limit: usize,
}

pub struct Store {
    db: sled::Db,
    retention: Duration,
}

impl Store {
    /// Open (or create) the store at `path`. Writes are flushed in the
    /// background rather than synchronously; the crash-loss window is
    /// bounded and acceptable for diagnostic data.
    pub fn open(path: &Path, retention_days: i64) -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .flush_every_ms(Some(1000))
            .open()?;

        Ok(Store {
            db,
            retention: Duration::days(retention_days),
        })
    }

    /// Flush outstanding writes and release the directory.
    pub fn close(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Write an event to all of its indexes in one atomic batch.
    ///
    /// `object` is the raw cluster object the event was transformed from;
    /// it supplies the uid for the key suffix and, for Event-kind objects,
    /// the cross-reference target.
    pub fn store_event(&self, event: &AuditEvent, object: &Value) -> Result<(), StoreError> {
        let data = serde_json::to_vec(event)?;
        let expires_at = (Utc::now() + self.retention).timestamp() as u64;
        let value = encode_value(expires_at, &data);
        let uid = object
            .pointer("/metadata/uid")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut batch = sled::Batch::default();
        batch.insert(
            keys::time_key(
                event.timestamp,
                &event.namespace,
                &event.resource_type,
                &event.resource_name,
                uid,
            )
            .into_bytes(),
            value.clone(),
        );
        batch.insert(
            keys::object_key(
                &event.namespace,
                &event.resource_type,
                &event.resource_name,
                event.timestamp,
                uid,
            )
            .into_bytes(),
            value.clone(),
        );

        if event.resource_type == "events" {
            if let Some(reference) = extract_involved_object(object) {
                batch.insert(
                    keys::ref_key(
                        &reference.namespace,
                        &reference.kind,
                        &reference.name,
                        event.timestamp,
                        uid,
                    )
                    .into_bytes(),
                    value,
                );
            }
        }

        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Time-range scan over the time index.
    ///
    /// Coarse filters (namespace, resource type, resource name) come from
    /// the key alone; verb and user require the deserialized value. Keys are
    /// time-ordered, so iteration stops at the first key past `end`.
    pub fn query_events(&self, opts: &QueryOptions) -> Result<Vec<AuditEvent>, StoreError> {
        let limit = if opts.limit == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            opts.limit
        };

        let seek = match opts.start {
            Some(start) => format!("{}{}", keys::TIME_PREFIX, keys::format_key_timestamp(start)),
            None => keys::TIME_PREFIX.to_string(),
        };

        let now = Utc::now().timestamp() as u64;
        let mut events = Vec::new();

        for item in self.db.range(seek.as_bytes()..) {
            if events.len() >= limit {
                break;
            }

            let (raw_key, raw_value) = item?;
            if !raw_key.starts_with(keys::TIME_PREFIX.as_bytes()) {
                break;
            }

            let Ok(key) = std::str::from_utf8(&raw_key) else {
                continue;
            };
            let Some(parts) = keys::parse_time_key(key) else {
                continue;
            };

            if let Some(end) = opts.end {
                if parts.timestamp > end {
                    break;
                }
            }
            if let Some(start) = opts.start {
                if parts.timestamp < start {
                    continue;
                }
            }

            if !matches_filter(&opts.namespace, parts.namespace)
                || !matches_filter(&opts.resource_type, parts.resource_type)
                || !matches_filter(&opts.resource_name, parts.resource_name)
            {
                continue;
            }

            let Some(payload) = decode_value(&raw_value, now) else {
                continue;
            };
            let event: AuditEvent = serde_json::from_slice(payload)?;

            if !matches_filter(&opts.verb, event.verb.as_str()) {
                continue;
            }
            if !matches_filter(&opts.user, &event.user) {
                continue;
            }

            events.push(event);
        }

        Ok(events)
    }

    /// Full history of a single object, in chronological order.
    pub fn get_object_history(
        &self,
        namespace: &str,
        resource_type: &str,
        name: &str,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        self.scan_prefix(&keys::object_prefix(namespace, resource_type, name))
    }

    /// Event-kind records whose `involvedObject` points at the given object.
    pub fn get_related_events(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        self.scan_prefix(&keys::ref_prefix(namespace, kind, name))
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<AuditEvent>, StoreError> {
        let now = Utc::now().timestamp() as u64;
        let mut events = Vec::new();

        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, raw_value) = item?;
            let Some(payload) = decode_value(&raw_value, now) else {
                continue;
            };
            events.push(serde_json::from_slice(payload)?);
        }

        Ok(events)
    }

    /// Delete every expired entry across all three indexes. Returns the
    /// number of keys reclaimed.
    pub fn remove_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now().timestamp() as u64;
        let mut removed = 0;

        for prefix in [keys::TIME_PREFIX, keys::OBJECT_PREFIX, keys::REF_PREFIX] {
            for item in self.db.scan_prefix(prefix.as_bytes()) {
                let (raw_key, raw_value) = item?;
                if decode_value(&raw_value, now).is_none() {
                    self.db.remove(raw_key)?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

/// Background expiry sweep. Runs until the shutdown signal flips.
pub async fn run_gc_loop(store: Arc<Store>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(GC_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        let sweep = store.clone();
        match tokio::task::spawn_blocking(move || sweep.remove_expired()).await {
            Ok(Ok(0)) => tracing::debug!("Expiry sweep: nothing to reclaim"),
            Ok(Ok(removed)) => tracing::info!("Expiry sweep reclaimed {removed} keys"),
            Ok(Err(e)) => tracing::warn!("Expiry sweep failed: {e}"),
            Err(e) => tracing::warn!("Expiry sweep panicked: {e}"),
        }
    }

    tracing::debug!("Expiry sweep task stopped");
}

fn matches_filter(filter: &Option<String>, candidate: &str) -> bool {
    match filter {
        Some(wanted) if !wanted.is_empty() => wanted == candidate,
        _ => true,
    }
}

fn encode_value(expires_at: u64, payload: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(EXPIRY_HEADER_LEN + payload.len());
    value.extend_from_slice(&expires_at.to_be_bytes());
    value.extend_from_slice(payload);
    value
}

/// Split a stored value into its payload, or `None` if the entry is
/// malformed or already expired at `now`.
fn decode_value(raw: &[u8], now: u64) -> Option<&[u8]> {
    if raw.len() < EXPIRY_HEADER_LEN {
        return None;
    }
    let mut header = [0u8; EXPIRY_HEADER_LEN];
    header.copy_from_slice(&raw[..EXPIRY_HEADER_LEN]);
    let expires_at = u64::from_be_bytes(header);
    if now >= expires_at {
        return None;
    }
    Some(&raw[EXPIRY_HEADER_LEN..])
}
