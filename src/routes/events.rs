use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::inflect::resource_type_to_kind;
use crate::models::AuditEvent;
use crate::state::SharedState;
use crate::store::QueryOptions;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQueryParams {
    pub start: Option<String>,
    pub end: Option<String>,
    pub namespace: Option<String>,
    pub resource_type: Option<String>,
    pub resource_name: Option<String>,
    pub verb: Option<String>,
    pub user: Option<String>,
    pub limit: Option<String>,
}

/// Time-range query over the event stream.
///
/// Responses carry `X-Total-Count` and `X-Has-More`; an empty result is 404
/// so the consuming client can tell "nothing recorded" from a failure.
pub async fn query_events(
    State(state): State<SharedState>,
    Query(params): Query<EventQueryParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = effective_limit(params.limit.as_deref(), state.config.max_query_limit)?;

    let opts = QueryOptions {
        start: parse_time(params.start.as_deref(), "start")?,
        end: parse_time(params.end.as_deref(), "end")?,
        namespace: params.namespace,
        resource_type: params.resource_type,
        resource_name: params.resource_name,
        verb: params.verb,
        user: params.user,
        limit,
    };

    let store = state.store.clone();
    let events = tokio::task::spawn_blocking(move || store.query_events(&opts))
        .await
        .map_err(|e| AppError::Internal(format!("query task failed: {e}")))??;

    if events.is_empty() {
        return Err(AppError::NotFound(
            "no audit data available for the specified time range".to_string(),
        ));
    }

    let mut headers = HeaderMap::new();
    headers.insert("x-total-count", HeaderValue::from(events.len() as u64));
    headers.insert(
        "x-has-more",
        HeaderValue::from_static(if events.len() >= limit { "true" } else { "false" }),
    );

    Ok((headers, Json(events)))
}

/// History of one object in two sections: mutations of the object itself,
/// and cluster Events that reference it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEventsResponse {
    pub namespace: String,
    pub resource_type: String,
    pub resource_name: String,
    pub watch_events: Vec<AuditEvent>,
    pub related_events: Vec<AuditEvent>,
}

pub async fn object_history(
    State(state): State<SharedState>,
    Path((namespace, resource_type, name)): Path<(String, String, String)>,
) -> Result<Json<ObjectEventsResponse>, AppError> {
    let store = state.store.clone();
    let (ns, rt, rn) = (namespace.clone(), resource_type.clone(), name.clone());
    let watch_events = tokio::task::spawn_blocking(move || store.get_object_history(&ns, &rt, &rn))
        .await
        .map_err(|e| AppError::Internal(format!("history task failed: {e}")))??;

    // The cross-reference index is keyed by Kind, not resource type.
    let kind = resource_type_to_kind(&resource_type);
    let store = state.store.clone();
    let (ns, rn) = (namespace.clone(), name.clone());
    let related_events =
        tokio::task::spawn_blocking(move || store.get_related_events(&ns, &kind, &rn))
            .await
            .map_err(|e| AppError::Internal(format!("history task failed: {e}")))??;

    if watch_events.is_empty() && related_events.is_empty() {
        return Err(AppError::NotFound(
            "no events found for this object".to_string(),
        ));
    }

    Ok(Json(ObjectEventsResponse {
        namespace,
        resource_type,
        resource_name: name,
        watch_events,
        related_events,
    }))
}

fn parse_time(value: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>, AppError> {
    match value {
        None => Ok(None),
        Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| AppError::BadRequest(format!("invalid {field} time: {e}"))),
    }
}

/// Clamp the requested limit to the configured maximum; absent or
/// non-positive means "the maximum".
fn effective_limit(raw: Option<&str>, max: usize) -> Result<usize, AppError> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(max);
    };
    let parsed: i64 = raw
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid limit: {e}")))?;
    if parsed > 0 && (parsed as usize) < max {
        Ok(parsed as usize)
    } else {
        Ok(max)
    }
}
