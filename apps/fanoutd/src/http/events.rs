use axum::extract::{Path, Query};
use axum::{Extension, Json};
use fanout_core::{DeliveryAttempt, Error};
use fanout_stream::StoredEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::http::auth::AuthedTenant;
use crate::http::error::ApiResult;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventView {
    pub seq: u64,
    pub id: String,
    pub topic: String,
    pub data: Value,
    pub timestamp: String,
    pub attempt: u32,
}

impl From<StoredEvent> for EventView {
    fn from(stored: StoredEvent) -> Self {
        Self {
            seq: stored.sequence,
            id: stored.event.id,
            topic: stored.event.topic,
            data: stored.event.data,
            timestamp: stored.event.timestamp,
            attempt: stored.event.attempt,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<EventView>,
    pub count: usize,
}

fn parse_time(raw: Option<&str>, field: &str) -> Result<Option<OffsetDateTime>, Error> {
    raw.map(|value| {
        OffsetDateTime::parse(value, &Rfc3339)
            .map_err(|_| Error::invalid(format!("{field} must be an RFC 3339 timestamp")))
    })
    .transpose()
}

pub async fn query(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Query(params): Query<EventsQuery>,
) -> ApiResult<Json<EventsResponse>> {
    let topic = params
        .topic
        .as_deref()
        .ok_or_else(|| Error::invalid("topic query parameter is required"))?;
    let from = parse_time(params.from.as_deref(), "from")?;
    let to = parse_time(params.to.as_deref(), "to")?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let events = state
        .history
        .query(&auth.org_id, &auth.project_id, topic, from, to, limit)
        .await?;
    let events: Vec<EventView> = events.into_iter().map(EventView::from).collect();
    Ok(Json(EventsResponse {
        count: events.len(),
        events,
    }))
}

pub async fn get_by_sequence(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Path(seq): Path<u64>,
) -> ApiResult<Json<EventView>> {
    let stored = state.history.get_by_sequence(&auth.org_id, seq).await?;
    Ok(Json(stored.into()))
}

#[derive(Debug, Serialize)]
pub struct DeliveriesResponse {
    pub attempts: Vec<DeliveryAttempt>,
}

pub async fn deliveries(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeliveriesResponse>> {
    let all = state.meta.list_attempts(&id).await?;
    if all.is_empty() {
        return Err(Error::not_found(format!("deliveries for event {id}")).into());
    }
    let attempts: Vec<DeliveryAttempt> = all
        .into_iter()
        .filter(|row| row.org_id == auth.org_id)
        .collect();
    if attempts.is_empty() {
        return Err(Error::Forbidden.into());
    }
    Ok(Json(DeliveriesResponse { attempts }))
}
