use axum::extract::{Path, Query};
use axum::{Extension, Json};
use fanout_core::pattern::validate_pattern;
use fanout_dlq::{DlqEntry, DlqRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http::auth::AuthedTenant;
use crate::http::error::ApiResult;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct DlqQuery {
    pub project: Option<String>,
    pub topic: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DlqEntryView {
    pub seq: u64,
    #[serde(flatten)]
    pub record: DlqRecord,
}

impl From<DlqEntry> for DlqEntryView {
    fn from(entry: DlqEntry) -> Self {
        Self {
            seq: entry.sequence,
            record: entry.record,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DlqListResponse {
    pub entries: Vec<DlqEntryView>,
    pub count: usize,
}

pub async fn list(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Query(params): Query<DlqQuery>,
) -> ApiResult<Json<DlqListResponse>> {
    if let Some(topic) = params.topic.as_deref() {
        validate_pattern(topic)?;
    }
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let entries = state
        .dlq
        .list(
            &auth.org_id,
            params.project.as_deref(),
            params.topic.as_deref(),
            limit,
        )
        .await?;
    let entries: Vec<DlqEntryView> = entries.into_iter().map(DlqEntryView::from).collect();
    Ok(Json(DlqListResponse {
        count: entries.len(),
        entries,
    }))
}

pub async fn get(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Path(seq): Path<u64>,
) -> ApiResult<Json<DlqEntryView>> {
    let entry = state.dlq.get(&auth.org_id, seq).await?;
    Ok(Json(entry.into()))
}

pub async fn remove(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Path(seq): Path<u64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.dlq.delete(&auth.org_id, seq).await?;
    Ok(Json(json!({"deleted": seq})))
}

pub async fn replay(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Path(seq): Path<u64>,
) -> ApiResult<Json<serde_json::Value>> {
    let emitted = state
        .dlq
        .replay(&auth.org_id, seq, &state.publisher)
        .await?;
    Ok(Json(json!({"id": emitted.id, "seq": emitted.sequence})))
}

pub async fn replay_all(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let replayed = state
        .dlq
        .replay_all(&auth.org_id, &state.publisher)
        .await?;
    Ok(Json(json!({"replayed": replayed})))
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    pub project: Option<String>,
}

pub async fn purge(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Query(params): Query<PurgeQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let purged = state
        .dlq
        .purge(&auth.org_id, params.project.as_deref())
        .await?;
    Ok(Json(json!({"purged": purged})))
}
