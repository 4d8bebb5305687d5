use axum::{Extension, Json};
use fanout_telemetry::{TelemetryLabels, record_counter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::auth::AuthedTenant;
use crate::http::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EmitRequest {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
    /// Client-supplied id; doubles as the dedup key.
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmitResponse {
    pub id: String,
    pub seq: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

pub async fn emit(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Json(request): Json<EmitRequest>,
) -> ApiResult<Json<EmitResponse>> {
    state.limiter.check(&auth.org_id)?;
    let emitted = state
        .publisher
        .emit(
            &auth.org_id,
            &auth.project_id,
            &request.topic,
            request.data,
            request.id.as_deref(),
        )
        .await?;
    record_counter(
        "events_emitted",
        1,
        &TelemetryLabels::tenant(&auth.org_id).with_topic(&request.topic),
    );
    Ok(Json(EmitResponse {
        id: emitted.id,
        seq: emitted.sequence,
        duplicate: emitted.duplicate,
    }))
}
