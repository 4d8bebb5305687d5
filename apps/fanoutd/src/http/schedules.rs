use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json};
use fanout_core::{Error, duration::parse_duration, validate::validate_topic};
use fanout_metastore::{ScheduleStatus, ScheduledEmit};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::http::auth::AuthedTenant;
use crate::http::error::ApiResult;
use crate::scheduler;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
    /// Absolute fire time, RFC 3339.
    #[serde(default)]
    pub at: Option<String>,
    /// Relative shorthand, e.g. `"5s"` or `"15m"`.
    #[serde(default, rename = "in")]
    pub in_: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleView {
    pub id: String,
    pub topic: String,
    pub data: Value,
    pub fire_at: String,
    pub status: ScheduleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: String,
}

impl From<ScheduledEmit> for ScheduleView {
    fn from(row: ScheduledEmit) -> Self {
        Self {
            id: row.id.clone(),
            topic: row.topic.clone(),
            data: row.payload.clone(),
            fire_at: row.fire_at_rfc3339(),
            status: row.status,
            event_id: row.event_id.clone(),
            last_error: row.last_error.clone(),
            created_at: row.created_at,
        }
    }
}

fn resolve_fire_at(request: &ScheduleRequest) -> Result<OffsetDateTime, Error> {
    if let Some(at) = request.at.as_deref() {
        return OffsetDateTime::parse(at, &Rfc3339)
            .map_err(|_| Error::invalid("at must be an RFC 3339 timestamp"));
    }
    if let Some(relative) = request.in_.as_deref() {
        let delay = parse_duration(relative)?;
        return Ok(OffsetDateTime::now_utc() + delay);
    }
    Err(Error::invalid("either at or in is required"))
}

pub async fn create(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<(StatusCode, Json<ScheduleView>)> {
    validate_topic(&request.topic)?;
    let fire_at = resolve_fire_at(&request)?;
    let row = ScheduledEmit::new(
        &auth.org_id,
        &auth.project_id,
        &request.topic,
        request.data,
        fire_at,
    );
    state.meta.insert_schedule(&row).await?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

#[derive(Debug, Serialize)]
pub struct ScheduleListResponse {
    pub schedules: Vec<ScheduleView>,
}

pub async fn list(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
) -> ApiResult<Json<ScheduleListResponse>> {
    let rows = state.meta.list_schedules(&auth.org_id).await?;
    Ok(Json(ScheduleListResponse {
        schedules: rows.into_iter().map(ScheduleView::from).collect(),
    }))
}

pub async fn get(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduleView>> {
    let row = state
        .meta
        .get_schedule(&auth.org_id, &id)
        .await?
        .ok_or_else(|| Error::not_found("schedule"))?;
    Ok(Json(row.into()))
}

pub async fn cancel(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduleView>> {
    state.meta.cancel_schedule(&auth.org_id, &id).await?;
    let row = state
        .meta
        .get_schedule(&auth.org_id, &id)
        .await?
        .ok_or_else(|| Error::not_found("schedule"))?;
    Ok(Json(row.into()))
}

/// Same path as the polling fire, just immediate.
pub async fn run_now(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduleView>> {
    let row = state
        .meta
        .get_schedule(&auth.org_id, &id)
        .await?
        .ok_or_else(|| Error::not_found("schedule"))?;
    if row.status != ScheduleStatus::Pending {
        return Err(Error::conflict(format!(
            "schedule is {}, not pending",
            row.status.as_str()
        ))
        .into());
    }
    scheduler::fire(&state, &row).await;
    let row = state
        .meta
        .get_schedule(&auth.org_id, &id)
        .await?
        .ok_or_else(|| Error::not_found("schedule"))?;
    Ok(Json(row.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fire_at_prefers_absolute_time() {
        let request = ScheduleRequest {
            topic: "promo.now".into(),
            data: json!({}),
            at: Some("2030-01-02T03:04:05Z".into()),
            in_: Some("5s".into()),
        };
        let at = resolve_fire_at(&request).unwrap();
        assert_eq!(at.unix_timestamp(), 1_893_553_445);
    }

    #[test]
    fn fire_at_accepts_relative_shorthand() {
        let request = ScheduleRequest {
            topic: "promo.now".into(),
            data: json!({}),
            at: None,
            in_: Some("5s".into()),
        };
        let now = OffsetDateTime::now_utc();
        let at = resolve_fire_at(&request).unwrap();
        let delta = at - now;
        assert!(delta.whole_seconds() >= 4 && delta.whole_seconds() <= 6);
    }

    #[test]
    fn fire_at_requires_one_of_the_fields() {
        let request = ScheduleRequest {
            topic: "promo.now".into(),
            data: json!({}),
            at: None,
            in_: None,
        };
        assert!(resolve_fire_at(&request).is_err());

        let request = ScheduleRequest {
            topic: "promo.now".into(),
            data: json!({}),
            at: Some("yesterday".into()),
            in_: None,
        };
        assert!(resolve_fire_at(&request).is_err());
    }
}
