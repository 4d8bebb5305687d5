pub mod auth;
pub mod dlq;
pub mod emit;
pub mod error;
pub mod events;
pub mod schedules;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::state::AppState;
use crate::ws;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/emit", post(emit::emit))
        .route("/api/v1/events", get(events::query))
        .route("/api/v1/events/{seq}", get(events::get_by_sequence))
        .route("/api/v1/events/{id}/deliveries", get(events::deliveries))
        .route("/api/v1/dlq", get(dlq::list))
        .route("/api/v1/dlq/replay-all", post(dlq::replay_all))
        .route("/api/v1/dlq/purge", delete(dlq::purge))
        .route("/api/v1/dlq/{seq}", get(dlq::get).delete(dlq::remove))
        .route("/api/v1/dlq/{seq}/replay", post(dlq::replay))
        .route(
            "/api/v1/schedules",
            post(schedules::create).get(schedules::list),
        )
        .route(
            "/api/v1/schedules/{id}",
            get(schedules::get).delete(schedules::cancel),
        )
        .route("/api/v1/schedules/{id}/run", post(schedules::run_now))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn(request_id))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Honors an inbound `x-request-id`, minting one otherwise, and reflects it
/// on the response.
async fn request_id(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
