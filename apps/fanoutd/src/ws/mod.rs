pub mod frames;
pub mod hub;
pub mod session;

use axum::Extension;
use axum::extract::WebSocketUpgrade;
use axum::response::IntoResponse;

use crate::http::auth::AuthedTenant;
use crate::http::error::ApiResult;
use crate::state::AppState;

/// `/ws`: auth happens before the upgrade (bearer header or `?token=`),
/// so a session is born already pinned to its tenant.
pub async fn ws_handler(
    auth: AuthedTenant,
    Extension(state): Extension<AppState>,
    ws: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    Ok(ws.on_upgrade(move |socket| {
        session::run_session(socket, state, auth.org_id, auth.project_id)
    }))
}
