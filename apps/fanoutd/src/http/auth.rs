//! Bearer-token resolution. Identity proper (issuing, hashing, rotation)
//! is an external concern; the engine only looks tokens up and pins every
//! downstream operation to the resolved tenant.

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use fanout_core::Error;

use crate::http::error::ApiError;
use crate::state::AppState;

/// The tenant identity every authenticated request runs as.
#[derive(Debug, Clone)]
pub struct AuthedTenant {
    pub org_id: String,
    pub project_id: String,
}

impl FromRequestParts<()> for AuthedTenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &()) -> Result<Self, Self::Rejection> {
        let state = parts
            .extensions
            .get::<AppState>()
            .cloned()
            .ok_or_else(|| ApiError(Error::upstream("app state missing")))?;

        let token = bearer_token(&parts.headers)
            .map(str::to_string)
            .or_else(|| query_token(parts.uri.query()))
            .ok_or(ApiError(Error::Unauthorized))?;

        let record = state
            .meta
            .resolve_token(&token)
            .await
            .map_err(ApiError)?
            .ok_or(ApiError(Error::Unauthorized))?;

        Ok(AuthedTenant {
            org_id: record.org_id,
            project_id: record.project_id,
        })
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// WebSocket clients cannot always set headers; `?token=` is the fallback.
pub fn query_token(query: Option<&str>) -> Option<String> {
    let query = query?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token" && !value.is_empty()).then(|| value.to_string())
    })
}
