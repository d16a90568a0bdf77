use axum::{
    Router,
    extract::{Extension, State},
    http::StatusCode,
    response::Response,
    routing::get,
};
use serde_json::Value;

use crate::error::ApiError;
use crate::middleware::AuthState;
use crate::routes::envelope;
use crate::state::AppState;

/// The `_settings` singleton, admin-guarded on both verbs.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/_settings", get(get_settings).patch(update_settings))
}

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthState>,
) -> Result<Response, ApiError> {
    auth.require_admin()?;
    Ok(envelope(StatusCode::OK, state.settings.configs().await))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthState>,
    axum::Json(patch): axum::Json<Value>,
) -> Result<Response, ApiError> {
    auth.require_admin()?;
    let merged = state.settings.update(&patch).await?;
    Ok(envelope(StatusCode::OK, merged))
}
