use std::time::Duration;

use axum::{
    Json, Router,
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use utils::response::ApiResponse;

use crate::middleware;
use crate::state::AppState;

pub mod entities;
pub mod files;
pub mod frontend;
pub mod health;
pub mod records;
pub mod settings;

/// Standard envelope response: the HTTP status and the envelope's `status`
/// field always agree.
pub(crate) fn envelope(status: StatusCode, data: Value) -> Response {
    let body = ApiResponse::success(status.as_u16(), data);
    (status, Json(body)).into_response()
}

async fn api_not_found() -> Response {
    let body = ApiResponse::error(404, "resource not found");
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// Plain OPTIONS requests (non-preflight, which the CORS layer already
/// answers) get a blanket 200 on every path.
async fn options_ok(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

pub fn router(state: AppState) -> Router {
    // Static routes win over the `{entity}` captures, so the system
    // surfaces (_tables, _settings, healthcheck) shadow same-named
    // dispatch paths.
    let api = Router::new()
        .route("/v1/healthcheck", get(health::healthcheck))
        .merge(entities::router())
        .merge(settings::router())
        .merge(records::router())
        .route("/files/{entity}/{file}", get(files::serve_file))
        .fallback(api_not_found)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::hydrate_auth,
        ))
        .layer(axum::middleware::from_fn(middleware::extract_token))
        .with_state(state.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/admin", get(frontend::serve_admin_root))
        .route("/admin/{*path}", get(frontend::serve_admin))
        .nest("/api", api)
        .fallback_service(ServeDir::new(&state.config.public_dir))
        .layer(axum::middleware::from_fn(options_ok))
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::request_log))
}
