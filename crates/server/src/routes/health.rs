use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

use crate::routes::envelope;

pub async fn healthcheck() -> Response {
    envelope(
        StatusCode::OK,
        json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}),
    )
}
