use std::time::Instant;

use axum::{body::Body, extract::Request, middleware::Next, response::Response};


/// Outermost middleware: stamps the start time, runs the pipeline, then
/// emits one line per request. Error responses get their body included so
/// failures are diagnosable from the log alone.
pub async fn request_log(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_millis();
    let status = response.status();

    if status.as_u16() >= 400 {
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .unwrap_or_default();
        if bytes.is_empty() {
            tracing::warn!("{method} {path} {} {elapsed_ms}ms", status.as_u16());
        } else {
            tracing::warn!(
                "{method} {path} {} {elapsed_ms}ms {}",
                status.as_u16(),
                String::from_utf8_lossy(&bytes)
            );
        }
        return Response::from_parts(parts, Body::from(bytes));
    }

    tracing::info!("{method} {path} {} {elapsed_ms}ms", status.as_u16());
    response
}
