use axum::{
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::Response,
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::error::ApiError;
use crate::state::AppState;

/// Streams an uploaded file from `<data_dir>/files/<entity>/<file>`.
pub async fn serve_file(
    State(state): State<AppState>,
    Path((entity, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let path = state
        .files
        .resolve(&entity, &file)
        .ok_or_else(|| ApiError::NotFound(format!("file `{file}` was not found")))?;

    let handle = File::open(&path).await?;
    let metadata = handle.metadata().await?;
    let stream = ReaderStream::new(handle);

    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, metadata.len())
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError::Internal(format!("could not build file response: {err}")))
}
