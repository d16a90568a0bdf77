use axum::{
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use rust_embed::RustEmbed;

/// Pre-built admin dashboard bundle, compiled into the binary.
#[derive(RustEmbed)]
#[folder = "assets/admin/"]
struct AdminAssets;

pub async fn serve_admin_root() -> Response {
    serve_asset("index.html")
}

/// Anything under `/admin` that is not a bundled asset falls back to the
/// SPA index so client-side routing works, with the embedded 404 page as
/// the last resort.
pub async fn serve_admin(Path(path): Path<String>) -> Response {
    let path = path.trim_start_matches('/');
    if AdminAssets::get(path).is_some() {
        return serve_asset(path);
    }
    if !path.contains('.') {
        return serve_asset("index.html");
    }
    not_found_page()
}

fn serve_asset(path: &str) -> Response {
    match AdminAssets::get(path) {
        Some(asset) => {
            let mime = mime_guess::from_path(path).first_or_else(|| mime_guess::mime::TEXT_HTML);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.to_string())],
                asset.data.into_owned(),
            )
                .into_response()
        }
        None => not_found_page(),
    }
}

fn not_found_page() -> Response {
    let body = AdminAssets::get("404.html")
        .map(|asset| asset.data.into_owned())
        .unwrap_or_else(|| b"404 - not found".to_vec());
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/html".to_string())],
        body,
    )
        .into_response()
}
