//! Browser chat client, embedded as static assets and served by the gateway.
//!
//! Uses `rust-embed` to bake the `ui/` directory into the binary.
//! In debug mode (`debug-embed` feature), files are read from disk
//! so you can edit JS/CSS and just refresh the browser.

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use rust_embed::Embed;
use tracing::debug;

#[derive(Embed)]
#[folder = "ui/"]
struct UiAssets;

/// Build an axum `Router` that serves the embedded client.
///
/// Merge this **after** the relay routes so they take priority over the
/// catch-all.
pub fn ui_router() -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/{*path}", get(static_handler))
}

/// Names of all embedded assets.
pub fn asset_names() -> Vec<String> {
    UiAssets::iter().map(|name| name.into_owned()).collect()
}

async fn index_handler() -> Response {
    serve_file("index.html").unwrap_or_else(not_found)
}

async fn static_handler(Path(path): Path<String>) -> Response {
    // Unknown paths without an extension fall back to the client shell.
    serve_file(&path)
        .or_else(|| {
            if path.contains('.') {
                None
            } else {
                serve_file("index.html")
            }
        })
        .unwrap_or_else(not_found)
}

fn serve_file(path: &str) -> Option<Response> {
    let asset = UiAssets::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    debug!(%path, %mime, "Serving UI asset");
    Some(
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime.as_ref())],
            asset.data.into_owned(),
        )
            .into_response(),
    )
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html("<h1>404</h1>")).into_response()
}
