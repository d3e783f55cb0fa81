//! Axum-based HTTP relay server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::HeaderValue,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::handlers::{chat::chat, speak::speak, speak::transcribe_upload, voice::voice_chat};
use crate::rate_limit::rate_limit_middleware;
use crate::state::GatewayState;

/// Build the full application router, serving the UI if config enables it.
pub fn router(state: Arc<GatewayState>) -> Router {
    let ui_enabled = state.config.ui_enabled();
    build_router(state, ui_enabled)
}

/// Relay routes are registered before the UI so they take priority over its
/// catch-all.
fn build_router(state: Arc<GatewayState>, ui_enabled: bool) -> Router {
    let relay = Router::new()
        .route("/chat", post(chat))
        .route("/voice-chat", post(voice_chat))
        .route("/speak", post(speak))
        .route("/transcribe", post(transcribe_upload))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

    #[allow(unused_mut)]
    let mut app = Router::new().route("/health", get(health_handler)).merge(relay);

    #[cfg(feature = "metrics")]
    {
        app = app
            .route("/metrics", get(metrics_handler))
            .route_layer(middleware::from_fn(crate::metrics::track_requests));
    }

    let cors = cors_layer(state.config.cors_origins());
    let body_limit = state.config.max_upload_bytes();

    let mut app = app.with_state(state);
    if ui_enabled {
        app = app.merge(voxrelay_web::ui_router());
    }

    app.layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// When `ui_enabled` is true, the browser client is served at `/`.
pub async fn start_gateway(
    state: Arc<GatewayState>,
    port: u16,
    ui_enabled: bool,
) -> anyhow::Result<()> {
    let bind_addr = state.config.gateway_bind();

    let app = build_router(state, ui_enabled);
    if ui_enabled {
        info!("Browser client available at http://{bind_addr}:{port}/");
    }

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.config.model(),
        "stt": state.stt.as_ref().map(|s| s.id()),
        "tts": state.tts.as_ref().map(|t| t.id()),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (axum::http::StatusCode::OK, handle.render()),
        None => (
            axum::http::StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}
