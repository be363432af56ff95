use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    http::HeaderValue,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::Config,
    handlers::{health_check, launch_edge},
    rtc::WebRtcPeerFactory,
    state::AppState,
    websocket::websocket_handler,
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/launch-edge", get(launch_edge).post(launch_edge))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::permissive().allow_origin(AllowOrigin::list(allowed))
}

/// Bind and serve until the process is interrupted.
pub async fn run(config: Config) -> Result<()> {
    let factory = Arc::new(WebRtcPeerFactory::new(config.ice.clone()));
    let state = AppState::new(factory, &config.default_launch_url);

    if let Some(max_age) = config.stale_session_after {
        info!(max_age_secs = max_age.as_secs(), "stale session sweep enabled");
        state.lifecycle.spawn_stale_sweep(max_age);
    }

    let app = build_router(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Beach Pier listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
