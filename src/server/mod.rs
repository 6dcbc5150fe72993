//! HTTP control plane.
//!
//! A small JSON API for operating the bot: start a cascade with a given
//! amount of capital, request a stop, and inspect status, balances, and
//! the configured asset catalog. No HTML is served; this is an API for
//! curl and automation, not a UI.

pub mod routes;

use anyhow::{Context, Result};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::engine::BotController;

/// Build the control-plane router.
pub fn router(controller: Arc<BotController>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/start", post(routes::start))
        .route("/stop", post(routes::stop))
        .route("/status", get(routes::status))
        .route("/balances", get(routes::balances))
        .route("/assets", get(routes::assets))
        .layer(cors)
        .with_state(controller)
}

/// Bind and serve the control plane until the process exits.
pub async fn serve(controller: Arc<BotController>, port: u16) -> Result<()> {
    let app = router(controller);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind control plane to {addr}"))?;

    info!(%addr, "Control plane listening");
    axum::serve(listener, app)
        .await
        .context("Control plane server error")?;
    Ok(())
}
