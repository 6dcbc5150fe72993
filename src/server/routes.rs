//! Control-plane route handlers.
//!
//! Every handler answers JSON. Mutating endpoints reply with
//! `{"success": true, "message": ...}` or `{"success": false, "error": ...}`
//! so callers can branch on a single field.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::engine::BotController;
use crate::types::BotError;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub capital: Decimal,
}

fn ok(message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": message.into() })),
    )
}

fn fail(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "success": false, "error": error.into() })),
    )
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "cascade" }))
}

/// `POST /start` with `{"capital": 1000}`.
pub async fn start(
    State(controller): State<Arc<BotController>>,
    Json(req): Json<StartRequest>,
) -> (StatusCode, Json<Value>) {
    match controller.start(req.capital).await {
        Ok(()) => ok(format!("Cascade started with {} capital", req.capital)),
        Err(e @ BotError::AlreadyRunning) => fail(StatusCode::CONFLICT, e.to_string()),
        Err(e @ (BotError::InvalidCapital(_) | BotError::InsufficientBalance { .. })) => {
            fail(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Start request failed");
            fail(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// `POST /stop`
pub async fn stop(State(controller): State<Arc<BotController>>) -> (StatusCode, Json<Value>) {
    if controller.stop().await {
        ok("Stop requested, positions are being unwound")
    } else {
        fail(StatusCode::CONFLICT, "Bot is not running")
    }
}

/// `GET /status`
pub async fn status(State(controller): State<Arc<BotController>>) -> Json<Value> {
    let state = controller.state();
    let status = *state.status.read().await;
    let positions = state.positions.read().await.clone();
    let ledger = state.ledger.read().await.clone();
    let last_update = *state.last_update.read().await;

    Json(json!({
        "status": format!("{status:?}"),
        "status_label": status.to_string(),
        "positions": positions,
        "position_count": positions.len(),
        "total_capital": ledger.total_capital,
        "leveraged_capital": ledger.leveraged_capital,
        "leverage_ratio": ledger.leverage_ratio(),
        "margin_level": ledger.margin_level,
        "started_at": ledger.started_at,
        "last_update": last_update,
    }))
}

/// `GET /balances` — live margin account balances, non-zero entries only.
pub async fn balances(
    State(controller): State<Arc<BotController>>,
) -> (StatusCode, Json<Value>) {
    match controller.exchange().account().await {
        Ok(account) => {
            let assets: Vec<Value> = account
                .nonzero_assets()
                .into_iter()
                .map(|a| {
                    json!({
                        "asset": a.asset,
                        "free": a.free,
                        "locked": a.locked,
                        "borrowed": a.borrowed,
                        "net_asset": a.net_asset,
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(json!({
                    "margin_level": account.margin_level,
                    "total_net_asset_of_btc": account.total_net_asset_of_btc,
                    "balances": assets,
                })),
            )
        }
        Err(e) => {
            warn!(error = %e, "Balance query failed");
            fail(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// `GET /assets` — the configured catalog with ranking scores, best first.
pub async fn assets(State(controller): State<Arc<BotController>>) -> Json<Value> {
    let ranked = controller.ranked_catalog();
    Json(json!({ "assets": ranked }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
