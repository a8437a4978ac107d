// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked via
// the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::types::{TradeSide, TradeStatus, TradingMode};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/kill", post(control_kill))
        .route("/api/v1/heartbeat", post(heartbeat))
        .route("/api/v1/trade-journal", get(trade_journal))
        .route("/api/v1/trade-journal/stats", get(trade_journal_stats))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse { status: "ok", state_version: state.current_state_version(), server_time: chrono::Utc::now().timestamp_millis() };
    Json(resp)
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.build_snapshot().await;
    Json(snapshot)
}

// =============================================================================
// Positions (authenticated)
// =============================================================================

async fn positions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let open = state.watchlist.all().into_iter().filter(|r| matches!(r.status, crate::types::MarketStatus::Signaled | crate::types::MarketStatus::Traded));
    let positions: Vec<_> = open.collect();
    Json(positions)
}

// =============================================================================
// Decisions (authenticated)
// =============================================================================

async fn decisions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let decisions = state.recent_decisions.read().clone();
    Json(decisions)
}

// =============================================================================
// Control endpoints (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    trading_mode: String,
    message: String,
}

async fn control_pause(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Paused;
    }
    state.increment_version();
    info!("trading paused via API");

    Json(ControlResponse { trading_mode: TradingMode::Paused.to_string(), message: "trading paused".to_string() })
}

async fn control_resume(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Active;
    }
    state.increment_version();
    info!("trading resumed via API");

    Json(ControlResponse { trading_mode: TradingMode::Active.to_string(), message: "trading resumed".to_string() })
}

async fn control_kill(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Killed;
    }
    state.increment_version();
    warn!("trading killed via API");

    Json(ControlResponse { trading_mode: TradingMode::Killed.to_string(), message: "trading killed — manual restart required".to_string() })
}

// =============================================================================
// Heartbeat (authenticated)
// =============================================================================

async fn heartbeat(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    *state.last_ws_user_event.write() = std::time::Instant::now();
    state.increment_version();

    Json(serde_json::json!({
        "status": "ok",
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Trade Journal (authenticated)
// =============================================================================

/// One closed round-trip, paired from the buy/sell trade records sharing a
/// signal id. A buy with no matching sell yet is still open and excluded.
#[derive(Debug, Clone, Serialize)]
struct ClosedTrade {
    signal_id: String,
    slug: String,
    entry_price: Option<f64>,
    close_reason: Option<crate::types::CloseReason>,
    spent_usd: f64,
    proceeds_usd: f64,
    realized_pnl: f64,
}

fn closed_trades(state: &AppState) -> Vec<ClosedTrade> {
    let all = state.execution.all();
    let mut buys = HashMap::new();
    let mut sells = HashMap::new();
    for trade in all {
        match trade.side {
            TradeSide::Buy => {
                buys.insert(trade.signal_id.clone(), trade);
            }
            TradeSide::Sell => {
                sells.insert(trade.signal_id.clone(), trade);
            }
        }
    }

    let mut closed = Vec::new();
    for (signal_id, sell) in sells {
        if !matches!(sell.status, TradeStatus::Filled | TradeStatus::Shadow) {
            continue;
        }
        let Some(buy) = buys.get(&signal_id) else { continue };
        closed.push(ClosedTrade {
            signal_id,
            slug: sell.slug.clone(),
            entry_price: buy.entry_price,
            close_reason: sell.close_reason,
            spent_usd: buy.spent_usd,
            proceeds_usd: sell.spent_usd,
            realized_pnl: sell.spent_usd - buy.spent_usd,
        });
    }
    closed.sort_by_key(|c| c.signal_id.clone());
    closed
}

async fn trade_journal(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(closed_trades(&state))
}

async fn trade_journal_stats(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let closed = closed_trades(&state);
    let total_trades = closed.len();
    if total_trades == 0 {
        return Json(serde_json::json!({
            "total_trades": 0,
            "win_rate": 0.0,
            "total_net_pnl": 0.0,
            "profit_factor": 0.0,
        }));
    }
    let wins = closed.iter().filter(|c| c.realized_pnl > 0.0).count();
    let win_rate = wins as f64 / total_trades as f64;
    let total_net_pnl: f64 = closed.iter().map(|c| c.realized_pnl).sum();
    let gross_profit: f64 = closed.iter().filter(|c| c.realized_pnl > 0.0).map(|c| c.realized_pnl).sum();
    let gross_loss: f64 = closed.iter().filter(|c| c.realized_pnl < 0.0).map(|c| c.realized_pnl.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    Json(serde_json::json!({
        "total_trades": total_trades,
        "win_rate": win_rate,
        "total_net_pnl": total_net_pnl,
        "profit_factor": profit_factor,
    }))
}
