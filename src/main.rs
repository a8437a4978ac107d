// =============================================================================
// Aurora Prediction-Market Trading Engine — Main Entry Point
// =============================================================================
//
// The engine starts in Paper + Paused mode for safety on every boot. Users
// must explicitly switch to Live mode and resume active evaluation via the
// control API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod clock;
mod config;
mod decision_envelope;
mod discovery;
mod escalating_sl;
mod eval_loop;
mod exchange;
mod execution;
mod exits;
mod filters;
mod http_queue;
mod journal;
mod metrics;
mod orderbook;
mod reconcile;
mod resolution_tracker;
mod scoreboard;
mod streaming;
mod token_resolver;
mod types;
mod watchlist;
mod winprob;

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{validate_live_boot, LeagueTable, RuntimeConfig};
use crate::discovery::DiscoveryClient;
use crate::exchange::{ExchangeClient, HttpExchangeClient, ShadowExchangeClient};
use crate::resolution_tracker::ResolutionTracker;
use crate::types::{ExecutionMode, TradingMode};

fn parse_execution_mode(raw: &str) -> Option<ExecutionMode> {
    match raw.to_lowercase().as_str() {
        "paper" => Some(ExecutionMode::Paper),
        "shadow_live" => Some(ExecutionMode::ShadowLive),
        "live" => Some(ExecutionMode::Live),
        _ => None,
    }
}

/// One league's discovery tag, used to pull candidates from the events feed.
struct LeagueFeed {
    league: &'static str,
    tag_slug: &'static str,
}

const LEAGUE_FEEDS: &[LeagueFeed] = &[
    LeagueFeed { league: "nba", tag_slug: "nba" },
    LeagueFeed { league: "ncaab", tag_slug: "ncaab" },
    LeagueFeed { league: "epl", tag_slug: "epl" },
];

/// Ingest-time mirror of `Watchlist::apply_date_window`: candidates whose
/// end-date falls outside `[min_days_delta, max_days_delta]` are dropped
/// before they ever reach the watchlist, not just purged from it later.
fn within_date_window(end_date: &str, today: chrono::NaiveDate, min_days_delta: i64, max_days_delta: i64) -> bool {
    let Ok(end) = chrono::DateTime::parse_from_rfc3339(end_date) else { return true };
    let delta = (end.date_naive() - today).num_days();
    delta >= min_days_delta && delta <= max_days_delta
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Prediction-Market Engine — Starting Up     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    // SAFETY: active evaluation is always paused on boot regardless of what
    // was persisted — resuming it is an opt-in action through the control
    // API. Execution mode may come up as `live` via AURORA_MODE, but only
    // after passing the boot-time validation below; any failure there
    // forces a fall back to paper.
    config.trading_mode = TradingMode::Paused;

    if let Ok(funder) = std::env::var("AURORA_FUNDER_ADDRESS") {
        config.funder_address = funder;
    }

    let leagues = LeagueTable::load("leagues.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load league table, using built-in defaults");
        LeagueTable::builtin_default()
    });

    let requested_mode = std::env::var("AURORA_MODE").ok().and_then(|raw| parse_execution_mode(&raw)).unwrap_or(ExecutionMode::Paper);
    config.execution_mode = requested_mode;
    if requested_mode == ExecutionMode::Live {
        let credentials_path = std::env::var("AURORA_CREDENTIALS_PATH").unwrap_or_else(|_| "credentials.json".to_string());
        if let Err(e) = validate_live_boot(&config, &leagues, &credentials_path) {
            error!(error = %e, "live boot validation failed, falling back to paper mode");
            config.execution_mode = ExecutionMode::Paper;
        }
    }

    info!(
        trading_mode = %config.trading_mode,
        execution_mode = %config.execution_mode,
        "engine starting in SAFE mode (paper + paused)"
    );

    // ── 2. Build the exchange client ──────────────────────────────────────
    let exchange: Arc<dyn ExchangeClient> = match config.execution_mode {
        ExecutionMode::Paper | ExecutionMode::ShadowLive => Arc::new(ShadowExchangeClient),
        ExecutionMode::Live => {
            let api_key = std::env::var("POLYMARKET_API_KEY").unwrap_or_default();
            let secret = std::env::var("POLYMARKET_API_SECRET").unwrap_or_default();
            let base_url = std::env::var("POLYMARKET_CLOB_URL").unwrap_or_else(|_| "https://clob.polymarket.com".into());
            Arc::new(HttpExchangeClient::new(api_key, secret, base_url))
        }
    };

    let gamma_base_url = std::env::var("AURORA_GAMMA_URL").unwrap_or_else(|_| "https://gamma-api.polymarket.com".into());
    let book_base_url = std::env::var("AURORA_CLOB_URL").unwrap_or_else(|_| "https://clob.polymarket.com".into());
    let nba_base_url =
        std::env::var("AURORA_NBA_SCOREBOARD_URL").unwrap_or_else(|_| "https://site.api.espn.com/apis/site/v2/sports/basketball/nba".into());
    let ncaa_base_url = std::env::var("AURORA_NCAA_SCOREBOARD_URL")
        .unwrap_or_else(|_| "https://site.api.espn.com/apis/site/v2/sports/basketball/mens-college-basketball".into());
    let soccer_base_url = std::env::var("AURORA_SOCCER_SCOREBOARD_URL").unwrap_or_else(|_| "https://site.api.espn.com/apis/site/v2/sports/soccer".into());

    let scoreboard_cache_ttl_seconds = config.scoreboard_cache_ttl_seconds;

    // ── 3. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, leagues, exchange, "state"));
    let eval_loop = Arc::new(eval_loop::EvalLoop::new(book_base_url.clone(), nba_base_url, ncaa_base_url, soccer_base_url, scoreboard_cache_ttl_seconds));
    let resolution_tracker = Arc::new(ResolutionTracker::new(gamma_base_url.clone()));

    // ── 4. Spawn the streaming price client (reconnect-until-killed) ─────
    let streaming_url = std::env::var("AURORA_STREAMING_URL").unwrap_or_else(|_| "wss://ws-subscriptions-clob.polymarket.com/ws/market".into());
    {
        let streaming = state.streaming.clone();
        let (backoff_min, backoff_max) = {
            let cfg = state.runtime_config.read();
            (cfg.streaming.backoff_min_ms, cfg.streaming.backoff_max_ms)
        };
        tokio::spawn(async move {
            streaming::run_with_reconnect(streaming_url, streaming, backoff_min, backoff_max).await;
        });
    }

    // ── 5. Discovery loop — one pass per league every 60s ─────────────────
    {
        let state = state.clone();
        let discovery = DiscoveryClient::new(gamma_base_url);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                for feed in LEAGUE_FEEDS {
                    match state.http_queue.enqueue(discovery.fetch_candidates(feed.tag_slug, feed.league, 50)).await {
                        Ok(Ok(candidates)) => {
                            let now = clock::now_ms();
                            let today = Utc::now().date_naive();
                            let league_config = state.leagues.read().leagues.get(feed.league).cloned();
                            let mut new_tokens = Vec::new();
                            let mut skipped = 0;
                            for candidate in &candidates {
                                if let Some(cfg) = &league_config {
                                    if !within_date_window(&candidate.end_date, today, cfg.min_days_delta, cfg.max_days_delta) {
                                        skipped += 1;
                                        continue;
                                    }
                                }
                                new_tokens.extend(candidate.token_pair.iter().cloned());
                                state.watchlist.upsert(candidate, now);
                            }
                            if !new_tokens.is_empty() {
                                state.streaming.add_tokens(&new_tokens).await;
                            }
                            if !candidates.is_empty() {
                                info!(league = feed.league, count = candidates.len() - skipped, skipped, "discovery candidates upserted");
                            }
                        }
                        Ok(Err(e)) => warn!(league = feed.league, error = %e, "discovery fetch failed"),
                        Err(_) => warn!(league = feed.league, "discovery fetch dropped — http queue full"),
                    }
                }
            }
        });
    }

    // ── 6. Evaluation loop — one cycle every 2s ───────────────────────────
    {
        let state = state.clone();
        let eval_loop = eval_loop.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(2));
            loop {
                interval.tick().await;

                if state.runtime_config.read().trading_mode == TradingMode::Killed {
                    continue;
                }

                let now = clock::now_ms();
                let today = Utc::now().date_naive();
                let date_key = today.format("%Y-%m-%d").to_string();

                let runtime = state.runtime_config.read().clone();
                let leagues = state.leagues.read().clone();

                let summary = {
                    let mut metrics = state.metrics.write().await;
                    eval_loop
                        .run_cycle(
                            &state.watchlist,
                            &state.streaming,
                            &state.http_queue,
                            &mut metrics,
                            &state.execution,
                            state.exchange.as_ref(),
                            &state.journal,
                            &runtime,
                            &leagues,
                            now,
                            today,
                            &date_key,
                        )
                        .await
                };

                let had_updates = summary.signaled > 0 || summary.purged > 0 || summary.pending_opened > 0;
                for envelope in summary.decisions {
                    state.push_decision(envelope);
                }
                if had_updates {
                    state.increment_version();
                }

                let closed_by_exit = exits::run_exit_cycle(&state.watchlist, &state.execution, state.exchange.as_ref(), &state.journal, &runtime, &leagues, now, today).await;
                let closed_by_resolution = resolution_tracker.run_cycle(&state.watchlist, &state.execution, state.exchange.as_ref(), &state.journal, &runtime).await;
                if closed_by_exit > 0 || closed_by_resolution > 0 {
                    state.increment_version();
                }
            }
        });
    }

    // ── 7. Reconciliation loop ─────────────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                let interval_secs = state.runtime_config.read().reconcile_interval_seconds.max(1);
                tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;

                if state.runtime_config.read().execution_mode == ExecutionMode::Paper {
                    continue;
                }

                let funder = state.runtime_config.read().funder_address.clone();
                if funder.is_empty() {
                    continue;
                }

                match reconcile::reconcile_once(state.exchange.as_ref(), &state.execution, &funder).await {
                    Ok(result) => state.record_reconcile_ok(result),
                    Err(e) => {
                        state.record_reconcile_error(format!("{e}"));
                        warn!(error = %e, "reconciliation failed");
                    }
                }
            }
        });
    }

    // ── 8. Status API server ──────────────────────────────────────────────
    {
        let state = state.clone();
        let bind_addr = std::env::var("AURORA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
        tokio::spawn(async move {
            let app = api::rest::router(state);
            let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind API server");
            info!(addr = %bind_addr, "API server listening");
            axum::serve(listener, app).await.expect("API server failed");
        });
    }

    info!("all subsystems running, press ctrl+c to stop");

    // ── 9. Graceful shutdown ───────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    if let Err(e) = state.runtime_config.read().save("runtime_config.json") {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("aurora trading engine shut down complete");
    Ok(())
}
