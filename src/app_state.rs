// =============================================================================
// Central Application State — Aurora Prediction-Market Trading Engine
// =============================================================================
//
// The single source of truth for the entire engine. All subsystems hold Arc
// references to their own state; AppState ties them together and provides a
// unified snapshot for the dashboard API and WebSocket feed.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - Arc wrappers for subsystem engines that manage their own interior
//     mutability.
//
// The field set is new (watchlist/execution/metrics instead of candles/
// positions/risk) but the aggregate's architecture — monotonic version
// counter, push-based snapshot, capped ring buffers of recent notable
// events — is unchanged.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{LeagueTable, RuntimeConfig};
use crate::decision_envelope::DecisionEnvelope;
use crate::exchange::ExchangeClient;
use crate::execution::{ExecutionBridge, TradeRecord};
use crate::http_queue::HttpQueue;
use crate::journal::Journal;
use crate::metrics::{Health, Metrics};
use crate::reconcile::ReconcileResult;
use crate::streaming::{StreamingClient, StreamingSnapshot};
use crate::types::{MarketStatus, TradeSide, TradeStatus};
use crate::watchlist::{MarketRecord, Watchlist};

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// Optional machine-readable error code.
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Monotonically increasing version counter. Incremented on every
    /// meaningful state mutation. The WebSocket feed uses this to detect
    /// changes and push updates.
    pub state_version: AtomicU64,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub leagues: Arc<RwLock<LeagueTable>>,

    // ── Market discovery / tracking ─────────────────────────────────────
    pub watchlist: Arc<Watchlist>,
    pub streaming: Arc<StreamingClient>,
    pub http_queue: Arc<HttpQueue>,

    // ── Execution ────────────────────────────────────────────────────────
    pub execution: Arc<ExecutionBridge>,
    pub exchange: Arc<dyn ExchangeClient>,

    // ── Rolling metrics ──────────────────────────────────────────────────
    pub metrics: tokio::sync::RwLock<Metrics>,

    // ── Persistence ──────────────────────────────────────────────────────
    pub journal: Arc<Journal>,

    // ── Decision Audit Trail ────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<DecisionEnvelope>>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Operational Status ──────────────────────────────────────────────
    pub ws_user_connected: RwLock<bool>,
    pub last_ws_user_event: RwLock<Instant>,
    pub last_reconcile_ok: RwLock<Option<Instant>>,
    pub last_reconcile_result: RwLock<Option<ReconcileResult>>,
    pub last_reconcile_error: RwLock<Option<String>>,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: Instant,
}

impl AppState {
    /// Construct a new `AppState` from the given runtime configuration,
    /// league table, exchange client and on-disk journal directory.
    pub fn new(
        config: RuntimeConfig,
        leagues: LeagueTable,
        exchange: Arc<dyn ExchangeClient>,
        journal_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        let streaming_chunk = config.streaming.subscribe_chunk_size;
        let http_max_concurrency = config.http.max_concurrency;
        let http_queue_max = config.http.queue_max;

        Self {
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),

            runtime_config: Arc::new(RwLock::new(config)),
            leagues: Arc::new(RwLock::new(leagues)),

            watchlist: Arc::new(Watchlist::new()),
            streaming: Arc::new(StreamingClient::new(streaming_chunk)),
            http_queue: Arc::new(HttpQueue::new(http_max_concurrency, http_queue_max)),

            execution: Arc::new(ExecutionBridge::new()),
            exchange,

            metrics: tokio::sync::RwLock::new(Metrics::new()),
            journal: Arc::new(Journal::new(journal_dir)),

            recent_decisions: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),

            ws_user_connected: RwLock::new(false),
            last_ws_user_event: RwLock::new(Instant::now()),
            last_reconcile_ok: RwLock::new(None),
            last_reconcile_result: RwLock::new(None),
            last_reconcile_error: RwLock::new(None),

            start_time: Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    /// Atomically increment the state version. Call this after every
    /// meaningful mutation to signal WebSocket clients that fresh data is
    /// available.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Read the current state version without modifying it.
    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message. The ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted when the limit is
    /// reached.
    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    /// Record an error with an optional machine-readable code.
    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord { message: msg, code, at: Utc::now().to_rfc3339() };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Decision Audit ──────────────────────────────────────────────────

    /// Record a decision envelope. The ring buffer is capped at
    /// [`MAX_RECENT_DECISIONS`]; oldest entries are evicted when the limit
    /// is reached.
    pub fn push_decision(&self, envelope: DecisionEnvelope) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(envelope);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }

        self.increment_version();
    }

    // ── Reconcile status ─────────────────────────────────────────────────

    pub fn record_reconcile_ok(&self, result: ReconcileResult) {
        *self.last_reconcile_ok.write() = Some(Instant::now());
        *self.last_reconcile_result.write() = Some(result);
        *self.last_reconcile_error.write() = None;
        self.increment_version();
    }

    pub fn record_reconcile_error(&self, error: String) {
        *self.last_reconcile_error.write() = Some(error);
        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the entire engine state.
    ///
    /// This is the payload sent to the dashboard via the REST
    /// `GET /api/v1/state` endpoint and the WebSocket push feed.
    pub async fn build_snapshot(&self) -> StateSnapshot {
        let now = Utc::now();

        // ── Metrics / health ─────────────────────────────────────────
        // Read this first so the non-`Send` parking_lot guards below are
        // never held across an `.await` point.
        let metrics = self.metrics.read().await;
        let metrics_snapshot = MetricsSnapshot {
            health: metrics.health(),
            recent_signals: metrics.recent_signals(),
            recent_pending_enters: metrics.recent_pending_enters(),
            recent_pending_timeouts: metrics.recent_pending_timeouts(),
        };
        drop(metrics);

        let config = self.runtime_config.read();
        let version = self.current_state_version();

        // ── Truth header ────────────────────────────────────────────
        let ws_user_event_age_ms = self.last_ws_user_event.read().elapsed().as_millis() as u64;
        let reconcile_last_ok_age_s = self.last_reconcile_ok.read().map(|t| t.elapsed().as_secs());

        let no_go_reason = match config.trading_mode {
            crate::types::TradingMode::Killed => Some("killed".to_string()),
            crate::types::TradingMode::Paused => Some("paused".to_string()),
            crate::types::TradingMode::Active => None,
        };

        let truth = TruthHeader {
            ws_mode: "streaming+http".to_string(),
            ws_user_connected: *self.ws_user_connected.read(),
            last_ws_user_event_age_ms: ws_user_event_age_ms,
            reconcile_last_ok_age_s,
            reconcile_last_error: self.last_reconcile_error.read().clone(),
            no_go_reason,
            state_version: version,
            ws_sequence_number: self.ws_sequence_number.load(Ordering::SeqCst),
            trading_mode: config.trading_mode.to_string(),
            execution_mode: config.execution_mode.to_string(),
            server_time: now.timestamp_millis(),
        };

        // ── Watchlist summary ───────────────────────────────────────
        let all_markets = self.watchlist.all();
        let mut by_status = WatchlistCounts::default();
        for record in &all_markets {
            match record.status {
                MarketStatus::Watching => by_status.watching += 1,
                MarketStatus::PendingSignal => by_status.pending_signal += 1,
                MarketStatus::Signaled => by_status.signaled += 1,
                MarketStatus::Traded => by_status.traded += 1,
                MarketStatus::Closed => by_status.closed += 1,
                MarketStatus::Expired => by_status.expired += 1,
            }
        }
        let open_positions: Vec<MarketRecord> =
            all_markets.into_iter().filter(|r| matches!(r.status, MarketStatus::Signaled | MarketStatus::Traded)).collect();

        let watchlist_summary = WatchlistSummary { total: self.watchlist.len(), by_status, open_positions };

        // ── Execution summary ───────────────────────────────────────
        let all_trades = self.execution.all();
        let open_trade_count = self.execution.open_trade_count();
        let exposure_usd: f64 = all_trades
            .iter()
            .filter(|t| t.side == TradeSide::Buy && matches!(t.status, TradeStatus::Filled | TradeStatus::Partial))
            .map(|t| t.spent_usd)
            .sum();
        let failed_today = all_trades.iter().filter(|t| t.side == TradeSide::Buy && t.status == TradeStatus::Failed).count();

        let execution_summary = ExecutionSummary {
            open_trade_count,
            exposure_usd,
            total_trades: all_trades.len(),
            failed_buys: failed_today,
            recent_trades: all_trades.into_iter().rev().take(50).collect(),
        };

        let runtime_config = RuntimeConfigSummary {
            execution_mode: config.execution_mode.to_string(),
            trading_mode: config.trading_mode.to_string(),
            watchlist_ttl_minutes: config.watchlist_ttl_minutes,
            max_watchlist: config.max_watchlist,
            cooldown_seconds: config.cooldown_seconds,
            pending_window_ms: config.pending_window_ms,
            budget_usd: config.execution.budget_usd,
            max_daily_trades: config.execution.max_daily_trades,
            max_concurrent_open: config.execution.max_concurrent_open,
            max_total_exposure_usd: config.execution.max_total_exposure_usd,
        };
        drop(config);

        StateSnapshot {
            state_version: version,
            server_time: now.timestamp_millis(),
            truth,
            watchlist: watchlist_summary,
            execution: execution_summary,
            metrics: metrics_snapshot,
            streaming: self.streaming.snapshot(),
            http_dropped_count: self.http_queue.dropped_count(),
            recent_decisions: self.recent_decisions.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
            runtime_config,
            reconcile: self.last_reconcile_result.read().clone(),
        }
    }
}

// =============================================================================
// Snapshot types
// =============================================================================

/// Full engine state snapshot sent to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub truth: TruthHeader,
    pub watchlist: WatchlistSummary,
    pub execution: ExecutionSummary,
    pub metrics: MetricsSnapshot,
    pub streaming: StreamingSnapshot,
    pub http_dropped_count: u64,
    pub recent_decisions: Vec<DecisionEnvelope>,
    pub recent_errors: Vec<ErrorRecord>,
    pub runtime_config: RuntimeConfigSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileResult>,
}

/// Operational truth header — the dashboard's primary status banner.
#[derive(Debug, Clone, Serialize)]
pub struct TruthHeader {
    pub ws_mode: String,
    pub ws_user_connected: bool,
    pub last_ws_user_event_age_ms: u64,
    pub reconcile_last_ok_age_s: Option<u64>,
    pub reconcile_last_error: Option<String>,
    pub no_go_reason: Option<String>,
    pub state_version: u64,
    pub ws_sequence_number: u64,
    pub trading_mode: String,
    pub execution_mode: String,
    pub server_time: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WatchlistCounts {
    pub watching: usize,
    pub pending_signal: usize,
    pub signaled: usize,
    pub traded: usize,
    pub closed: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchlistSummary {
    pub total: usize,
    pub by_status: WatchlistCounts,
    pub open_positions: Vec<MarketRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub open_trade_count: usize,
    pub exposure_usd: f64,
    pub total_trades: usize,
    pub failed_buys: usize,
    pub recent_trades: Vec<TradeRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub health: Health,
    pub recent_signals: Vec<crate::metrics::SignalSnapshot>,
    pub recent_pending_enters: Vec<String>,
    pub recent_pending_timeouts: Vec<String>,
}

/// Summary of runtime config for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigSummary {
    pub execution_mode: String,
    pub trading_mode: String,
    pub watchlist_ttl_minutes: f64,
    pub max_watchlist: usize,
    pub cooldown_seconds: i64,
    pub pending_window_ms: i64,
    pub budget_usd: f64,
    pub max_daily_trades: u32,
    pub max_concurrent_open: u32,
    pub max_total_exposure_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ShadowExchangeClient;

    fn make_state() -> AppState {
        let dir = std::env::temp_dir().join(format!("aurora-appstate-test-{}", std::process::id()));
        AppState::new(RuntimeConfig::default(), LeagueTable::builtin_default(), Arc::new(ShadowExchangeClient), dir)
    }

    #[test]
    fn increment_version_is_monotonic() {
        let state = make_state();
        let before = state.current_state_version();
        state.increment_version();
        assert_eq!(state.current_state_version(), before + 1);
    }

    #[test]
    fn push_decision_caps_ring_buffer() {
        let state = make_state();
        for i in 0..150 {
            state.push_decision(DecisionEnvelope::allow(format!("sig{i}"), "c1", crate::types::NearBy::None));
        }
        assert_eq!(state.recent_decisions.read().len(), MAX_RECENT_DECISIONS);
    }

    #[test]
    fn push_error_caps_ring_buffer() {
        let state = make_state();
        for i in 0..80 {
            state.push_error(format!("error {i}"));
        }
        assert_eq!(state.recent_errors.read().len(), MAX_RECENT_ERRORS);
    }

    #[tokio::test]
    async fn build_snapshot_reflects_trading_mode_as_no_go_reason() {
        let state = make_state();
        let snapshot = state.build_snapshot().await;
        assert_eq!(snapshot.truth.no_go_reason.as_deref(), Some("paused"));
        assert_eq!(snapshot.truth.trading_mode, "paused");
    }
}
