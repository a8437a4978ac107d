// =============================================================================
// Shared types used across the Aurora prediction-market trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Lifecycle status of a watchlist market. Transitions are the sole
/// responsibility of the evaluation loop (see `eval_loop.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Watching,
    PendingSignal,
    Signaled,
    Traded,
    Closed,
    Expired,
}

impl Default for MarketStatus {
    fn default() -> Self {
        Self::Watching
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Watching => "watching",
            Self::PendingSignal => "pending_signal",
            Self::Signaled => "signaled",
            Self::Traded => "traded",
            Self::Closed => "closed",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Which side of a near-margin confirmation a quote qualified on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NearBy {
    Ask,
    Spread,
    Both,
    None,
}

/// Classification of a promoted signal, derived from which near-margin side
/// qualified it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Microstructure,
    Highprob,
    Unknown,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Microstructure => "microstructure",
            Self::Highprob => "highprob",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Execution mode of the engine. `Paper` is the safe default; live trading
/// must be opted into explicitly, mirroring the teacher's boot-time safety
/// override to Demo+Paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Paper,
    ShadowLive,
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Paper => "paper",
            Self::ShadowLive => "shadow_live",
            Self::Live => "live",
        };
        write!(f, "{s}")
    }
}

/// Whether the engine is actively evaluating, paused, or killed. Orthogonal
/// to `ExecutionMode`: a `Live` engine can still be `Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Active,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Killed => "killed",
        };
        write!(f, "{s}")
    }
}

/// Source of the most recently observed quote for a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Http,
    Ws,
}

/// A best-bid/best-ask quote with derived spread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

impl Quote {
    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid, self.best_ask) {
            (Some(b), Some(a)) => Some((a - b).max(0.0)),
            _ => None,
        }
    }
}

/// Side of an execution trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Status of a single execution trade record, keyed by `side:signal_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Queued,
    Sent,
    Filled,
    Partial,
    Failed,
    Error,
    Shadow,
    OrphanClosed,
}

/// Why a sell was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Resolved,
    StopLoss,
    ContextSl,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Resolved => "resolved",
            Self::StopLoss => "stop_loss",
            Self::ContextSl => "context_sl",
        };
        write!(f, "{s}")
    }
}

/// Live game state for a scoreboard-backed context snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Pre,
    In,
    Post,
}

/// Balance snapshot for a single asset read from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}
