// =============================================================================
// Append-only JSONL journal
// =============================================================================
//
// Every terminal outcome (signal open/close/timeout, trade executed/failed)
// gets one line in the matching `*.jsonl` file under the state directory.
// No teacher file writes JSONL directly, but the idiom — `anyhow::Context`
// chains around `std::fs` writes — is the same one `runtime_config.rs` uses
// for its atomic temp+rename saves, just append-mode instead of replace-mode.
//
// Four files, each with an event-tagged schema: `signals.jsonl` tracks a
// signal's lifecycle (open/close/timeout), `executions.jsonl` tracks the
// underlying exchange fills, `price_ticks.jsonl` samples open positions at
// most once per `throttle_ms`, and `context_snapshots.jsonl` records the
// raw scoreboard context behind each tagged market for post-hoc calibration.
// =============================================================================

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;

use crate::execution::TradeRecord;
use crate::types::{CloseReason, TradeSide, TradeStatus};
use crate::watchlist::ContextSnapshot;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SignalEvent {
    SignalOpen {
        signal_id: String,
        condition_id: String,
        ts: i64,
        signal_type: Option<String>,
    },
    SignalClose {
        signal_id: String,
        condition_id: String,
        ts: i64,
        close_reason: CloseReason,
        win: bool,
        pnl_usd: f64,
        roi: f64,
    },
    SignalTimeout {
        signal_id: String,
        condition_id: String,
        ts: i64,
        reason: String,
        deadline_delta_ms: i64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    TradeExecuted {
        trade_id: String,
        side: TradeSide,
        ts: i64,
        slug: String,
        order_id: Option<String>,
        requested_shares: f64,
        filled_shares: f64,
        avg_fill_price: f64,
        spent_usd: f64,
        shadow: bool,
    },
    TradeFailed {
        trade_id: String,
        side: TradeSide,
        ts: i64,
        slug: String,
        reason: String,
    },
    SlSellFailed {
        trade_id: String,
        ts: i64,
        slug: String,
        reason: String,
    },
}

impl ExecutionEvent {
    /// Classify a `TradeRecord` into its journaled event shape. Stop-loss
    /// sells that exhaust their escalation ladder report `SlSellFailed`
    /// rather than the generic `TradeFailed`.
    fn from_trade(trade: &TradeRecord) -> Self {
        match trade.status {
            TradeStatus::Filled | TradeStatus::Partial | TradeStatus::Shadow => ExecutionEvent::TradeExecuted {
                trade_id: trade.key.clone(),
                side: trade.side,
                ts: trade.updated_ts,
                slug: trade.slug.clone(),
                order_id: trade.order_id.clone(),
                requested_shares: trade.requested_shares,
                filled_shares: trade.filled_shares,
                avg_fill_price: trade.avg_fill_price,
                spent_usd: trade.spent_usd,
                shadow: trade.status == TradeStatus::Shadow,
            },
            _ if trade.side == TradeSide::Sell && trade.close_reason == Some(CloseReason::StopLoss) => ExecutionEvent::SlSellFailed {
                trade_id: trade.key.clone(),
                ts: trade.updated_ts,
                slug: trade.slug.clone(),
                reason: trade.error.clone().unwrap_or_default(),
            },
            _ => ExecutionEvent::TradeFailed {
                trade_id: trade.key.clone(),
                side: trade.side,
                ts: trade.updated_ts,
                slug: trade.slug.clone(),
                reason: trade.error.clone().unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceTick {
    pub signal_id: String,
    pub ts: i64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub spread: Option<f64>,
    pub entry_price: f64,
    pub shares: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshotRecord {
    pub condition_id: String,
    pub ts: i64,
    pub context: ContextSnapshot,
}

pub struct Journal {
    dir: PathBuf,
    lock: Mutex<()>,
    last_tick_ts: Mutex<HashMap<String, i64>>,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), lock: Mutex::new(()), last_tick_ts: Mutex::new(HashMap::new()) }
    }

    fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Append one JSON line to `file_name`, creating the state directory and
    /// file as needed. Serialization failures are logged by the caller via
    /// the returned `Result`, never panicked on.
    pub fn append(&self, file_name: &str, record: &impl Serialize) -> Result<()> {
        let _guard = self.lock.lock();
        std::fs::create_dir_all(&self.dir).with_context(|| format!("creating journal dir {}", self.dir.display()))?;
        let line = serde_json::to_string(record).context("serializing journal record")?;
        let path: &Path = &self.path_for(file_name);
        let mut file = OpenOptions::new().create(true).append(true).open(path).with_context(|| format!("opening journal file {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("appending to journal file {}", path.display()))?;
        Ok(())
    }

    pub fn log_signal(&self, event: &SignalEvent) -> Result<()> {
        self.append("signals.jsonl", event)
    }

    pub fn log_execution(&self, trade: &TradeRecord) -> Result<()> {
        self.append("executions.jsonl", &ExecutionEvent::from_trade(trade))
    }

    /// Throttled to at most one tick per `signal_id` per `throttle_ms`; a
    /// call inside the window is silently dropped rather than erroring.
    pub fn log_price_tick(&self, tick: PriceTick, throttle_ms: i64) -> Result<()> {
        {
            let mut last = self.last_tick_ts.lock();
            let prev = last.get(&tick.signal_id).copied().unwrap_or(0);
            if tick.ts - prev < throttle_ms {
                return Ok(());
            }
            last.insert(tick.signal_id.clone(), tick.ts);
        }
        self.append("price_ticks.jsonl", &tick)
    }

    pub fn log_context_snapshot(&self, condition_id: &str, ts: i64, context: &ContextSnapshot) -> Result<()> {
        self.append("context_snapshots.jsonl", &ContextSnapshotRecord { condition_id: condition_id.to_string(), ts, context: context.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_creates_dir_and_writes_line() {
        let dir = std::env::temp_dir().join(format!("aurora-journal-test-{}", std::process::id()));
        let journal = Journal::new(&dir);
        journal.append("signals.jsonl", &json!({"event": "signal_open", "signal_id": "s1"})).unwrap();
        let contents = std::fs::read_to_string(dir.join("signals.jsonl")).unwrap();
        assert!(contents.contains("signal_open"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn append_appends_multiple_lines() {
        let dir = std::env::temp_dir().join(format!("aurora-journal-test2-{}", std::process::id()));
        let journal = Journal::new(&dir);
        journal.append("x.jsonl", &json!({"n": 1})).unwrap();
        journal.append("x.jsonl", &json!({"n": 2})).unwrap();
        let contents = std::fs::read_to_string(dir.join("x.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn log_signal_writes_tagged_event() {
        let dir = std::env::temp_dir().join(format!("aurora-journal-test3-{}", std::process::id()));
        let journal = Journal::new(&dir);
        journal
            .log_signal(&SignalEvent::SignalOpen { signal_id: "s1".into(), condition_id: "c1".into(), ts: 0, signal_type: None })
            .unwrap();
        let contents = std::fs::read_to_string(dir.join("signals.jsonl")).unwrap();
        assert!(contents.contains("\"event\":\"signal_open\""));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn log_price_tick_throttles_within_window() {
        let dir = std::env::temp_dir().join(format!("aurora-journal-test4-{}", std::process::id()));
        let journal = Journal::new(&dir);
        let tick = |ts: i64| PriceTick { signal_id: "s1".into(), ts, bid: Some(0.5), ask: Some(0.55), spread: Some(0.05), entry_price: 0.5, shares: 10.0, unrealized_pnl: 0.0 };
        journal.log_price_tick(tick(0), 30_000).unwrap();
        journal.log_price_tick(tick(5_000), 30_000).unwrap();
        journal.log_price_tick(tick(31_000), 30_000).unwrap();
        let contents = std::fs::read_to_string(dir.join("price_ticks.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }
}
