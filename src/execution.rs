// =============================================================================
// Execution bridge (component L) — idempotent buy/sell
// =============================================================================
//
// Keeps one `TradeRecord` per `side:signal_id` idempotency key. Rewritten
// from the teacher's `ExecutionResult` enum / demo-vs-live dispatch shape:
// where the teacher simulated locally in demo mode, this bridge routes
// through `ExecutionMode` to either the real `ExchangeClient` (live) or a
// local synthetic fill (paper/shadow_live), and fills the idempotency gap
// the teacher never needed (a Binance order is never retried by signal id).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::now_ms;
use crate::config::ExecutionConfig;
use crate::escalating_sl::run_escalating_sell;
use crate::exchange::ExchangeClient;
use crate::types::{CloseReason, ExecutionMode, TradeSide, TradeStatus, TradingMode};

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub key: String,
    pub side: TradeSide,
    pub signal_id: String,
    pub slug: String,
    pub token_id: String,
    pub status: TradeStatus,
    pub requested_shares: f64,
    pub filled_shares: f64,
    pub avg_fill_price: f64,
    pub spent_usd: f64,
    pub entry_price: Option<f64>,
    pub close_reason: Option<CloseReason>,
    pub order_id: Option<String>,
    pub created_ts: i64,
    pub updated_ts: i64,
    pub error: Option<String>,
}

/// Realized PnL/win/roi for a closed round-trip, paired by signal id.
/// Grounded on `api/rest.rs::closed_trades`'s pairing logic.
pub fn compute_pnl(buy: &TradeRecord, sell: &TradeRecord) -> (f64, bool, f64) {
    let pnl_usd = sell.spent_usd - buy.spent_usd;
    let win = pnl_usd > 0.0;
    let roi = if buy.spent_usd > 0.0 { pnl_usd / buy.spent_usd } else { 0.0 };
    (pnl_usd, win, roi)
}

fn buy_key(signal_id: &str) -> String {
    format!("buy:{signal_id}")
}

fn sell_key(signal_id: &str) -> String {
    format!("sell:{signal_id}")
}

pub struct ExecutionBridge {
    trades: RwLock<HashMap<String, TradeRecord>>,
    daily_trade_count: AtomicU32,
    daily_date_key: RwLock<String>,
    exposure_usd: RwLock<f64>,
}

impl ExecutionBridge {
    pub fn new() -> Self {
        Self {
            trades: RwLock::new(HashMap::new()),
            daily_trade_count: AtomicU32::new(0),
            daily_date_key: RwLock::new(String::new()),
            exposure_usd: RwLock::new(0.0),
        }
    }

    pub fn get(&self, key: &str) -> Option<TradeRecord> {
        self.trades.read().get(key).cloned()
    }

    pub fn get_buy(&self, signal_id: &str) -> Option<TradeRecord> {
        self.get(&buy_key(signal_id))
    }

    pub fn open_trade_count(&self) -> usize {
        self.trades.read().values().filter(|t| t.side == TradeSide::Buy && t.status == TradeStatus::Filled).count()
    }

    fn roll_daily_counter_if_needed(&self, date_key: &str) {
        let mut current = self.daily_date_key.write();
        if *current != date_key {
            *current = date_key.to_string();
            self.daily_trade_count.store(0, Ordering::SeqCst);
        }
    }

    /// Caps shared with `filters.rs`'s per-market gates: daily trade count,
    /// concurrent open positions, total exposure, and an optional allowlist.
    fn check_execution_caps(&self, slug: &str, config: &ExecutionConfig) -> Result<(), &'static str> {
        if let Some(allowlist) = &config.allowlist {
            if !allowlist.iter().any(|s| s == slug) {
                return Err("allowlist");
            }
        }
        if self.daily_trade_count.load(Ordering::SeqCst) >= config.max_daily_trades {
            return Err("daily_limit");
        }
        if self.open_trade_count() as u32 >= config.max_concurrent_open {
            return Err("concurrent_limit");
        }
        if *self.exposure_usd.read() >= config.max_total_exposure_usd {
            return Err("exposure_limit");
        }
        Ok(())
    }

    /// Idempotent buy: a second call with the same `signal_id` returns the
    /// existing record unchanged.
    pub async fn buy(
        &self,
        signal_id: &str,
        slug: &str,
        token_id: &str,
        shares: f64,
        entry_price: f64,
        mode: ExecutionMode,
        trading_mode: TradingMode,
        config: &ExecutionConfig,
        exchange: &dyn ExchangeClient,
        date_key: &str,
    ) -> TradeRecord {
        let key = buy_key(signal_id);
        if let Some(existing) = self.get(&key) {
            return existing;
        }

        self.roll_daily_counter_if_needed(date_key);
        let now = now_ms();

        if trading_mode != TradingMode::Active {
            let record = TradeRecord {
                key: key.clone(),
                side: TradeSide::Buy,
                signal_id: signal_id.to_string(),
                slug: slug.to_string(),
                token_id: token_id.to_string(),
                status: TradeStatus::Failed,
                requested_shares: shares,
                filled_shares: 0.0,
                avg_fill_price: 0.0,
                spent_usd: 0.0,
                entry_price: Some(entry_price),
                close_reason: None,
                order_id: None,
                created_ts: now,
                updated_ts: now,
                error: Some("paused".to_string()),
            };
            self.trades.write().insert(key, record.clone());
            return record;
        }

        if let Err(reason) = self.check_execution_caps(slug, config) {
            let record = TradeRecord {
                key: key.clone(),
                side: TradeSide::Buy,
                signal_id: signal_id.to_string(),
                slug: slug.to_string(),
                token_id: token_id.to_string(),
                status: TradeStatus::Failed,
                requested_shares: shares,
                filled_shares: 0.0,
                avg_fill_price: 0.0,
                spent_usd: 0.0,
                entry_price: Some(entry_price),
                close_reason: None,
                order_id: None,
                created_ts: now,
                updated_ts: now,
                error: Some(reason.to_string()),
            };
            self.trades.write().insert(key, record.clone());
            return record;
        }

        let record = if mode == ExecutionMode::Live {
            match exchange.execute_buy(token_id, shares).await {
                Ok(result) if result.ok => {
                    self.daily_trade_count.fetch_add(1, Ordering::SeqCst);
                    *self.exposure_usd.write() += result.spent_usd;
                    TradeRecord {
                        key: key.clone(),
                        side: TradeSide::Buy,
                        signal_id: signal_id.to_string(),
                        slug: slug.to_string(),
                        token_id: token_id.to_string(),
                        status: if result.is_partial { TradeStatus::Partial } else { TradeStatus::Filled },
                        requested_shares: shares,
                        filled_shares: result.filled_shares,
                        avg_fill_price: result.avg_fill_price,
                        spent_usd: result.spent_usd,
                        entry_price: Some(entry_price),
                        close_reason: None,
                        order_id: result.order_id,
                        created_ts: now,
                        updated_ts: now_ms(),
                        error: None,
                    }
                }
                Ok(result) => TradeRecord {
                    key: key.clone(),
                    side: TradeSide::Buy,
                    signal_id: signal_id.to_string(),
                    slug: slug.to_string(),
                    token_id: token_id.to_string(),
                    status: TradeStatus::Failed,
                    requested_shares: shares,
                    filled_shares: 0.0,
                    avg_fill_price: 0.0,
                    spent_usd: 0.0,
                    entry_price: Some(entry_price),
                    close_reason: None,
                    order_id: result.order_id,
                    created_ts: now,
                    updated_ts: now_ms(),
                    error: result.error,
                },
                // Transport-level failure: we don't know whether the order
                // reached the exchange, so the fill status is genuinely
                // ambiguous rather than a clean rejection.
                Err(e) => {
                    warn!(signal_id, slug, error = %e, "order_status_unknown on buy");
                    TradeRecord {
                        key: key.clone(),
                        side: TradeSide::Buy,
                        signal_id: signal_id.to_string(),
                        slug: slug.to_string(),
                        token_id: token_id.to_string(),
                        status: TradeStatus::Error,
                        requested_shares: shares,
                        filled_shares: 0.0,
                        avg_fill_price: 0.0,
                        spent_usd: 0.0,
                        entry_price: Some(entry_price),
                        close_reason: None,
                        order_id: None,
                        created_ts: now,
                        updated_ts: now_ms(),
                        error: Some("order_status_unknown".to_string()),
                    }
                }
            }
        } else {
            self.daily_trade_count.fetch_add(1, Ordering::SeqCst);
            *self.exposure_usd.write() += shares * entry_price;
            info!(signal_id, slug, mode = %mode, "shadow buy recorded");
            TradeRecord {
                key: key.clone(),
                side: TradeSide::Buy,
                signal_id: signal_id.to_string(),
                slug: slug.to_string(),
                token_id: token_id.to_string(),
                status: TradeStatus::Shadow,
                requested_shares: shares,
                filled_shares: shares,
                avg_fill_price: entry_price,
                spent_usd: shares * entry_price,
                entry_price: Some(entry_price),
                close_reason: None,
                order_id: None,
                created_ts: now,
                updated_ts: now,
                error: None,
            }
        };

        self.trades.write().insert(key, record.clone());
        record
    }

    /// Idempotent sell. Requires a filled (or shadow-filled) matching buy;
    /// `close_reason = stop_loss` routes through the escalating-floor
    /// ladder, `resolved` sells at a single permissive floor.
    pub async fn sell(
        &self,
        signal_id: &str,
        token_id: &str,
        floor: f64,
        close_reason: CloseReason,
        mode: ExecutionMode,
        config: &ExecutionConfig,
        exchange: &dyn ExchangeClient,
        epsilon: f64,
    ) -> TradeRecord {
        let key = sell_key(signal_id);
        if let Some(existing) = self.get(&key) {
            return existing;
        }

        let now = now_ms();
        let Some(buy_record) = self.get(&buy_key(signal_id)) else {
            let record = TradeRecord {
                key: key.clone(),
                side: TradeSide::Sell,
                signal_id: signal_id.to_string(),
                slug: String::new(),
                token_id: token_id.to_string(),
                status: TradeStatus::Error,
                requested_shares: 0.0,
                filled_shares: 0.0,
                avg_fill_price: 0.0,
                spent_usd: 0.0,
                entry_price: None,
                close_reason: Some(close_reason),
                order_id: None,
                created_ts: now,
                updated_ts: now,
                error: Some("no_matching_buy".to_string()),
            };
            self.trades.write().insert(key, record.clone());
            return record;
        };

        if !matches!(buy_record.status, TradeStatus::Filled | TradeStatus::Partial | TradeStatus::Shadow) {
            warn!(signal_id, "sell attempted without a filled buy");
        }
        let mut shares = buy_record.filled_shares;

        // Double-sell defense: in live mode, bound the requested shares by
        // what the exchange's read-API actually reports as held, so a
        // failed tail (partial escalation, retried fill) can't be sold
        // twice. The shadow/paper path has no real conditional balance to
        // read, so it is left at the recorded fill.
        if mode == ExecutionMode::Live {
            if let Ok(balance) = exchange.get_conditional_balance(token_id).await {
                if balance > 0.0 {
                    shares = shares.min(balance);
                }
            }
        }

        let record = if mode == ExecutionMode::Live {
            let result = if close_reason == CloseReason::StopLoss {
                run_escalating_sell(exchange, token_id, shares, floor, &config.sl_escalation_steps, epsilon).await
            } else {
                exchange
                    .execute_sell(token_id, shares, config.resolved_sell_floor)
                    .await
                    .unwrap_or_else(|_| crate::exchange::OrderResult::failure("order_status_unknown"))
            };

            if result.ok {
                *self.exposure_usd.write() -= (*self.exposure_usd.read()).min(buy_record.spent_usd);

                let mut avg_fill_price = result.avg_fill_price;
                let mut spent_usd = result.spent_usd;
                // The sell limit price is provisional until reconciled
                // against the exchange's actual trade history.
                if close_reason == CloseReason::Resolved {
                    if let Some(order_id) = &result.order_id {
                        if let Ok(Some(real_price)) = exchange.fetch_real_fill_price(order_id, 3, 500).await {
                            avg_fill_price = real_price;
                            spent_usd = result.filled_shares * real_price;
                        }
                    }
                }

                TradeRecord {
                    key: key.clone(),
                    side: TradeSide::Sell,
                    signal_id: signal_id.to_string(),
                    slug: buy_record.slug.clone(),
                    token_id: token_id.to_string(),
                    status: TradeStatus::Filled,
                    requested_shares: shares,
                    filled_shares: result.filled_shares,
                    avg_fill_price,
                    spent_usd,
                    entry_price: None,
                    close_reason: Some(close_reason),
                    order_id: result.order_id,
                    created_ts: now,
                    updated_ts: now_ms(),
                    error: None,
                }
            } else {
                warn!(signal_id, error = ?result.error, "sl_sell_failed");
                TradeRecord {
                    key: key.clone(),
                    side: TradeSide::Sell,
                    signal_id: signal_id.to_string(),
                    slug: buy_record.slug.clone(),
                    token_id: token_id.to_string(),
                    status: TradeStatus::Failed,
                    requested_shares: shares,
                    filled_shares: result.filled_shares,
                    avg_fill_price: result.avg_fill_price,
                    spent_usd: result.spent_usd,
                    entry_price: None,
                    close_reason: Some(close_reason),
                    order_id: result.order_id,
                    created_ts: now,
                    updated_ts: now_ms(),
                    error: result.error,
                }
            }
        } else {
            *self.exposure_usd.write() -= (*self.exposure_usd.read()).min(buy_record.spent_usd);
            TradeRecord {
                key: key.clone(),
                side: TradeSide::Sell,
                signal_id: signal_id.to_string(),
                slug: buy_record.slug.clone(),
                token_id: token_id.to_string(),
                status: TradeStatus::Shadow,
                requested_shares: shares,
                filled_shares: shares,
                avg_fill_price: floor,
                spent_usd: shares * floor,
                entry_price: None,
                close_reason: Some(close_reason),
                order_id: None,
                created_ts: now,
                updated_ts: now,
                error: None,
            }
        };

        self.trades.write().insert(key, record.clone());
        record
    }

    /// Used by `reconcile.rs` to flip a filled buy to `orphan_closed` when
    /// the exchange no longer reports the matching position.
    pub fn mark_orphan_closed(&self, signal_id: &str) -> bool {
        let mut trades = self.trades.write();
        if let Some(record) = trades.get_mut(&buy_key(signal_id)) {
            record.status = TradeStatus::OrphanClosed;
            record.updated_ts = now_ms();
            true
        } else {
            false
        }
    }

    pub fn all(&self) -> Vec<TradeRecord> {
        self.trades.read().values().cloned().collect()
    }
}

impl Default for ExecutionBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderResult, Position, ShadowExchangeClient};
    use async_trait::async_trait;
    use anyhow::Result;

    fn config() -> ExecutionConfig {
        ExecutionConfig::default()
    }

    #[tokio::test]
    async fn buy_is_idempotent_per_signal_id() {
        let bridge = ExecutionBridge::new();
        let exchange = ShadowExchangeClient;
        let first = bridge.buy("sig1", "slug1", "tok", 10.0, 0.5, ExecutionMode::Paper, TradingMode::Active, &config(), &exchange, "20260801").await;
        let second = bridge.buy("sig1", "slug1", "tok", 99.0, 0.9, ExecutionMode::Paper, TradingMode::Active, &config(), &exchange, "20260801").await;
        assert_eq!(first.spent_usd, second.spent_usd);
        assert_eq!(second.requested_shares, 10.0);
    }

    #[tokio::test]
    async fn buy_rejected_while_paused() {
        let bridge = ExecutionBridge::new();
        let exchange = ShadowExchangeClient;
        let record = bridge.buy("sig1", "slug1", "tok", 10.0, 0.5, ExecutionMode::Paper, TradingMode::Paused, &config(), &exchange, "20260801").await;
        assert_eq!(record.status, TradeStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("paused"));
    }

    #[tokio::test]
    async fn sell_without_matching_buy_errors() {
        let bridge = ExecutionBridge::new();
        let exchange = ShadowExchangeClient;
        let record = bridge.sell("sig-missing", "tok", 0.9, CloseReason::Resolved, ExecutionMode::Paper, &config(), &exchange, 1e-6).await;
        assert_eq!(record.status, TradeStatus::Error);
    }

    #[tokio::test]
    async fn sell_is_idempotent_per_signal_id() {
        let bridge = ExecutionBridge::new();
        let exchange = ShadowExchangeClient;
        bridge.buy("sig1", "slug1", "tok", 10.0, 0.5, ExecutionMode::Paper, TradingMode::Active, &config(), &exchange, "20260801").await;
        let first = bridge.sell("sig1", "tok", 0.9, CloseReason::Resolved, ExecutionMode::Paper, &config(), &exchange, 1e-6).await;
        let second = bridge.sell("sig1", "tok", 0.1, CloseReason::StopLoss, ExecutionMode::Paper, &config(), &exchange, 1e-6).await;
        assert_eq!(first.avg_fill_price, second.avg_fill_price);
    }

    #[tokio::test]
    async fn execution_caps_block_over_daily_limit() {
        let bridge = ExecutionBridge::new();
        let exchange = ShadowExchangeClient;
        let mut cfg = config();
        cfg.max_daily_trades = 1;
        bridge.buy("sig1", "slug1", "tok", 10.0, 0.5, ExecutionMode::Paper, TradingMode::Active, &cfg, &exchange, "20260801").await;
        let blocked = bridge.buy("sig2", "slug2", "tok2", 10.0, 0.5, ExecutionMode::Paper, TradingMode::Active, &cfg, &exchange, "20260801").await;
        assert_eq!(blocked.status, TradeStatus::Failed);
        assert_eq!(blocked.error.as_deref(), Some("daily_limit"));
    }

    #[tokio::test]
    async fn allowlist_blocks_unlisted_slug() {
        let bridge = ExecutionBridge::new();
        let exchange = ShadowExchangeClient;
        let mut cfg = config();
        cfg.allowlist = Some(vec!["allowed-slug".to_string()]);
        let blocked = bridge.buy("sig1", "other-slug", "tok", 10.0, 0.5, ExecutionMode::Paper, TradingMode::Active, &cfg, &exchange, "20260801").await;
        assert_eq!(blocked.error.as_deref(), Some("allowlist"));
    }

    struct AlwaysFailSell;

    #[async_trait]
    impl ExchangeClient for AlwaysFailSell {
        async fn execute_buy(&self, _token: &str, shares: f64) -> Result<OrderResult> {
            Ok(OrderResult { ok: true, filled_shares: shares, avg_fill_price: 0.5, spent_usd: shares * 0.5, is_partial: false, order_id: None, error: None })
        }
        async fn execute_sell(&self, _token: &str, _shares: f64, _floor: f64) -> Result<OrderResult> {
            Ok(OrderResult::failure("no_liquidity"))
        }
        async fn get_balance(&self) -> Result<f64> {
            Ok(0.0)
        }
        async fn get_conditional_balance(&self, _token: &str) -> Result<f64> {
            Ok(0.0)
        }
        async fn get_positions(&self, _funder: &str) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }
        async fn fetch_real_fill_price(&self, _order_id: &str, _retries: u32, _delay_ms: u64) -> Result<Option<f64>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn failed_stop_loss_sell_leaves_position_open_not_panicking() {
        let bridge = ExecutionBridge::new();
        let exchange = AlwaysFailSell;
        bridge.buy("sig1", "slug1", "tok", 10.0, 0.5, ExecutionMode::Live, TradingMode::Active, &config(), &exchange, "20260801").await;
        let result = bridge.sell("sig1", "tok", 0.4, CloseReason::StopLoss, ExecutionMode::Live, &config(), &exchange, 1e-6).await;
        assert_eq!(result.status, TradeStatus::Failed);
    }

    /// Reports a conditional balance lower than the recorded fill, and a
    /// real fill price that differs from the order's limit price.
    struct PartialBalanceExchange;

    #[async_trait]
    impl ExchangeClient for PartialBalanceExchange {
        async fn execute_buy(&self, _token: &str, shares: f64) -> Result<OrderResult> {
            Ok(OrderResult { ok: true, filled_shares: shares, avg_fill_price: 0.5, spent_usd: shares * 0.5, is_partial: false, order_id: None, error: None })
        }
        async fn execute_sell(&self, _token: &str, shares: f64, floor: f64) -> Result<OrderResult> {
            Ok(OrderResult { ok: true, filled_shares: shares, avg_fill_price: floor, spent_usd: shares * floor, is_partial: false, order_id: Some("order-1".to_string()), error: None })
        }
        async fn get_balance(&self) -> Result<f64> {
            Ok(0.0)
        }
        async fn get_conditional_balance(&self, _token: &str) -> Result<f64> {
            Ok(4.0)
        }
        async fn get_positions(&self, _funder: &str) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }
        async fn fetch_real_fill_price(&self, _order_id: &str, _retries: u32, _delay_ms: u64) -> Result<Option<f64>> {
            Ok(Some(0.97))
        }
    }

    #[tokio::test]
    async fn resolved_sell_is_bounded_by_conditional_balance_and_reconciled() {
        let bridge = ExecutionBridge::new();
        let exchange = PartialBalanceExchange;
        bridge.buy("sig1", "slug1", "tok", 10.0, 0.5, ExecutionMode::Live, TradingMode::Active, &config(), &exchange, "20260801").await;
        let result = bridge.sell("sig1", "tok", 0.95, CloseReason::Resolved, ExecutionMode::Live, &config(), &exchange, 1e-6).await;
        assert_eq!(result.status, TradeStatus::Filled);
        assert_eq!(result.requested_shares, 4.0);
        assert_eq!(result.avg_fill_price, 0.97);
        assert_eq!(result.spent_usd, 4.0 * 0.97);
    }
}
