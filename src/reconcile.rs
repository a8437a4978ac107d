// =============================================================================
// Reconciliation — compare internal trade state against the exchange
// =============================================================================
//
// Runs every `reconcile_interval_seconds` in non-paper modes. Unlike the
// teacher's symbol-matching pass, positions here are tracked per conditional
// token rather than per spot symbol, but the shape survives unchanged:
// fetch what the exchange actually holds, diff it against what the
// execution bridge believes is open, and flag drift. Where the teacher only
// warns on drift and leaves remediation to a human, this additionally flips
// vanished filled positions to `orphan_closed` — the exchange is the source
// of truth for what is actually held.
// =============================================================================

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::exchange::ExchangeClient;
use crate::execution::ExecutionBridge;
use crate::types::{TradeSide, TradeStatus};

/// Summary of a single reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub positions_matched: u32,
    pub positions_orphaned: u32,
    pub timestamp: String,
}

/// Compare internally-filled buy trades against the exchange's reported
/// conditional-token positions. Any filled buy whose token is no longer held
/// is marked `orphan_closed`.
pub async fn reconcile_once(exchange: &dyn ExchangeClient, execution: &ExecutionBridge, funder: &str) -> Result<ReconcileResult> {
    let now = Utc::now().to_rfc3339();
    info!(timestamp = %now, "reconciliation cycle started");

    let positions = exchange.get_positions(funder).await.context("reconcile: failed to fetch positions")?;
    let held_tokens: HashSet<String> = positions.iter().map(|p| p.asset.clone()).collect();

    let open_buys = execution
        .all()
        .into_iter()
        .filter(|t| t.side == TradeSide::Buy && matches!(t.status, TradeStatus::Filled | TradeStatus::Partial));

    let mut matched = 0u32;
    let mut orphaned = 0u32;

    for trade in open_buys {
        if held_tokens.contains(&trade.token_id) {
            matched += 1;
            debug!(signal_id = %trade.signal_id, token_id = %trade.token_id, "position matched with exchange holding");
        } else {
            warn!(signal_id = %trade.signal_id, token_id = %trade.token_id, slug = %trade.slug, "internal position has no matching exchange holding — marking orphan_closed");
            if execution.mark_orphan_closed(&trade.signal_id) {
                orphaned += 1;
            }
        }
    }

    let result = ReconcileResult { positions_matched: matched, positions_orphaned: orphaned, timestamp: now };
    info!(positions_matched = matched, positions_orphaned = orphaned, "reconciliation cycle completed");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderResult, Position};
    use crate::types::{ExecutionMode, TradingMode};
    use async_trait::async_trait;

    struct FakeExchange {
        positions: Vec<Position>,
    }

    #[async_trait]
    impl ExchangeClient for FakeExchange {
        async fn execute_buy(&self, _token: &str, shares: f64) -> Result<OrderResult> {
            Ok(OrderResult { ok: true, filled_shares: shares, avg_fill_price: 0.5, spent_usd: shares * 0.5, is_partial: false, order_id: None, error: None })
        }
        async fn execute_sell(&self, _token: &str, shares: f64, floor: f64) -> Result<OrderResult> {
            Ok(OrderResult { ok: true, filled_shares: shares, avg_fill_price: floor, spent_usd: shares * floor, is_partial: false, order_id: None, error: None })
        }
        async fn get_balance(&self) -> Result<f64> {
            Ok(0.0)
        }
        async fn get_conditional_balance(&self, _token: &str) -> Result<f64> {
            Ok(0.0)
        }
        async fn get_positions(&self, _funder: &str) -> Result<Vec<Position>> {
            Ok(self.positions.clone())
        }
        async fn fetch_real_fill_price(&self, _order_id: &str, _retries: u32, _delay_ms: u64) -> Result<Option<f64>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn vanished_position_marked_orphan_closed() {
        let execution = ExecutionBridge::new();
        let config = crate::config::ExecutionConfig::default();
        let exchange = FakeExchange { positions: Vec::new() };
        execution
            .buy("sig1", "slug1", "tok1", 10.0, 0.5, ExecutionMode::Live, TradingMode::Active, &config, &exchange, "2026-08-01")
            .await;

        let result = reconcile_once(&exchange, &execution, "0xabc").await.unwrap();
        assert_eq!(result.positions_orphaned, 1);
        assert_eq!(result.positions_matched, 0);
        let trade = execution.get("buy:sig1").unwrap();
        assert_eq!(trade.status, TradeStatus::OrphanClosed);
    }

    #[tokio::test]
    async fn held_position_counted_as_matched() {
        let execution = ExecutionBridge::new();
        let config = crate::config::ExecutionConfig::default();
        let exchange = FakeExchange { positions: vec![Position { asset: "tok1".into(), size: 10.0 }] };
        execution
            .buy("sig1", "slug1", "tok1", 10.0, 0.5, ExecutionMode::Live, TradingMode::Active, &config, &exchange, "2026-08-01")
            .await;

        let result = reconcile_once(&exchange, &execution, "0xabc").await.unwrap();
        assert_eq!(result.positions_matched, 1);
        assert_eq!(result.positions_orphaned, 0);
    }
}
