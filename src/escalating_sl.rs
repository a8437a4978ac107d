// =============================================================================
// Escalating-floor stop-loss sell ladder
// =============================================================================
//
// On a stop-loss trigger, sell at successively lower floors until all shares
// clear or the ladder is exhausted. Grounded on `exit/triple_barrier.rs`'s
// "ratchet, never widen" mechanics: each step only moves the floor down,
// bounded below by `trigger − 0.10`, mirroring that file's floor-stepping
// test style.
// =============================================================================

use tracing::warn;

use crate::exchange::{ExchangeClient, OrderResult};

/// Compute the floor price for each escalation step, bounded below by
/// `trigger_price - 0.10` and clamped to stay inside `(0, 1]`.
pub fn escalation_floors(trigger_price: f64, steps: &[f64]) -> Vec<f64> {
    let lower_bound = (trigger_price - 0.10).max(0.01);
    steps
        .iter()
        .map(|step| (trigger_price - step).max(lower_bound).min(1.0))
        .collect()
}

/// Attempt to sell `total_shares` by stepping down the escalation ladder.
/// Returns an aggregate `OrderResult`: `ok = true` once every share clears,
/// `ok = false` (with `error = "sl_all_attempts_failed"`) if the ladder is
/// exhausted with shares still unsold — the position stays open, this sell
/// attempt is simply abandoned for the cycle.
pub async fn run_escalating_sell(
    exchange: &dyn ExchangeClient,
    token: &str,
    total_shares: f64,
    trigger_price: f64,
    steps: &[f64],
    epsilon: f64,
) -> OrderResult {
    let floors = escalation_floors(trigger_price, steps);
    let mut remaining = total_shares;
    let mut filled_total = 0.0;
    let mut spent_total = 0.0;
    let mut last_order_id = None;

    for floor in floors {
        if remaining <= epsilon {
            break;
        }
        match exchange.execute_sell(token, remaining, floor).await {
            Ok(result) if result.ok => {
                filled_total += result.filled_shares;
                spent_total += result.spent_usd;
                remaining -= result.filled_shares;
                last_order_id = result.order_id.or(last_order_id);
            }
            Ok(result) => {
                warn!(token, floor, error = ?result.error, "escalating sell step failed");
            }
            Err(e) => {
                warn!(token, floor, error = %e, "escalating sell step errored");
            }
        }
    }

    if remaining > epsilon {
        return OrderResult {
            ok: false,
            filled_shares: filled_total,
            avg_fill_price: if filled_total > 0.0 { spent_total / filled_total } else { 0.0 },
            spent_usd: spent_total,
            is_partial: filled_total > 0.0,
            order_id: last_order_id,
            error: Some("sl_all_attempts_failed".to_string()),
        };
    }

    OrderResult {
        ok: true,
        filled_shares: filled_total,
        avg_fill_price: if filled_total > 0.0 { spent_total / filled_total } else { 0.0 },
        spent_usd: spent_total,
        is_partial: false,
        order_id: last_order_id,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use crate::exchange::Position;
    use anyhow::Result;

    struct ScriptedExchange {
        fills: Vec<f64>,
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeClient for ScriptedExchange {
        async fn execute_buy(&self, _token: &str, shares: f64) -> Result<OrderResult> {
            Ok(OrderResult { ok: true, filled_shares: shares, avg_fill_price: 0.5, spent_usd: shares * 0.5, is_partial: false, order_id: None, error: None })
        }

        async fn execute_sell(&self, _token: &str, shares: f64, floor: f64) -> Result<OrderResult> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let fill_fraction = self.fills.get(idx).copied().unwrap_or(0.0);
            let filled = shares * fill_fraction;
            Ok(OrderResult { ok: filled > 0.0, filled_shares: filled, avg_fill_price: floor, spent_usd: filled * floor, is_partial: fill_fraction < 1.0, order_id: Some(format!("o{idx}")), error: None })
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

    #[test]
    fn escalation_floors_never_widen_below_trigger_minus_10_cents() {
        let floors = escalation_floors(0.80, &[0.0, 0.01, 0.02, 0.03, 0.05]);
        assert_eq!(floors[0], 0.80);
        assert!(floors.windows(2).all(|w| w[1] <= w[0]));
        assert!(floors.iter().all(|&f| f >= 0.70));
    }

    #[tokio::test]
    async fn full_fill_on_first_step_stops_ladder() {
        let exchange = ScriptedExchange { fills: vec![1.0, 1.0], call_count: AtomicUsize::new(0) };
        let result = run_escalating_sell(&exchange, "tok", 10.0, 0.80, &[0.0, 0.01, 0.02, 0.03, 0.05], 1e-6).await;
        assert!(result.ok);
        assert_eq!(result.filled_shares, 10.0);
        assert_eq!(exchange.call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partial_fills_accumulate_across_steps() {
        let exchange = ScriptedExchange { fills: vec![0.5, 1.0], call_count: AtomicUsize::new(0) };
        let result = run_escalating_sell(&exchange, "tok", 10.0, 0.80, &[0.0, 0.01, 0.02, 0.03, 0.05], 1e-6).await;
        assert!(result.ok);
        assert_eq!(result.filled_shares, 10.0);
        assert_eq!(exchange.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_ladder_reports_failure_but_keeps_partial_fills() {
        let exchange = ScriptedExchange { fills: vec![0.2, 0.0, 0.0, 0.0, 0.0], call_count: AtomicUsize::new(0) };
        let result = run_escalating_sell(&exchange, "tok", 10.0, 0.80, &[0.0, 0.01, 0.02, 0.03, 0.05], 1e-6).await;
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("sl_all_attempts_failed"));
        assert_eq!(result.filled_shares, 2.0);
    }
}
