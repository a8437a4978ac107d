// =============================================================================
// Price-driven exits (component L, continued)
// =============================================================================
//
// Run once per eval cycle after price updates land, over every `Signaled`
// market still carrying a filled buy. Grounded on `exit/monitor.rs`'s
// periodic-loop-over-open-positions shape: iterate, evaluate each position's
// exit conditions against the latest price snapshot, close whoever triggers.
// Where the teacher drives the triple-barrier/micro-trail state machines off
// `position.current_price`, this checks three independent triggers in order
// (resolved-via-book, price stop-loss, context stop-loss) and stops at the
// first that fires.
// =============================================================================

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::clock::signal_id;
use crate::config::RuntimeConfig;
use crate::exchange::ExchangeClient;
use crate::execution::{compute_pnl, ExecutionBridge};
use crate::journal::{Journal, SignalEvent};
use crate::types::{CloseReason, MarketStatus};
use crate::watchlist::{ContextSnapshot, MarketRecord, Watchlist};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitTrigger {
    ResolvedViaBook,
    PriceStopLoss,
    ContextStopLoss,
}

impl ExitTrigger {
    fn close_reason(self) -> CloseReason {
        match self {
            Self::ResolvedViaBook => CloseReason::Resolved,
            Self::PriceStopLoss => CloseReason::StopLoss,
            Self::ContextStopLoss => CloseReason::ContextSl,
        }
    }
}

/// `best_bid > 0.997`, or `best_ask >= 0.999 && best_bid > 0.997`.
fn resolved_via_book(best_bid: Option<f64>, best_ask: Option<f64>) -> bool {
    let Some(bid) = best_bid else { return false };
    if bid > 0.997 {
        return true;
    }
    matches!(best_ask, Some(ask) if ask >= 0.999 && bid > 0.997)
}

/// Both sides must confirm: `best_bid <= sl_bid && best_ask <= sl_ask`.
fn price_stop_loss(best_bid: Option<f64>, best_ask: Option<f64>, sl_bid: f64, sl_ask: f64) -> bool {
    matches!((best_bid, best_ask), (Some(bid), Some(ask)) if bid <= sl_bid && ask <= sl_ask)
}

/// Index of `record.yes_token_id` within `token_pair` names the "yes" team.
fn yes_outcome_name(record: &MarketRecord) -> Option<String> {
    let yes_token = record.yes_token_id.as_ref()?;
    let idx = record.token_pair.iter().position(|t| t == yes_token)?;
    record.outcomes.get(idx).cloned()
}

fn margin_for_yes(context: &ContextSnapshot, yes_team: &str) -> Option<f64> {
    if context.team_a.eq_ignore_ascii_case(yes_team) {
        Some((context.team_a_score? - context.team_b_score?) as f64)
    } else if context.team_b.eq_ignore_ascii_case(yes_team) {
        Some((context.team_b_score? - context.team_a_score?) as f64)
    } else {
        None
    }
}

fn determine_trigger(record: &MarketRecord, runtime: &RuntimeConfig, leagues: &crate::config::LeagueTable) -> Option<ExitTrigger> {
    let price = record.last_price.as_ref()?;

    if resolved_via_book(price.best_bid, price.best_ask) {
        return Some(ExitTrigger::ResolvedViaBook);
    }

    let thresholds = leagues
        .leagues
        .get(&record.league)
        .and_then(|l| l.thresholds.as_ref())
        .unwrap_or(&runtime.default_thresholds);
    if price_stop_loss(price.best_bid, price.best_ask, thresholds.sl_bid, thresholds.sl_ask) {
        return Some(ExitTrigger::PriceStopLoss);
    }

    if matches!(record.league.as_str(), "nba" | "ncaab") {
        if let (Some(context), Some(yes_team)) = (&record.context, yes_outcome_name(record)) {
            if let Some(margin) = margin_for_yes(context, &yes_team) {
                if margin < runtime.min_margin_hold {
                    return Some(ExitTrigger::ContextStopLoss);
                }
            }
        }
    }

    None
}

/// Evaluate every `Signaled` market for an exit trigger and close the ones
/// that fire. Returns the number of positions closed this cycle.
#[allow(clippy::too_many_arguments)]
pub async fn run_exit_cycle(
    watchlist: &Watchlist,
    execution: &ExecutionBridge,
    exchange: &dyn ExchangeClient,
    journal: &Journal,
    runtime: &RuntimeConfig,
    leagues: &crate::config::LeagueTable,
    now: i64,
    _today: NaiveDate,
) -> usize {
    let mut closed = 0;

    for record in watchlist.all() {
        if record.status != MarketStatus::Signaled {
            continue;
        }
        let Some(trigger) = determine_trigger(&record, runtime, leagues) else {
            continue;
        };
        let Some(yes_token) = record.yes_token_id.clone() else {
            continue;
        };

        let sid = signal_id(record.pending_since_ts.unwrap_or(record.status_since_ts), &record.slug);
        let close_reason = trigger.close_reason();
        let floor = match trigger {
            ExitTrigger::ResolvedViaBook => runtime.execution.resolved_sell_floor,
            ExitTrigger::PriceStopLoss => record.last_price.as_ref().and_then(|p| p.best_bid).unwrap_or(0.0),
            ExitTrigger::ContextStopLoss => runtime.execution.resolved_sell_floor,
        };

        let trade = execution
            .sell(&sid, &yes_token, floor, close_reason, runtime.execution_mode, &runtime.execution, exchange, runtime.epsilon)
            .await;

        if let Some(buy) = execution.get_buy(&sid) {
            let (pnl_usd, win, roi) = compute_pnl(&buy, &trade);
            if let Err(e) = journal.log_signal(&SignalEvent::SignalClose {
                signal_id: sid.clone(),
                condition_id: record.condition_id.clone(),
                ts: now,
                close_reason,
                win,
                pnl_usd,
                roi,
            }) {
                warn!(error = %e, "failed to append signal close event");
            }
        }

        if let Err(e) = journal.log_execution(&trade) {
            warn!(error = %e, "failed to append exit trade journal record");
        }

        watchlist.with_mut(&record.condition_id, |r| r.set_status(MarketStatus::Closed, now));
        info!(signal_id = %sid, slug = %record.slug, close_reason = %close_reason, status = ?trade.status, "position closed by exit trigger");
        closed += 1;
    }

    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchlist::ContextSnapshot;
    use crate::types::GameState;

    #[test]
    fn resolved_via_book_triggers_on_high_bid_alone() {
        assert!(resolved_via_book(Some(0.998), None));
        assert!(!resolved_via_book(Some(0.996), None));
    }

    #[test]
    fn resolved_via_book_triggers_on_both_sides_near_terminal() {
        assert!(resolved_via_book(Some(0.9975), Some(0.999)));
        assert!(!resolved_via_book(Some(0.9975), Some(0.998)));
    }

    #[test]
    fn price_stop_loss_requires_both_sides() {
        assert!(price_stop_loss(Some(0.05), Some(0.08), 0.06, 0.09));
        assert!(!price_stop_loss(Some(0.05), Some(0.12), 0.06, 0.09));
        assert!(!price_stop_loss(None, Some(0.08), 0.06, 0.09));
    }

    #[test]
    fn margin_for_yes_handles_either_side() {
        let context = ContextSnapshot {
            state: GameState::In,
            period: 2,
            minutes_left: 5.0,
            team_a: "Lakers".into(),
            team_a_score: Some(90),
            team_b: "Celtics".into(),
            team_b_score: Some(95),
            decided: false,
        };
        assert_eq!(margin_for_yes(&context, "Lakers"), Some(-5.0));
        assert_eq!(margin_for_yes(&context, "celtics"), Some(5.0));
        assert_eq!(margin_for_yes(&context, "Bulls"), None);
    }
}
