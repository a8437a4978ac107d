// =============================================================================
// Entry gate chain (component H)
// =============================================================================
//
// Sequential checks, each returning `Err(reason)` on the first failure —
// the same short-circuit shape as the teacher's
// `trade_insurance.rs::InsuranceGate::check_all`, generalized from "insure a
// live position" to "admit a quote as a trade signal".
//
// Stage 1 is the base price/spread gate on `best_ask` alone — win-probability
// admission is a separate, league-specific concern handled upstream by
// `winprob::basketball_entry_gate`/`soccer_entry_gate`. The near-margin gate
// classifies (rather than blocks) a quote sitting close to the boundary, so
// the evaluation loop can still promote it when Stage 1 fails narrowly.
// Stage 2 is the depth gate, run last since it is the only gate that needs a
// fresh order book.
// =============================================================================

use crate::config::StageThresholds;
use crate::orderbook::ParsedBook;
use crate::types::{NearBy, Quote};

/// Stage 1: base price/spread admission gate on `best_ask`.
pub fn stage1_gate(quote: &Quote, thresholds: &StageThresholds, epsilon: f64) -> Result<(), &'static str> {
    let Some(ask) = quote.best_ask else {
        return Err("quote_incomplete_one_sided_book");
    };
    if ask < thresholds.min_prob - epsilon || ask > thresholds.max_entry_price + epsilon {
        return Err("price_out_of_range");
    }
    let Some(spread) = quote.spread() else {
        return Err("quote_incomplete_one_sided_book");
    };
    if spread > thresholds.max_spread + epsilon {
        return Err("spread_above_max");
    }
    Ok(())
}

/// Classify how a quote qualifies under the near-margin rule: tight ask
/// alone, tight spread alone, both, or neither. Used to promote borderline
/// Stage-1 rejects and to label `signal_type` on promotion.
pub fn near_margin_classify(quote: &Quote, thresholds: &StageThresholds, epsilon: f64) -> NearBy {
    let ask_near = quote.best_ask.map(|a| a >= thresholds.near_prob_min - epsilon).unwrap_or(false);
    let spread_near = quote.spread().map(|s| s <= thresholds.near_spread_max + epsilon).unwrap_or(false);
    match (ask_near, spread_near) {
        (true, true) => NearBy::Both,
        (true, false) => NearBy::Ask,
        (false, true) => NearBy::Spread,
        (false, false) => NearBy::None,
    }
}

/// Stage 2: depth gate. Run only once Stage 1 (or the near-margin override)
/// has passed, since it requires a fresh order book fetch.
pub fn stage2_depth_gate(book: &ParsedBook, thresholds: &StageThresholds, levels: usize) -> Result<(), &'static str> {
    book.is_depth_sufficient(thresholds.min_entry_depth_usd, thresholds.min_exit_depth_usd, levels)
}

/// League-level date-window / cooldown gate, checked ahead of Stage 1 since
/// it is cheap and per-market rather than per-quote.
pub fn cooldown_gate(cooldown_until_ts: i64, now: i64) -> Result<(), &'static str> {
    if now < cooldown_until_ts {
        Err("cooldown_active")
    } else {
        Ok(())
    }
}

/// Outcome of running the full admission chain for one market: which gate
/// (if any) blocked, and whether the quote qualified via near-margin
/// override rather than a clean Stage-1 pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub blocked_reason: Option<&'static str>,
    pub near_by: NearBy,
}

/// Run the chain in order: cooldown, Stage 1 (or near-margin override),
/// Stage 2 depth. Mirrors `InsuranceGate::check_all`'s "first failing gate
/// wins" contract but returns the near-margin classification alongside so
/// callers can label a promoted signal without re-deriving it.
///
/// A Stage-1 failure is not itself fatal: it falls through to the
/// near-margin gate as an alternative admit rule. Only when both fail does
/// the chain reject, and it reports that rejection as `fail_near_margin`
/// rather than the underlying Stage-1 reason, since near-margin was the
/// last gate actually consulted.
pub fn check_all(
    quote: &Quote,
    book: &ParsedBook,
    thresholds: &StageThresholds,
    levels: usize,
    epsilon: f64,
    cooldown_until_ts: i64,
    now: i64,
) -> GateOutcome {
    if let Err(reason) = cooldown_gate(cooldown_until_ts, now) {
        return GateOutcome { blocked_reason: Some(reason), near_by: NearBy::None };
    }

    let near_by = near_margin_classify(quote, thresholds, epsilon);
    let stage1 = stage1_gate(quote, thresholds, epsilon);
    if stage1.is_err() && near_by == NearBy::None {
        return GateOutcome { blocked_reason: Some("fail_near_margin"), near_by };
    }

    if let Err(reason) = stage2_depth_gate(book, thresholds, levels) {
        return GateOutcome { blocked_reason: Some(reason), near_by };
    }

    GateOutcome { blocked_reason: None, near_by }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::BookLevel;

    const EPS: f64 = 1e-6;

    fn quote(bid: Option<f64>, ask: Option<f64>) -> Quote {
        Quote { best_bid: bid, best_ask: ask }
    }

    fn deep_book() -> ParsedBook {
        ParsedBook {
            bids: vec![BookLevel { price: 0.80, size: 200.0 }],
            asks: vec![BookLevel { price: 0.82, size: 200.0 }],
        }
    }

    #[test]
    fn stage1_rejects_missing_ask() {
        let thresholds = StageThresholds::default();
        assert_eq!(stage1_gate(&quote(Some(0.5), None), &thresholds, EPS), Err("quote_incomplete_one_sided_book"));
    }

    #[test]
    fn stage1_rejects_price_above_cap() {
        let thresholds = StageThresholds::default();
        let q = quote(Some(0.90), Some(0.95));
        assert_eq!(stage1_gate(&q, &thresholds, EPS), Err("price_out_of_range"));
    }

    #[test]
    fn stage1_rejects_price_below_floor() {
        let thresholds = StageThresholds::default();
        let q = quote(Some(0.40), Some(0.45));
        assert_eq!(stage1_gate(&q, &thresholds, EPS), Err("price_out_of_range"));
    }

    #[test]
    fn stage1_rejects_wide_spread() {
        let thresholds = StageThresholds::default();
        let q = quote(Some(0.50), Some(0.70));
        assert_eq!(stage1_gate(&q, &thresholds, EPS), Err("spread_above_max"));
    }

    #[test]
    fn stage1_passes_within_bounds() {
        let thresholds = StageThresholds::default();
        let q = quote(Some(0.80), Some(0.82));
        assert!(stage1_gate(&q, &thresholds, EPS).is_ok());
    }

    #[test]
    fn near_margin_classifies_both_sides() {
        let thresholds = StageThresholds::default();
        let q = quote(Some(0.895), Some(0.905));
        assert_eq!(near_margin_classify(&q, &thresholds, EPS), NearBy::Both);
    }

    #[test]
    fn cooldown_gate_blocks_until_expiry() {
        assert_eq!(cooldown_gate(1_000, 500), Err("cooldown_active"));
        assert_eq!(cooldown_gate(1_000, 1_000), Ok(()));
    }

    #[test]
    fn check_all_short_circuits_on_cooldown_before_stage1() {
        let thresholds = StageThresholds::default();
        let outcome = check_all(&quote(Some(0.80), Some(0.82)), &deep_book(), &thresholds, 5, EPS, 10_000, 0);
        assert_eq!(outcome.blocked_reason, Some("cooldown_active"));
    }

    #[test]
    fn check_all_promotes_near_margin_despite_stage1_fail() {
        let thresholds = StageThresholds::default();
        let q = quote(Some(0.895), Some(0.905));
        let outcome = check_all(&q, &deep_book(), &thresholds, 5, EPS, 0, 0);
        assert!(outcome.blocked_reason.is_none());
        assert_eq!(outcome.near_by, NearBy::Both);
    }

    #[test]
    fn check_all_reports_fail_near_margin_when_both_gates_fail() {
        let thresholds = StageThresholds::default();
        let q = quote(Some(0.40), Some(0.45));
        let outcome = check_all(&q, &deep_book(), &thresholds, 5, EPS, 0, 0);
        assert_eq!(outcome.blocked_reason, Some("fail_near_margin"));
    }

    #[test]
    fn check_all_blocks_on_depth_after_stage1_pass() {
        let thresholds = StageThresholds::default();
        let thin_book = ParsedBook {
            bids: vec![BookLevel { price: 0.80, size: 1.0 }],
            asks: vec![BookLevel { price: 0.82, size: 1.0 }],
        };
        let outcome = check_all(&quote(Some(0.80), Some(0.82)), &thin_book, &thresholds, 5, EPS, 0, 0);
        assert_eq!(outcome.blocked_reason, Some("depth_ask_below_min"));
    }
}
