// =============================================================================
// Win-probability models + entry gates (component J)
// =============================================================================
//
// Two independent models feed the context-entry gate: a normal-CDF margin
// model for basketball and a Poisson catch-up model for soccer. Neither has
// a direct teacher analogue (the teacher trades crypto momentum, not live
// sports win probability) so these are built fresh in the teacher's style —
// small pure functions, `#[instrument]`-free since they run in a hot inner
// loop, tested against known reference values.
// =============================================================================

use crate::config::BasketballParams;

/// Standard-normal CDF via the Abramowitz–Stegun 26.2.17 rational
/// approximation (max error ~7.5e-8).
pub fn normal_cdf(x: f64) -> f64 {
    let b1 = 0.319_381_530;
    let b2 = -0.356_563_782;
    let b3 = 1.781_477_937;
    let b4 = -1.821_255_978;
    let b5 = 1.330_274_429;
    let p = 0.231_641_9;
    let c = 0.398_942_280_4;

    let z = x.abs();
    let t = 1.0 / (1.0 + p * z);
    let poly = t * (b1 + t * (b2 + t * (b3 + t * (b4 + t * b5))));
    let tail = c * (-z * z / 2.0).exp() * poly;
    if x >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// `p = Φ(margin / (σ · √(max(min_left, 0.5) / total_minutes)))`.
pub fn basketball_win_prob(margin_for_yes: f64, min_left: f64, params: &BasketballParams) -> f64 {
    let effective_min_left = min_left.max(0.5);
    let denom = params.sigma * (effective_min_left / params.total_minutes).sqrt();
    if denom <= 0.0 {
        return if margin_for_yes > 0.0 { 1.0 } else { 0.0 };
    }
    normal_cdf(margin_for_yes / denom)
}

fn poisson_pmf(k: u32, lambda: f64) -> f64 {
    let mut log_fact = 0.0;
    for i in 1..=k {
        log_fact += (i as f64).ln();
    }
    (-lambda + k as f64 * lambda.ln() - log_fact).exp()
}

/// Poisson catch-up model. Returns `None` if `margin_for_yes <= 0` — we do
/// not estimate a win probability for tied or losing outcomes.
pub fn soccer_win_prob(margin_for_yes: f64, min_left: f64, base_rate: f64) -> Option<f64> {
    if margin_for_yes <= 0.0 {
        return None;
    }
    let effective_min_left = min_left.max(0.5);
    let injury_factor = if min_left <= 5.0 { 1.5 } else { 1.0 };
    let lambda = base_rate * effective_min_left * injury_factor;
    let m = margin_for_yes as u32;

    let mut p_catch = 0.0;
    for k in m..=(m + 6) {
        p_catch += poisson_pmf(k, lambda.max(1e-9));
    }
    Some(1.0 - p_catch)
}

/// Basketball context-entry gate per SPEC_FULL.md §4.J. Returns the blocking
/// reason on failure.
pub fn basketball_entry_gate(
    period: u32,
    min_left: f64,
    margin_for_yes: f64,
    win_prob: f64,
    params: &BasketballParams,
) -> Result<(), &'static str> {
    if period < params.final_period {
        return Err("basketball_period_not_final");
    }
    if min_left > params.max_min_left {
        return Err("basketball_too_much_time_left");
    }
    if margin_for_yes < params.min_margin {
        return Err("basketball_margin_too_small");
    }
    if win_prob < params.min_win_prob {
        return Err("basketball_win_prob_too_low");
    }
    Ok(())
}

/// Soccer context-entry gate per SPEC_FULL.md §4.J.
pub fn soccer_entry_gate(
    confidence_high: bool,
    period: u32,
    margin_for_yes: f64,
    min_left: f64,
    win_prob: f64,
    last_score_change_age_seconds: Option<i64>,
    cooldown_seconds: i64,
) -> Result<(), &'static str> {
    if !confidence_high {
        return Err("soccer_confidence_low");
    }
    if period != 2 {
        return Err("soccer_not_second_half");
    }
    if margin_for_yes < 2.0 {
        return Err("soccer_margin_too_small");
    }
    if let Some(age) = last_score_change_age_seconds {
        if age < cooldown_seconds {
            return Err("soccer_score_change_cooldown");
        }
    }
    if margin_for_yes < 3.0 {
        if min_left > 15.0 || win_prob < 0.97 {
            return Err("soccer_window_margin2_fail");
        }
    } else if min_left > 20.0 || win_prob < 0.95 {
        return Err("soccer_window_margin3_fail");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_cdf_at_zero_is_half() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn normal_cdf_matches_known_reference_values() {
        assert!((normal_cdf(1.0) - 0.8413).abs() < 1e-3);
        assert!((normal_cdf(-1.0) - 0.1587).abs() < 1e-3);
        assert!((normal_cdf(2.0) - 0.9772).abs() < 1e-3);
    }

    #[test]
    fn basketball_win_prob_rises_with_margin() {
        let params = BasketballParams { sigma: 18.0, total_minutes: 48.0, final_period: 4, max_min_left: 6.0, min_margin: 10.0, min_win_prob: 0.95 };
        let low = basketball_win_prob(5.0, 3.0, &params);
        let high = basketball_win_prob(20.0, 3.0, &params);
        assert!(high > low);
    }

    #[test]
    fn soccer_win_prob_none_for_nonpositive_margin() {
        assert_eq!(soccer_win_prob(0.0, 10.0, 0.03), None);
        assert_eq!(soccer_win_prob(-1.0, 10.0, 0.03), None);
    }

    #[test]
    fn soccer_win_prob_rises_as_time_runs_out() {
        let early = soccer_win_prob(1.0, 30.0, 0.03).unwrap();
        let late = soccer_win_prob(1.0, 3.0, 0.03).unwrap();
        assert!(late > early);
    }

    #[test]
    fn basketball_entry_gate_requires_final_period() {
        let params = BasketballParams { sigma: 18.0, total_minutes: 48.0, final_period: 4, max_min_left: 6.0, min_margin: 10.0, min_win_prob: 0.95 };
        assert_eq!(basketball_entry_gate(3, 2.0, 20.0, 0.99, &params), Err("basketball_period_not_final"));
        assert!(basketball_entry_gate(4, 2.0, 20.0, 0.99, &params).is_ok());
    }

    #[test]
    fn soccer_entry_gate_requires_cooldown_elapsed() {
        let result = soccer_entry_gate(true, 2, 2.0, 10.0, 0.98, Some(30), 90);
        assert_eq!(result, Err("soccer_score_change_cooldown"));
        let result_ok = soccer_entry_gate(true, 2, 2.0, 10.0, 0.98, Some(120), 90);
        assert!(result_ok.is_ok());
    }

    #[test]
    fn soccer_entry_gate_margin_window_branches() {
        // margin=2 branch: min_left must be <=15 and win_prob >=0.97
        assert_eq!(
            soccer_entry_gate(true, 2, 2.0, 16.0, 0.99, None, 90),
            Err("soccer_window_margin2_fail")
        );
        // margin>=3 branch: min_left <=20, win_prob >=0.95
        assert!(soccer_entry_gate(true, 2, 3.0, 20.0, 0.95, None, 90).is_ok());
    }
}
