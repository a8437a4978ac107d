// =============================================================================
// Rolling metrics & status (component M)
// =============================================================================
//
// Per-minute rotating counter buckets (keyed by reject reason, resolve
// outcome, price source, etc.), a separate 10-minute success/fail window for
// health labeling, and fixed-length ring buffers of recent notable events.
// Grounded on the teacher's `risk.rs` rotating-window / auto-reset-on-
// boundary idiom (`maybe_reset_daily`), generalized from "reset once a day"
// to "rotate every minute, keep N most recent minutes".
// =============================================================================

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

const BUCKET_WINDOW_MINUTES: usize = 5;
const HEALTH_WINDOW_MINUTES: usize = 10;
const RING_BUFFER_LEN: usize = 20;

fn minute_of(now_ms: i64) -> i64 {
    now_ms / 60_000
}

/// Minutely rotating counters over a fixed window. Each bucket is a full
/// `HashMap` so any key family (reject reasons, league-qualified keys, price
/// sources) can share the same rotation machinery.
struct RotatingBuckets {
    buckets: VecDeque<(i64, HashMap<String, u64>)>,
    window_minutes: usize,
}

impl RotatingBuckets {
    fn new(window_minutes: usize) -> Self {
        Self { buckets: VecDeque::new(), window_minutes }
    }

    fn rotate(&mut self, now_ms: i64) {
        let minute = minute_of(now_ms);
        match self.buckets.back() {
            Some((last_minute, _)) if *last_minute == minute => {}
            _ => {
                self.buckets.push_back((minute, HashMap::new()));
                while self.buckets.len() > self.window_minutes {
                    self.buckets.pop_front();
                }
            }
        }
    }

    fn increment(&mut self, now_ms: i64, key: &str) {
        self.rotate(now_ms);
        if let Some((_, bucket)) = self.buckets.back_mut() {
            *bucket.entry(key.to_string()).or_insert(0) += 1;
        }
    }

    fn window_sum(&self, key: &str) -> u64 {
        self.buckets.iter().map(|(_, bucket)| bucket.get(key).copied().unwrap_or(0)).sum()
    }

    fn window_total(&self) -> u64 {
        self.buckets.iter().map(|(_, bucket)| bucket.values().sum::<u64>()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Ok,
    Degraded,
    Bad,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalSnapshot {
    pub signal_id: String,
    pub condition_id: String,
    pub signal_type: String,
    pub ts: i64,
}

pub struct Metrics {
    counters: RotatingBuckets,
    health_success: RotatingBuckets,
    health_fail: RotatingBuckets,
    cumulative_rejects: HashMap<String, u64>,
    signal_ring: VecDeque<SignalSnapshot>,
    pending_enter_ring: VecDeque<String>,
    pending_timeout_ring: VecDeque<String>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: RotatingBuckets::new(BUCKET_WINDOW_MINUTES),
            health_success: RotatingBuckets::new(HEALTH_WINDOW_MINUTES),
            health_fail: RotatingBuckets::new(HEALTH_WINDOW_MINUTES),
            cumulative_rejects: HashMap::new(),
            signal_ring: VecDeque::new(),
            pending_enter_ring: VecDeque::new(),
            pending_timeout_ring: VecDeque::new(),
        }
    }

    pub fn bump(&mut self, now_ms: i64, key: &str) {
        self.counters.increment(now_ms, key);
    }

    pub fn bump_reject(&mut self, now_ms: i64, league: &str, reason: &str) {
        self.counters.increment(now_ms, &format!("reject_by_league:{league}:{reason}"));
        self.counters.increment(now_ms, &format!("reject:{reason}"));
        *self.cumulative_rejects.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn cumulative_reject_count(&self, reason: &str) -> u64 {
        self.cumulative_rejects.get(reason).copied().unwrap_or(0)
    }

    pub fn window_count(&self, key: &str) -> u64 {
        self.counters.window_sum(key)
    }

    pub fn record_network_outcome(&mut self, now_ms: i64, ok: bool) {
        if ok {
            self.health_success.increment(now_ms, "ok");
        } else {
            self.health_fail.increment(now_ms, "fail");
        }
    }

    /// `ok` below 5% failure rate, `degraded` below 30%, `bad` otherwise.
    /// With no samples in the window, health is `ok`.
    pub fn health(&self) -> Health {
        let success = self.health_success.window_total();
        let fail = self.health_fail.window_total();
        let total = success + fail;
        if total == 0 {
            return Health::Ok;
        }
        let fail_rate = fail as f64 / total as f64;
        if fail_rate < 0.05 {
            Health::Ok
        } else if fail_rate < 0.30 {
            Health::Degraded
        } else {
            Health::Bad
        }
    }

    pub fn push_signal(&mut self, snapshot: SignalSnapshot) {
        self.signal_ring.push_back(snapshot);
        while self.signal_ring.len() > RING_BUFFER_LEN {
            self.signal_ring.pop_front();
        }
    }

    pub fn push_pending_enter(&mut self, condition_id: &str) {
        self.pending_enter_ring.push_back(condition_id.to_string());
        while self.pending_enter_ring.len() > RING_BUFFER_LEN {
            self.pending_enter_ring.pop_front();
        }
    }

    pub fn push_pending_timeout(&mut self, condition_id: &str) {
        self.pending_timeout_ring.push_back(condition_id.to_string());
        while self.pending_timeout_ring.len() > RING_BUFFER_LEN {
            self.pending_timeout_ring.pop_front();
        }
    }

    pub fn recent_signals(&self) -> Vec<SignalSnapshot> {
        self.signal_ring.iter().cloned().collect()
    }

    pub fn recent_pending_enters(&self) -> Vec<String> {
        self.pending_enter_ring.iter().cloned().collect()
    }

    pub fn recent_pending_timeouts(&self) -> Vec<String> {
        self.pending_timeout_ring.iter().cloned().collect()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_sum_rotates_out_old_minutes() {
        let mut metrics = Metrics::new();
        metrics.bump(0, "stage1_evaluated");
        metrics.bump(6 * 60_000, "stage1_evaluated");
        // 6 minutes later: minute 0's bucket has fallen out of a 5-minute window.
        assert_eq!(metrics.window_count("stage1_evaluated"), 1);
    }

    #[test]
    fn reject_bumps_both_global_and_league_keys() {
        let mut metrics = Metrics::new();
        metrics.bump_reject(0, "nba", "depth_ask_below_min");
        assert_eq!(metrics.window_count("reject:depth_ask_below_min"), 1);
        assert_eq!(metrics.window_count("reject_by_league:nba:depth_ask_below_min"), 1);
        assert_eq!(metrics.cumulative_reject_count("depth_ask_below_min"), 1);
    }

    #[test]
    fn cumulative_rejects_survive_bucket_rotation() {
        let mut metrics = Metrics::new();
        for i in 0..10 {
            metrics.bump_reject(i * 60_000, "nba", "cooldown_active");
        }
        assert_eq!(metrics.cumulative_reject_count("cooldown_active"), 10);
        assert!(metrics.window_count("reject:cooldown_active") < 10);
    }

    #[test]
    fn health_is_ok_with_no_samples() {
        let metrics = Metrics::new();
        assert_eq!(metrics.health(), Health::Ok);
    }

    #[test]
    fn health_degrades_with_failure_rate() {
        let mut metrics = Metrics::new();
        for _ in 0..7 {
            metrics.record_network_outcome(0, true);
        }
        for _ in 0..3 {
            metrics.record_network_outcome(0, false);
        }
        assert_eq!(metrics.health(), Health::Degraded);
    }

    #[test]
    fn health_is_bad_under_majority_failure() {
        let mut metrics = Metrics::new();
        metrics.record_network_outcome(0, true);
        for _ in 0..5 {
            metrics.record_network_outcome(0, false);
        }
        assert_eq!(metrics.health(), Health::Bad);
    }

    #[test]
    fn ring_buffer_caps_at_twenty() {
        let mut metrics = Metrics::new();
        for i in 0..30 {
            metrics.push_signal(SignalSnapshot {
                signal_id: format!("sig{i}"),
                condition_id: "c1".into(),
                signal_type: "highprob".into(),
                ts: i,
            });
        }
        assert_eq!(metrics.recent_signals().len(), 20);
        assert_eq!(metrics.recent_signals()[0].signal_id, "sig10");
    }
}
