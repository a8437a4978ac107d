// =============================================================================
// Clock & identifiers
// =============================================================================

use chrono::Utc;

/// Milliseconds since the Unix epoch, UTC. The sole source of "now" consulted
/// by the evaluation loop and every TTL/cooldown/deadline comparison.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Build a stable signal id: `"<now_ms>|<slug>"`. Deterministic given its
/// inputs, so the same signal reconstructed after a restart compares equal.
pub fn signal_id(now_ms: i64, slug: &str) -> String {
    format!("{now_ms}|{slug}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_id_is_deterministic() {
        assert_eq!(signal_id(1000, "nba-lal-bos"), "1000|nba-lal-bos");
        assert_eq!(signal_id(1000, "nba-lal-bos"), signal_id(1000, "nba-lal-bos"));
    }

    #[test]
    fn now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
