// =============================================================================
// Watchlist store (component F)
// =============================================================================
//
// Single-writer map from conditionId to market record: admit, update,
// expire, evict, purge. Grounded on the teacher's `position_engine.rs`
// (`RwLock<Vec<_>>`-backed store with explicit lifecycle methods) but keyed
// by conditionId instead of position id, since a market exists on the
// watchlist long before (and sometimes without ever) becoming a position.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::discovery::MarketCandidate;
use crate::streaming::StreamingClient;
use crate::types::{MarketStatus, NearBy, QuoteSource, SignalType};

#[derive(Debug, Clone, Serialize)]
pub struct PriceSnapshot {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread: Option<f64>,
    pub updated_ts: i64,
    pub source: QuoteSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepthSnapshot {
    pub entry_depth_usd_ask: f64,
    pub exit_depth_usd_bid: f64,
    pub bid_levels_used: usize,
    pub ask_levels_used: usize,
    pub updated_ts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub state: crate::types::GameState,
    pub period: u32,
    pub minutes_left: f64,
    pub team_a: String,
    pub team_a_score: Option<i64>,
    pub team_b: String,
    pub team_b_score: Option<i64>,
    /// True once the game is effectively decided by blowout margin — see
    /// `crate::scoreboard::is_decided`. Always `false` for sports that don't
    /// compute it (soccer uses its own confidence label instead).
    pub decided: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextEntrySnapshot {
    pub yes_outcome_name: String,
    pub margin_for_yes: Option<f64>,
    pub win_prob: Option<f64>,
    pub allowed: bool,
    pub blocked_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectInfo {
    pub reason: String,
    pub ts: i64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketRecord {
    pub condition_id: String,
    pub slug: String,
    pub title: String,
    pub league: String,
    pub outcomes: Vec<String>,
    pub token_pair: Vec<String>,
    pub yes_token_id: Option<String>,
    pub no_token_id: Option<String>,
    pub volume_24h: f64,
    pub first_seen_ts: i64,
    pub last_seen_ts: i64,
    pub end_date: String,

    pub status: MarketStatus,
    pub status_since_ts: i64,

    pub last_price: Option<PriceSnapshot>,
    pub last_depth: Option<DepthSnapshot>,

    pub last_book_update_ts: Option<i64>,
    pub first_incomplete_quote_ts: Option<i64>,
    pub first_bad_tradeability_ts: Option<i64>,

    pub pending_since_ts: Option<i64>,
    pub pending_deadline_ts: Option<i64>,
    pub entry_bid_snapshot: Option<f64>,

    pub context: Option<ContextSnapshot>,
    pub context_entry: Option<ContextEntrySnapshot>,

    pub cooldown_until_ts: i64,
    pub last_reject: Option<RejectInfo>,

    pub signal_count: u32,
    pub signal_last_ts: Option<i64>,
    pub signal_type: Option<SignalType>,

    pub terminal_confirmed_since_ts: Option<i64>,
}

impl MarketRecord {
    fn from_candidate(candidate: &MarketCandidate, now: i64) -> Self {
        Self {
            condition_id: candidate.condition_id.clone(),
            slug: candidate.slug.clone(),
            title: candidate.title.clone(),
            league: candidate.league.clone(),
            outcomes: candidate.outcomes.clone(),
            token_pair: candidate.token_pair.clone(),
            yes_token_id: None,
            no_token_id: None,
            volume_24h: candidate.volume_24h,
            first_seen_ts: now,
            last_seen_ts: now,
            end_date: candidate.end_date.clone(),
            status: MarketStatus::Watching,
            status_since_ts: now,
            last_price: None,
            last_depth: None,
            last_book_update_ts: None,
            first_incomplete_quote_ts: None,
            first_bad_tradeability_ts: None,
            pending_since_ts: None,
            pending_deadline_ts: None,
            entry_bid_snapshot: None,
            context: None,
            context_entry: None,
            cooldown_until_ts: 0,
            last_reject: None,
            signal_count: 0,
            signal_last_ts: None,
            signal_type: None,
            terminal_confirmed_since_ts: None,
        }
    }

    /// Rank used for bound eviction: expired first, then ignored markets
    /// have no analogue here so we rank expired < traded < watching family,
    /// i.e. lowest rank evicts first.
    fn eviction_rank(&self) -> u8 {
        match self.status {
            MarketStatus::Expired => 0,
            MarketStatus::Closed => 1,
            MarketStatus::Traded => 2,
            MarketStatus::Watching => 3,
            MarketStatus::PendingSignal => 4,
            MarketStatus::Signaled => 5,
        }
    }

    pub fn is_valid_token_pair(&self) -> bool {
        self.token_pair.is_empty() || self.token_pair.len() == 2
    }

    pub fn set_status(&mut self, status: MarketStatus, now: i64) {
        if self.status != status {
            self.status = status;
            self.status_since_ts = now;
        }
    }
}

pub struct Watchlist {
    records: RwLock<HashMap<String, MarketRecord>>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self { records: RwLock::new(HashMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, condition_id: &str) -> Option<MarketRecord> {
        self.records.read().get(condition_id).cloned()
    }

    pub fn all(&self) -> Vec<MarketRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn with_mut<R>(&self, condition_id: &str, f: impl FnOnce(&mut MarketRecord) -> R) -> Option<R> {
        let mut records = self.records.write();
        records.get_mut(condition_id).map(f)
    }

    pub fn remove(&self, condition_id: &str) -> Option<MarketRecord> {
        self.records.write().remove(condition_id)
    }

    /// Non-destructive upsert: scalars in the candidate overwrite only when
    /// non-empty; the token pair is replaced only if the new one is valid
    /// and the old one is missing/invalid. `last_seen_ts` is monotone.
    pub fn upsert(&self, candidate: &MarketCandidate, now: i64) {
        let mut records = self.records.write();
        match records.get_mut(&candidate.condition_id) {
            None => {
                records.insert(candidate.condition_id.clone(), MarketRecord::from_candidate(candidate, now));
            }
            Some(existing) => {
                if !candidate.title.is_empty() {
                    existing.title = candidate.title.clone();
                }
                if !candidate.slug.is_empty() {
                    existing.slug = candidate.slug.clone();
                }
                if candidate.volume_24h > 0.0 {
                    existing.volume_24h = candidate.volume_24h;
                }
                if !candidate.end_date.is_empty() {
                    existing.end_date = candidate.end_date.clone();
                }
                if !existing.is_valid_token_pair_len2() && candidate.token_pair.len() == 2 {
                    existing.token_pair = candidate.token_pair.clone();
                }
                if existing.outcomes.len() != 2 && candidate.outcomes.len() == 2 {
                    existing.outcomes = candidate.outcomes.clone();
                }
                existing.last_seen_ts = existing.last_seen_ts.max(now);
            }
        }
    }

    /// TTL expiry: any market unseen for `ttl_minutes` becomes `expired`.
    pub fn expire_stale(&self, now: i64, ttl_minutes: f64) -> usize {
        let ttl_ms = (ttl_minutes * 60_000.0) as i64;
        let mut count = 0;
        let mut records = self.records.write();
        for record in records.values_mut() {
            if record.status == MarketStatus::Expired {
                continue;
            }
            if now - record.last_seen_ts > ttl_ms {
                record.set_status(MarketStatus::Expired, now);
                count += 1;
            }
        }
        count
    }

    /// Evict down to `max_watchlist` by rank (expired first, ...), tied by
    /// oldest `last_seen_ts` first.
    pub fn evict_to_bound(&self, max_watchlist: usize) -> Vec<String> {
        let mut records = self.records.write();
        if records.len() <= max_watchlist {
            return Vec::new();
        }
        let mut ranked: Vec<(String, u8, i64)> = records
            .values()
            .map(|r| (r.condition_id.clone(), r.eviction_rank(), r.last_seen_ts))
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let overflow = records.len() - max_watchlist;
        let evicted: Vec<String> = ranked.into_iter().take(overflow).map(|(id, _, _)| id).collect();
        for id in &evicted {
            records.remove(id);
        }
        evicted
    }

    /// Terminal-price purge (SPEC_FULL.md §4.F). `open_slugs` are slugs with
    /// a live position; those markets are never purged this way.
    pub fn terminal_price_purge(
        &self,
        streaming: &StreamingClient,
        now: i64,
        open_slugs: &std::collections::HashSet<String>,
        purge_seconds: f64,
    ) -> Vec<String> {
        let purge_ms = (purge_seconds * 1000.0) as i64;
        let mut to_remove = Vec::new();
        let mut records = self.records.write();
        for record in records.values_mut() {
            if !matches!(record.status, MarketStatus::Watching | MarketStatus::Expired) {
                continue;
            }
            let Some(yes_token) = record.yes_token_id.clone() else { continue };
            let Some(quote) = streaming.get(&yes_token) else { continue };
            let is_terminal = quote.best_bid.map(|b| b >= 0.995).unwrap_or(false)
                || quote.best_ask.map(|a| a <= 0.005).unwrap_or(false);

            if is_terminal {
                let since = *record.terminal_confirmed_since_ts.get_or_insert(now);
                if now - since >= purge_ms && !open_slugs.contains(&record.slug) {
                    to_remove.push(record.condition_id.clone());
                }
            } else {
                record.terminal_confirmed_since_ts = None;
            }
        }
        for id in &to_remove {
            records.remove(id);
        }
        to_remove
    }

    /// Purge-gate timers for watching markets: book-stale, quote-incomplete,
    /// tradeability-degraded. Returns condition_ids expired this call with
    /// their reason.
    pub fn apply_purge_gates(
        &self,
        now: i64,
        stale_book_minutes: f64,
        stale_quote_minutes: f64,
        stale_tradeability_minutes: f64,
    ) -> Vec<(String, &'static str)> {
        let mut expired = Vec::new();
        let mut records = self.records.write();
        for record in records.values_mut() {
            if record.status != MarketStatus::Watching {
                continue;
            }
            if let Some(last_book) = record.last_book_update_ts {
                if now - last_book > (stale_book_minutes * 60_000.0) as i64 {
                    record.set_status(MarketStatus::Expired, now);
                    expired.push((record.condition_id.clone(), "purge_book_stale"));
                    continue;
                }
            }
            if let Some(since) = record.first_incomplete_quote_ts {
                if now - since > (stale_quote_minutes * 60_000.0) as i64 {
                    record.set_status(MarketStatus::Expired, now);
                    expired.push((record.condition_id.clone(), "purge_quote_incomplete"));
                    continue;
                }
            }
            if let Some(since) = record.first_bad_tradeability_ts {
                if now - since > (stale_tradeability_minutes * 60_000.0) as i64 {
                    record.set_status(MarketStatus::Expired, now);
                    expired.push((record.condition_id.clone(), "purge_tradeability_degraded"));
                }
            }
        }
        expired
    }

    /// Date-window filter: markets whose end-date falls outside
    /// `[min_days_delta, max_days_delta]` (UTC day count from now) are
    /// expired in place.
    pub fn apply_date_window(&self, now_date: chrono::NaiveDate, min_days_delta: i64, max_days_delta: i64, now: i64) -> usize {
        let mut count = 0;
        let mut records = self.records.write();
        for record in records.values_mut() {
            if record.status == MarketStatus::Expired {
                continue;
            }
            let Ok(end) = chrono::DateTime::parse_from_rfc3339(&record.end_date) else { continue };
            let delta = (end.date_naive() - now_date).num_days();
            if delta < min_days_delta || delta > max_days_delta {
                record.set_status(MarketStatus::Expired, now);
                count += 1;
            }
        }
        count
    }

    /// Pending-window / near-margin classification helper used by the
    /// evaluation loop to compute `signal_type`.
    pub fn classify_signal_type(near_by: NearBy) -> SignalType {
        match near_by {
            NearBy::Spread => SignalType::Microstructure,
            NearBy::Ask | NearBy::Both => SignalType::Highprob,
            NearBy::None => SignalType::Unknown,
        }
    }
}

impl MarketRecord {
    fn is_valid_token_pair_len2(&self) -> bool {
        self.token_pair.len() == 2
    }
}

impl Default for Watchlist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(condition_id: &str) -> MarketCandidate {
        MarketCandidate {
            condition_id: condition_id.to_string(),
            league: "nba".to_string(),
            slug: "cbb-a-b".to_string(),
            title: "A vs B".to_string(),
            token_pair: vec!["t1".to_string(), "t2".to_string()],
            outcomes: vec!["A".to_string(), "B".to_string()],
            volume_24h: 1000.0,
            end_date: "2026-08-02T00:00:00Z".to_string(),
            event_id: "e1".to_string(),
            event_slug: "a-vs-b".to_string(),
        }
    }

    #[test]
    fn upsert_is_idempotent_modulo_last_seen() {
        let watchlist = Watchlist::new();
        let c = candidate("c1");
        watchlist.upsert(&c, 1000);
        watchlist.upsert(&c, 2000);
        assert_eq!(watchlist.len(), 1);
        let record = watchlist.get("c1").unwrap();
        assert_eq!(record.last_seen_ts, 2000);
        assert_eq!(record.first_seen_ts, 1000);
    }

    #[test]
    fn upsert_does_not_destroy_resolved_token_pair() {
        let watchlist = Watchlist::new();
        let c = candidate("c1");
        watchlist.upsert(&c, 1000);
        watchlist.with_mut("c1", |r| {
            r.yes_token_id = Some("t1".to_string());
            r.no_token_id = Some("t2".to_string());
        });
        let mut c2 = c.clone();
        c2.token_pair = vec![];
        watchlist.upsert(&c2, 2000);
        let record = watchlist.get("c1").unwrap();
        assert_eq!(record.token_pair.len(), 2);
    }

    #[test]
    fn ttl_expiry_marks_stale_markets() {
        let watchlist = Watchlist::new();
        watchlist.upsert(&candidate("c1"), 0);
        let count = watchlist.expire_stale(121 * 60_000, 120.0);
        assert_eq!(count, 1);
        assert_eq!(watchlist.get("c1").unwrap().status, MarketStatus::Expired);
    }

    #[test]
    fn eviction_prefers_expired_then_oldest() {
        let watchlist = Watchlist::new();
        watchlist.upsert(&candidate("c1"), 100);
        watchlist.upsert(&candidate("c2"), 200);
        watchlist.with_mut("c1", |r| r.status = MarketStatus::Expired);
        let evicted = watchlist.evict_to_bound(1);
        assert_eq!(evicted, vec!["c1".to_string()]);
        assert_eq!(watchlist.len(), 1);
    }

    #[test]
    fn terminal_purge_respects_open_slug_exclusion() {
        let watchlist = Watchlist::new();
        watchlist.upsert(&candidate("c1"), 0);
        watchlist.with_mut("c1", |r| r.yes_token_id = Some("t1".to_string()));
        let streaming = StreamingClient::new(500);
        streaming.apply_update("t1", Some(0.996), Some(0.997));

        let mut open = std::collections::HashSet::new();
        open.insert("cbb-a-b".to_string());

        // t=0..32s, terminal the whole time, but slug has an open position.
        let removed = watchlist.terminal_price_purge(&streaming, 32_000, &open, 30.0);
        assert!(removed.is_empty());
        assert_eq!(watchlist.len(), 1);
    }

    #[test]
    fn terminal_purge_fires_after_30s_without_open_position() {
        let watchlist = Watchlist::new();
        watchlist.upsert(&candidate("c1"), 0);
        watchlist.with_mut("c1", |r| r.yes_token_id = Some("t1".to_string()));
        let streaming = StreamingClient::new(500);
        streaming.apply_update("t1", Some(0.996), Some(0.997));

        watchlist.terminal_price_purge(&streaming, 0, &Default::default(), 30.0);
        let removed = watchlist.terminal_price_purge(&streaming, 30_000, &Default::default(), 30.0);
        assert_eq!(removed, vec!["c1".to_string()]);
    }

    #[test]
    fn eviction_rank_orders_expired_before_watching() {
        let mut r = candidate("c1");
        r.condition_id = "c1".into();
        let watchlist = Watchlist::new();
        watchlist.upsert(&r, 0);
        let record = watchlist.get("c1").unwrap();
        assert_eq!(record.eviction_rank(), 3);
    }
}
