// =============================================================================
// Soccer (EPL) scoreboard adapter
// =============================================================================
//
// Unlike basketball, soccer confidence depends on being deep enough into
// the second half, and the win-probability model is a Poisson catch-up
// rate rather than a margin/time normal approximation. A `ScoreChangeTracker`
// backs the cooldown gate used at `winprob::soccer_entry_gate`.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::instrument;

use crate::scoreboard::{match_event, parse_matchup, strip_event, EventsCache, RawScoreboard, ScoreChangeTracker, StrippedEvent};
use crate::types::GameState;
use crate::watchlist::ContextSnapshot;

const MASCOT_SUFFIXES: &[&str] = &["fc", "united", "city", "town", "wanderers", "athletic", "albion"];

fn alias_table() -> HashMap<String, Vec<String>> {
    let mut aliases = HashMap::new();
    aliases.insert("man utd".to_string(), vec!["manchester united".to_string()]);
    aliases.insert("man city".to_string(), vec!["manchester city".to_string()]);
    aliases.insert("spurs".to_string(), vec!["tottenham".to_string()]);
    aliases
}

pub struct SoccerScoreboard {
    http: reqwest::Client,
    base_url: String,
    cache: EventsCache,
    score_changes: ScoreChangeTracker,
}

/// `confidence = "high"` only in the second half, within [45, 90) minutes of
/// game time.
fn confidence_is_high(period: u32, minutes_elapsed: f64) -> bool {
    period == 2 && (45.0..90.0).contains(&minutes_elapsed)
}

impl SoccerScoreboard {
    pub fn new(base_url: impl Into<String>, freshness_seconds: i64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            cache: EventsCache::new(freshness_seconds),
            score_changes: ScoreChangeTracker::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&mut self, date: NaiveDate, now_ms: i64) -> Result<()> {
        for key in EventsCache::three_day_keys(date) {
            if self.cache.is_fresh(&key, now_ms) {
                continue;
            }
            let url = format!("{}/scoreboard?dates={}", self.base_url, key);
            let resp = self.http.get(&url).send().await.context("soccer scoreboard: network error")?;
            if !resp.status().is_success() {
                anyhow::bail!("soccer scoreboard: http_{}", resp.status().as_u16());
            }
            let raw: RawScoreboard = resp.json().await.context("soccer scoreboard: parse error")?;
            let stripped: Vec<StrippedEvent> = raw.events.iter().filter_map(strip_event).collect();
            for event in &stripped {
                if let (Some(a), Some(b)) = (event.team_a.score, event.team_b.score) {
                    self.score_changes.observe(&event.id, a, b, now_ms);
                }
            }
            self.cache.put(&key, now_ms, stripped);
        }
        self.score_changes.purge_older_than_24h(now_ms);
        Ok(())
    }

    pub fn derive_context(&self, market_title: &str, date: NaiveDate) -> Option<ContextSnapshot> {
        let (team_a, team_b) = parse_matchup(market_title)?;
        let events = self.cache.merged_events(date);
        let aliases = alias_table();
        let event = match_event(&team_a, &team_b, &events, &aliases, MASCOT_SUFFIXES)?;

        Some(ContextSnapshot {
            state: event.state,
            period: event.period,
            minutes_left: (90.0 - minutes_elapsed(event)).max(0.0),
            team_a: event.team_a.name.clone(),
            team_a_score: event.team_a.score,
            team_b: event.team_b.name.clone(),
            team_b_score: event.team_b.score,
            decided: false,
        })
    }

    /// Like `derive_context`, but also returns the matched event id so the
    /// caller can query `confidence_high_for` / `seconds_since_last_score_change`
    /// for the same game without re-matching.
    pub fn derive_context_with_id(&self, market_title: &str, date: NaiveDate) -> Option<(String, ContextSnapshot)> {
        let (team_a, team_b) = parse_matchup(market_title)?;
        let events = self.cache.merged_events(date);
        let aliases = alias_table();
        let event = match_event(&team_a, &team_b, &events, &aliases, MASCOT_SUFFIXES)?;

        Some((
            event.id.clone(),
            ContextSnapshot {
                state: event.state,
                period: event.period,
                minutes_left: (90.0 - minutes_elapsed(event)).max(0.0),
                team_a: event.team_a.name.clone(),
                team_a_score: event.team_a.score,
                team_b: event.team_b.name.clone(),
                team_b_score: event.team_b.score,
                decided: false,
            },
        ))
    }

    pub fn confidence_high_for(&self, event_id: &str, events: &[StrippedEvent]) -> bool {
        events
            .iter()
            .find(|e| e.id == event_id)
            .map(|e| confidence_is_high(e.period, minutes_elapsed(e)))
            .unwrap_or(false)
    }

    pub fn merged_events(&self, date: NaiveDate) -> Vec<StrippedEvent> {
        self.cache.merged_events(date)
    }

    pub fn seconds_since_last_score_change(&self, game_id: &str, now_ms: i64) -> Option<i64> {
        self.score_changes.seconds_since_last_change(game_id, now_ms)
    }

    pub fn win_prob_for_yes(context: &ContextSnapshot, yes_team: &str, base_rate: f64) -> Option<f64> {
        if context.state != GameState::In {
            return None;
        }
        let (yes_score, no_score) = if context.team_a.eq_ignore_ascii_case(yes_team) {
            (context.team_a_score?, context.team_b_score?)
        } else {
            (context.team_b_score?, context.team_a_score?)
        };
        let margin = (yes_score - no_score) as f64;
        crate::winprob::soccer_win_prob(margin, context.minutes_left, base_rate)
    }
}

/// First half is minutes 0-45, second half continues from 45 using
/// `clock_seconds_left` counting down within the period.
fn minutes_elapsed(event: &StrippedEvent) -> f64 {
    let period_elapsed = 45.0 - (event.clock_seconds_left / 60.0).min(45.0);
    if event.period <= 1 {
        period_elapsed
    } else {
        45.0 + period_elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_high_only_in_second_half_window() {
        assert!(confidence_is_high(2, 50.0));
        assert!(!confidence_is_high(2, 91.0));
        assert!(!confidence_is_high(1, 20.0));
    }

    fn event(period: u32, clock_seconds_left: f64, a: i64, b: i64) -> StrippedEvent {
        StrippedEvent {
            id: "g1".into(),
            state: GameState::In,
            period,
            clock_seconds_left,
            team_a: crate::scoreboard::TeamScore { name: "Arsenal".into(), score: Some(a) },
            team_b: crate::scoreboard::TeamScore { name: "Chelsea".into(), score: Some(b) },
        }
    }

    #[test]
    fn minutes_elapsed_accounts_for_second_half_offset() {
        let first_half = event(1, 0.0, 1, 0);
        let second_half = event(2, 10.0 * 60.0, 1, 0);
        assert!((minutes_elapsed(&first_half) - 45.0).abs() < 1e-6);
        assert!((minutes_elapsed(&second_half) - 80.0).abs() < 1e-6);
    }

    #[test]
    fn win_prob_for_yes_delegates_to_poisson_model() {
        let ctx = ContextSnapshot {
            state: GameState::In,
            period: 2,
            minutes_left: 10.0,
            team_a: "Arsenal".into(),
            team_a_score: Some(2),
            team_b: "Chelsea".into(),
            team_b_score: Some(0),
            decided: false,
        };
        let prob = SoccerScoreboard::win_prob_for_yes(&ctx, "Arsenal", 0.03).unwrap();
        assert!(prob > 0.5);
    }
}
