// =============================================================================
// NBA scoreboard adapter
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{instrument, warn};

use crate::config::BasketballParams;
use crate::scoreboard::{is_decided, match_event, parse_matchup, strip_event, EventsCache, RawScoreboard, StrippedEvent};
use crate::types::GameState;
use crate::watchlist::ContextSnapshot;

const MASCOT_SUFFIXES: &[&str] = &["lakers", "celtics", "warriors", "nets", "knicks", "bulls", "heat", "nuggets"];

fn alias_table() -> HashMap<String, Vec<String>> {
    let mut aliases = HashMap::new();
    aliases.insert("la lakers".to_string(), vec!["lakers".to_string()]);
    aliases.insert("la clippers".to_string(), vec!["clippers".to_string()]);
    aliases
}

pub struct NbaScoreboard {
    http: reqwest::Client,
    base_url: String,
    cache: EventsCache,
}

impl NbaScoreboard {
    pub fn new(base_url: impl Into<String>, freshness_seconds: i64) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), cache: EventsCache::new(freshness_seconds) }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&mut self, date: NaiveDate, now_ms: i64) -> Result<()> {
        for key in EventsCache::three_day_keys(date) {
            if self.cache.is_fresh(&key, now_ms) {
                continue;
            }
            let url = format!("{}/scoreboard?dates={}", self.base_url, key);
            let resp = self.http.get(&url).send().await.context("nba scoreboard: network error")?;
            if !resp.status().is_success() {
                anyhow::bail!("nba scoreboard: http_{}", resp.status().as_u16());
            }
            let raw: RawScoreboard = resp.json().await.context("nba scoreboard: parse error")?;
            let stripped: Vec<StrippedEvent> = raw.events.iter().filter_map(strip_event).collect();
            self.cache.put(&key, now_ms, stripped);
        }
        Ok(())
    }

    /// Match a market title against the cached events and produce a context
    /// snapshot, or `None` on no/ambiguous match (fail-closed).
    pub fn derive_context(&self, market_title: &str, date: NaiveDate) -> Option<ContextSnapshot> {
        let (team_a, team_b) = parse_matchup(market_title)?;
        let events = self.cache.merged_events(date);
        let aliases = alias_table();
        let event = match_event(&team_a, &team_b, &events, &aliases, MASCOT_SUFFIXES)?;

        let minutes_left = event.clock_seconds_left / 60.0;
        let decided = match (event.team_a.score, event.team_b.score) {
            (Some(a), Some(b)) => is_decided((a - b).abs() as f64, minutes_left),
            _ => false,
        };
        Some(ContextSnapshot {
            state: event.state,
            period: event.period,
            minutes_left,
            team_a: event.team_a.name.clone(),
            team_a_score: event.team_a.score,
            team_b: event.team_b.name.clone(),
            team_b_score: event.team_b.score,
            decided,
        })
    }

    /// `win_prob` for the YES outcome (team named `yes_team`), or `None`
    /// before live/both scores are known.
    pub fn win_prob_for_yes(context: &ContextSnapshot, yes_team: &str, params: &BasketballParams) -> Option<f64> {
        if context.state != GameState::In {
            return None;
        }
        let (yes_score, no_score) = if context.team_a.eq_ignore_ascii_case(yes_team) {
            (context.team_a_score?, context.team_b_score?)
        } else {
            (context.team_b_score?, context.team_a_score?)
        };
        let margin = (yes_score - no_score) as f64;
        Some(crate::winprob::basketball_win_prob(margin, context.minutes_left, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(period: u32, minutes_left: f64, a_score: i64, b_score: i64) -> ContextSnapshot {
        ContextSnapshot {
            state: GameState::In,
            period,
            minutes_left,
            team_a: "Lakers".into(),
            team_a_score: Some(a_score),
            team_b: "Celtics".into(),
            team_b_score: Some(b_score),
            decided: false,
        }
    }

    #[test]
    fn win_prob_uses_margin_for_named_yes_team() {
        let params = BasketballParams { sigma: 18.0, total_minutes: 48.0, final_period: 4, max_min_left: 6.0, min_margin: 10.0, min_win_prob: 0.95 };
        let ctx = context(4, 2.0, 100, 80);
        let prob_a = NbaScoreboard::win_prob_for_yes(&ctx, "Lakers", &params).unwrap();
        let prob_b = NbaScoreboard::win_prob_for_yes(&ctx, "Celtics", &params).unwrap();
        assert!(prob_a > 0.5);
        assert!(prob_b < 0.5);
    }

    #[test]
    fn win_prob_none_before_live() {
        let params = BasketballParams { sigma: 18.0, total_minutes: 48.0, final_period: 4, max_min_left: 6.0, min_margin: 10.0, min_win_prob: 0.95 };
        let mut ctx = context(4, 2.0, 100, 80);
        ctx.state = GameState::Pre;
        assert!(NbaScoreboard::win_prob_for_yes(&ctx, "Lakers", &params).is_none());
    }
}
