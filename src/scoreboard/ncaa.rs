// =============================================================================
// College basketball (NCAAB) scoreboard adapter
// =============================================================================
//
// Same shape as `nba.rs` (shared cache/matcher plumbing in `mod.rs`), with
// its own mascot list, alias table, and two-period (H1/H2) clock instead of
// NBA's four quarters.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::instrument;

use crate::config::BasketballParams;
use crate::scoreboard::{is_decided, match_event, parse_matchup, strip_event, EventsCache, RawScoreboard, StrippedEvent};
use crate::types::GameState;
use crate::watchlist::ContextSnapshot;

const MASCOT_SUFFIXES: &[&str] =
    &["blue devils", "tar heels", "wildcats", "jayhawks", "bulldogs", "huskies", "cardinals", "wolverines"];

fn alias_table() -> HashMap<String, Vec<String>> {
    let mut aliases = HashMap::new();
    aliases.insert("unc".to_string(), vec!["north carolina".to_string(), "tar heels".to_string()]);
    aliases.insert("uconn".to_string(), vec!["connecticut".to_string(), "huskies".to_string()]);
    aliases
}

pub struct NcaaScoreboard {
    http: reqwest::Client,
    base_url: String,
    cache: EventsCache,
}

impl NcaaScoreboard {
    pub fn new(base_url: impl Into<String>, freshness_seconds: i64) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), cache: EventsCache::new(freshness_seconds) }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&mut self, date: NaiveDate, now_ms: i64) -> Result<()> {
        for key in EventsCache::three_day_keys(date) {
            if self.cache.is_fresh(&key, now_ms) {
                continue;
            }
            let url = format!("{}/scoreboard?dates={}&groups=50", self.base_url, key);
            let resp = self.http.get(&url).send().await.context("ncaab scoreboard: network error")?;
            if !resp.status().is_success() {
                anyhow::bail!("ncaab scoreboard: http_{}", resp.status().as_u16());
            }
            let raw: RawScoreboard = resp.json().await.context("ncaab scoreboard: parse error")?;
            let stripped: Vec<StrippedEvent> = raw.events.iter().filter_map(strip_event).collect();
            self.cache.put(&key, now_ms, stripped);
        }
        Ok(())
    }

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

    #[test]
    fn win_prob_respects_ncaa_final_period_of_two() {
        let params = BasketballParams { sigma: 19.0, total_minutes: 40.0, final_period: 2, max_min_left: 6.0, min_margin: 10.0, min_win_prob: 0.95 };
        let ctx = ContextSnapshot {
            state: GameState::In,
            period: 2,
            minutes_left: 3.0,
            team_a: "Duke".into(),
            team_a_score: Some(75),
            team_b: "UNC".into(),
            team_b_score: Some(60),
            decided: true,
        };
        let prob = NcaaScoreboard::win_prob_for_yes(&ctx, "Duke", &params).unwrap();
        assert!(prob > 0.9);
        assert!(crate::winprob::basketball_entry_gate(ctx.period, ctx.minutes_left, 15.0, prob, &params).is_ok());
    }
}
