// =============================================================================
// Scoreboard adapters (component I)
// =============================================================================
//
// Common plumbing shared by every sport: the stripped event schema, team-name
// normalization, fuzzy matching, the per-sport events cache with its 15s
// freshness window and 3-day UTC-midnight merge, and a score-change tracker
// used by the soccer cooldown gate. No teacher file does anything like this
// (the teacher trades crypto, not live sports), so this is grounded on
// SPEC_FULL.md §4.I directly; the fetch client itself reuses the
// `reqwest::Client` + `anyhow::Context` idiom from `discovery.rs`.
// =============================================================================

pub mod nba;
pub mod ncaa;
pub mod soccer;

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::types::GameState;

#[derive(Debug, Clone)]
pub struct TeamScore {
    pub name: String,
    pub score: Option<i64>,
}

#[derive(Debug)]
pub struct StrippedEvent {
    pub id: String,
    pub state: GameState,
    pub period: u32,
    pub clock_seconds_left: f64,
    pub team_a: TeamScore,
    pub team_b: TeamScore,
}

#[derive(Debug, Deserialize)]
pub struct RawTeam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "shortDisplayName", default)]
    pub short_display_name: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct RawCompetitor {
    #[serde(default)]
    pub score: String,
    pub team: RawTeam,
}

#[derive(Debug, Deserialize)]
pub struct RawCompetition {
    #[serde(default)]
    pub competitors: Vec<RawCompetitor>,
}

#[derive(Debug, Deserialize)]
pub struct RawStatusType {
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct RawStatus {
    #[serde(default, rename = "displayClock")]
    pub display_clock: String,
    #[serde(default)]
    pub period: u32,
    #[serde(rename = "type")]
    pub status_type: RawStatusType,
}

#[derive(Debug, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub status: RawStatus,
    #[serde(default)]
    pub competitions: Vec<RawCompetition>,
}

#[derive(Debug, Deserialize)]
pub struct RawScoreboard {
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

/// Basketball decided-rule: a game is treated as effectively over once the
/// blowout margin clears one of two thresholds as time runs out.
pub fn is_decided(margin_abs: f64, minutes_left: f64) -> bool {
    (margin_abs >= 15.0 && minutes_left <= 6.0) || (margin_abs >= 10.0 && minutes_left <= 3.0)
}

fn parse_game_state(state: &str) -> GameState {
    match state {
        "in" => GameState::In,
        "post" => GameState::Post,
        _ => GameState::Pre,
    }
}

/// `mm:ss` display clock to seconds remaining in the current period.
fn parse_clock_seconds(display_clock: &str) -> f64 {
    let parts: Vec<&str> = display_clock.split(':').collect();
    if parts.len() == 2 {
        let minutes: f64 = parts[0].parse().unwrap_or(0.0);
        let seconds: f64 = parts[1].parse().unwrap_or(0.0);
        minutes * 60.0 + seconds
    } else {
        0.0
    }
}

/// Strip a raw feed event down to the schema actually cached and matched
/// against. Events missing two competitors are dropped.
pub fn strip_event(raw: &RawEvent) -> Option<StrippedEvent> {
    let competition = raw.competitions.first()?;
    if competition.competitors.len() != 2 {
        return None;
    }
    let a = &competition.competitors[0];
    let b = &competition.competitors[1];
    Some(StrippedEvent {
        id: raw.id.clone(),
        state: parse_game_state(&raw.status.status_type.state),
        period: raw.status.period,
        clock_seconds_left: parse_clock_seconds(&raw.status.display_clock),
        team_a: TeamScore { name: a.team.display_name.clone(), score: a.score.parse().ok() },
        team_b: TeamScore { name: b.team.display_name.clone(), score: b.score.parse().ok() },
    })
}

/// Lowercase, strip punctuation/diacritics and known mascot suffixes,
/// collapse whitespace.
pub fn normalize_name(input: &str, mascot_suffixes: &[&str]) -> String {
    let lower = input.to_lowercase();
    let stripped: String = lower
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let mut normalized = stripped;
    for suffix in mascot_suffixes {
        if let Some(pos) = normalized.rfind(suffix) {
            if pos + suffix.len() == normalized.trim_end().len() {
                normalized.truncate(pos);
            }
        }
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `"Team A vs Team B"` / `"Team A v Team B"` / `"Team A at Team B"`
/// (case-insensitive) into two team-name tokens.
pub fn parse_matchup(title: &str) -> Option<(String, String)> {
    let lower = title.to_lowercase();
    for sep in [" vs ", " v ", " at "] {
        if let Some(idx) = lower.find(sep) {
            let a = title[..idx].trim().to_string();
            let b = title[idx + sep.len()..].trim().to_string();
            if !a.is_empty() && !b.is_empty() {
                return Some((a, b));
            }
        }
    }
    None
}

fn alias_match(team_name: &str, event_team: &str, aliases: &HashMap<String, Vec<String>>, mascots: &[&str]) -> bool {
    let norm_team = normalize_name(team_name, mascots);
    let norm_event = normalize_name(event_team, mascots);
    if norm_team == norm_event {
        return true;
    }
    if let Some(entries) = aliases.get(&norm_event) {
        return entries.iter().any(|alias| norm_team.contains(alias.as_str()) || alias.contains(&norm_team));
    }
    norm_event.contains(&norm_team) || norm_team.contains(&norm_event)
}

/// Deterministic, failure-closed team matcher. Returns the single matching
/// event, or `None` on zero or ambiguous (≥2 tied) candidates.
pub fn match_event<'a>(
    team_a: &str,
    team_b: &str,
    events: &'a [StrippedEvent],
    aliases: &HashMap<String, Vec<String>>,
    mascots: &[&str],
) -> Option<&'a StrippedEvent> {
    let mut candidates: Vec<&StrippedEvent> = events
        .iter()
        .filter(|e| {
            let direct = alias_match(team_a, &e.team_a.name, aliases, mascots) && alias_match(team_b, &e.team_b.name, aliases, mascots);
            let swapped = alias_match(team_a, &e.team_b.name, aliases, mascots) && alias_match(team_b, &e.team_a.name, aliases, mascots);
            direct || swapped
        })
        .collect();

    match candidates.len() {
        1 => candidates.pop(),
        _ => None,
    }
}

/// Per-sport events cache. Keyed by date_key (`YYYYMMDD`), merging
/// `day-1, day, day+1` to cover games crossing UTC midnight, refreshed when
/// older than `freshness_seconds`.
pub struct EventsCache {
    entries: HashMap<String, (i64, Vec<StrippedEvent>)>,
    freshness_seconds: i64,
}

impl EventsCache {
    pub fn new(freshness_seconds: i64) -> Self {
        Self { entries: HashMap::new(), freshness_seconds }
    }

    pub fn three_day_keys(date: NaiveDate) -> [String; 3] {
        [
            (date - chrono::Duration::days(1)).format("%Y%m%d").to_string(),
            date.format("%Y%m%d").to_string(),
            (date + chrono::Duration::days(1)).format("%Y%m%d").to_string(),
        ]
    }

    pub fn is_fresh(&self, date_key: &str, now_ms: i64) -> bool {
        match self.entries.get(date_key) {
            Some((fetched_at, _)) => now_ms - fetched_at <= self.freshness_seconds * 1000,
            None => false,
        }
    }

    pub fn put(&mut self, date_key: &str, now_ms: i64, events: Vec<StrippedEvent>) {
        self.entries.insert(date_key.to_string(), (now_ms, events));
    }

    /// Merge whatever is cached for the 3-day window around `date` into one
    /// list. Stale/missing days simply contribute nothing.
    pub fn merged_events(&self, date: NaiveDate) -> Vec<StrippedEvent> {
        Self::three_day_keys(date)
            .iter()
            .filter_map(|key| self.entries.get(key))
            .flat_map(|(_, events)| events.clone())
            .collect()
    }
}

impl Clone for StrippedEvent {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            state: self.state,
            period: self.period,
            clock_seconds_left: self.clock_seconds_left,
            team_a: TeamScore { name: self.team_a.name.clone(), score: self.team_a.score },
            team_b: TeamScore { name: self.team_b.name.clone(), score: self.team_b.score },
        }
    }
}

/// Tracks the wall-clock time of every observed score change per game id,
/// purging entries older than 24h.
pub struct ScoreChangeTracker {
    last_score: HashMap<String, (i64, i64)>,
    last_change_ts: HashMap<String, i64>,
}

impl ScoreChangeTracker {
    pub fn new() -> Self {
        Self { last_score: HashMap::new(), last_change_ts: HashMap::new() }
    }

    pub fn observe(&mut self, game_id: &str, home_score: i64, away_score: i64, now_ms: i64) {
        let changed = match self.last_score.get(game_id) {
            Some(&(h, a)) => h != home_score || a != away_score,
            None => true,
        };
        if changed {
            self.last_score.insert(game_id.to_string(), (home_score, away_score));
            self.last_change_ts.insert(game_id.to_string(), now_ms);
        }
    }

    pub fn seconds_since_last_change(&self, game_id: &str, now_ms: i64) -> Option<i64> {
        self.last_change_ts.get(game_id).map(|&ts| (now_ms - ts) / 1000)
    }

    pub fn purge_older_than_24h(&mut self, now_ms: i64) {
        let cutoff = now_ms - 24 * 60 * 60 * 1000;
        let stale: Vec<String> = self
            .last_change_ts
            .iter()
            .filter(|(_, &ts)| ts < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            self.last_change_ts.remove(&key);
            self.last_score.remove(&key);
        }
    }
}

impl Default for ScoreChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASCOTS: &[&str] = &["lakers", "celtics"];

    #[test]
    fn is_decided_matches_either_blowout_threshold() {
        assert!(is_decided(16.0, 5.0));
        assert!(is_decided(11.0, 2.0));
        assert!(!is_decided(12.0, 5.0));
        assert!(!is_decided(9.0, 2.0));
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_name("L.A. Lakers!", &[]), "l a lakers");
    }

    #[test]
    fn normalize_strips_trailing_mascot() {
        assert_eq!(normalize_name("Los Angeles Lakers", &["lakers"]), "los angeles");
    }

    #[test]
    fn parse_matchup_handles_all_separators() {
        assert_eq!(parse_matchup("Lakers vs Celtics"), Some(("Lakers".into(), "Celtics".into())));
        assert_eq!(parse_matchup("Lakers v Celtics"), Some(("Lakers".into(), "Celtics".into())));
        assert_eq!(parse_matchup("Lakers at Celtics"), Some(("Lakers".into(), "Celtics".into())));
        assert_eq!(parse_matchup("Lakers Celtics"), None);
    }

    fn event(id: &str, a: &str, b: &str) -> StrippedEvent {
        StrippedEvent {
            id: id.to_string(),
            state: GameState::In,
            period: 4,
            clock_seconds_left: 120.0,
            team_a: TeamScore { name: a.to_string(), score: Some(100) },
            team_b: TeamScore { name: b.to_string(), score: Some(90) },
        }
    }

    #[test]
    fn match_event_finds_unique_candidate() {
        let events = vec![event("e1", "Los Angeles Lakers", "Boston Celtics")];
        let aliases = HashMap::new();
        let found = match_event("Lakers", "Celtics", &events, &aliases, &[]);
        assert!(found.is_some());
    }

    #[test]
    fn match_event_fails_closed_on_zero_candidates() {
        let events = vec![event("e1", "Miami Heat", "Denver Nuggets")];
        let aliases = HashMap::new();
        assert!(match_event("Lakers", "Celtics", &events, &aliases, &[]).is_none());
    }

    #[test]
    fn match_event_fails_closed_on_ambiguity() {
        let events = vec![event("e1", "Lakers", "Celtics"), event("e2", "Lakers", "Celtics")];
        let aliases = HashMap::new();
        assert!(match_event("Lakers", "Celtics", &events, &aliases, &[]).is_none());
    }

    #[test]
    fn events_cache_freshness_window() {
        let mut cache = EventsCache::new(15);
        cache.put("20260801", 0, vec![]);
        assert!(cache.is_fresh("20260801", 10_000));
        assert!(!cache.is_fresh("20260801", 20_000));
    }

    #[test]
    fn events_cache_three_day_merge() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let mut cache = EventsCache::new(15);
        cache.put("20260731", 0, vec![event("e0", "A", "B")]);
        cache.put("20260801", 0, vec![event("e1", "C", "D")]);
        cache.put("20260802", 0, vec![event("e2", "E", "F")]);
        let merged = cache.merged_events(date);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn score_change_tracker_records_and_purges() {
        let mut tracker = ScoreChangeTracker::new();
        tracker.observe("g1", 10, 5, 0);
        assert_eq!(tracker.seconds_since_last_change("g1", 5_000), Some(5));
        tracker.observe("g1", 10, 5, 5_000); // no change
        assert_eq!(tracker.seconds_since_last_change("g1", 10_000), Some(10));
        tracker.observe("g1", 12, 5, 10_000); // changed
        assert_eq!(tracker.seconds_since_last_change("g1", 10_000), Some(0));

        tracker.purge_older_than_24h(10_000 + 25 * 60 * 60 * 1000);
        assert_eq!(tracker.seconds_since_last_change("g1", 10_000 + 25 * 60 * 60 * 1000), None);
    }
}
