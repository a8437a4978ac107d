// =============================================================================
// Discovery feed + parser (component E)
// =============================================================================
//
// Pulls the event feed per league tag and produces market candidates. The
// HTTP-GET-then-JSON-array-parse shape mirrors the teacher's
// `binance/client.rs::get_klines`; the permissive-shape coercion (outcomes /
// clobTokenIds sometimes arriving as JSON-encoded strings) follows
// SPEC_FULL.md §9.
// =============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

/// A discovered market candidate ready for watchlist upsert.
#[derive(Debug, Clone)]
pub struct MarketCandidate {
    pub condition_id: String,
    pub league: String,
    pub slug: String,
    pub title: String,
    pub token_pair: Vec<String>,
    pub outcomes: Vec<String>,
    pub volume_24h: f64,
    pub end_date: String,
    pub event_id: String,
    pub event_slug: String,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    slug: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "endDate", default)]
    end_date: String,
    #[serde(default)]
    markets: Vec<RawMarket>,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    #[serde(rename = "conditionId")]
    condition_id: String,
    slug: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
    #[serde(rename = "volume24hr", default)]
    volume_24hr: f64,
    outcomes: serde_json::Value,
    #[serde(rename = "clobTokenIds")]
    clob_token_ids: serde_json::Value,
    #[serde(rename = "endDate", default)]
    end_date: String,
}

/// Coerce a field that the feed sometimes ships as a real JSON array and
/// sometimes as a JSON-encoded string containing an array.
pub(crate) fn coerce_string_array(value: &serde_json::Value) -> Result<Vec<String>, &'static str> {
    match value {
        serde_json::Value::Array(arr) => arr
            .iter()
            .map(|v| v.as_str().map(|s| s.to_string()).ok_or("unexpected_shape"))
            .collect(),
        serde_json::Value::String(s) => {
            let parsed: serde_json::Value = serde_json::from_str(s).map_err(|_| "parse_fail")?;
            match parsed {
                serde_json::Value::Array(arr) => arr
                    .iter()
                    .map(|v| v.as_str().map(|s| s.to_string()).ok_or("unexpected_shape"))
                    .collect(),
                _ => Err("unexpected_shape"),
            }
        }
        _ => Err("unexpected_shape"),
    }
}

/// Leagues for which only explicit "team-win"-style slugs are kept; spreads,
/// totals, draws, both-to-score and over/under markets are dropped. Treated
/// as data per SPEC_FULL.md §9: the exact prefixes are illustrative.
fn is_uninteresting_bet_type(slug: &str, league: &str) -> bool {
    if league != "epl" && league != "soccer" {
        return false;
    }
    let lower = slug.to_lowercase();
    ["spread", "total", "draw", "both-to-score", "over-under", "over", "under"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn parse_market(event: &RawEvent, league: &str, raw: RawMarket) -> Option<MarketCandidate> {
    if !raw.active || raw.closed {
        return None;
    }
    if is_uninteresting_bet_type(&raw.slug, league) {
        return None;
    }

    let outcomes = match coerce_string_array(&raw.outcomes) {
        Ok(o) if o.len() == 2 => o,
        Ok(_) => {
            warn!(slug = %raw.slug, "gamma_token_count_unexpected (outcomes)");
            return None;
        }
        Err(reason) => {
            warn!(slug = %raw.slug, reason, "gamma_token_parse_fail (outcomes)");
            return None;
        }
    };

    let token_pair = match coerce_string_array(&raw.clob_token_ids) {
        Ok(t) if t.len() == 2 => t,
        Ok(_) => {
            warn!(slug = %raw.slug, "gamma_token_count_unexpected (clobTokenIds)");
            return None;
        }
        Err(reason) => {
            warn!(slug = %raw.slug, reason, "gamma_token_parse_fail (clobTokenIds)");
            return None;
        }
    };

    let end_date = if raw.end_date.is_empty() { event.end_date.clone() } else { raw.end_date };

    Some(MarketCandidate {
        condition_id: raw.condition_id,
        league: league.to_string(),
        slug: raw.slug,
        title: if raw.question.is_empty() { event.title.clone() } else { raw.question },
        token_pair,
        outcomes,
        volume_24h: raw.volume_24hr,
        end_date,
        event_id: event.id.clone(),
        event_slug: event.slug.clone(),
    })
}

pub struct DiscoveryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DiscoveryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Pull events for one league tag and return at most `limit` market
    /// candidates, ranked by 24h volume (the feed itself is asked to sort,
    /// but we do not trust that and keep our own selection deterministic).
    #[instrument(skip(self))]
    pub async fn fetch_candidates(&self, tag_slug: &str, league: &str, limit: u32) -> Result<Vec<MarketCandidate>> {
        let url = format!(
            "{}/events?active=true&closed=false&tag_slug={}&limit={}&order=volume&ascending=false&live=true",
            self.base_url, tag_slug, limit
        );
        let resp = self.http.get(&url).send().await.context("discovery: network error")?;
        if !resp.status().is_success() {
            anyhow::bail!("discovery: http_{}", resp.status().as_u16());
        }
        let events: Vec<RawEvent> = resp.json().await.context("discovery: parse error")?;
        debug!(league, event_count = events.len(), "discovery fetch complete");

        let mut candidates = Vec::new();
        for event in &events {
            for raw_market in event.markets.clone() {
                if let Some(candidate) = parse_market(event, league, raw_market) {
                    candidates.push(candidate);
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.volume_24h
                .partial_cmp(&a.volume_24h)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.slug.cmp(&b.slug))
        });
        candidates.truncate(limit as usize);
        Ok(candidates)
    }
}

// RawMarket needs Clone for the per-event iteration above.
impl Clone for RawMarket {
    fn clone(&self) -> Self {
        Self {
            condition_id: self.condition_id.clone(),
            slug: self.slug.clone(),
            question: self.question.clone(),
            active: self.active,
            closed: self.closed,
            volume_24hr: self.volume_24hr,
            outcomes: self.outcomes.clone(),
            clob_token_ids: self.clob_token_ids.clone(),
            end_date: self.end_date.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> RawEvent {
        RawEvent {
            id: "e1".into(),
            slug: "lal-vs-bos".into(),
            title: "Lakers vs Celtics".into(),
            end_date: "2026-08-02T00:00:00Z".into(),
            markets: vec![RawMarket {
                condition_id: "c1".into(),
                slug: "lal-vs-bos-winner".into(),
                question: "Will the Lakers win?".into(),
                active: true,
                closed: false,
                volume_24hr: 1000.0,
                outcomes: serde_json::json!(["Yes", "No"]),
                clob_token_ids: serde_json::json!(["tok-yes", "tok-no"]),
                end_date: String::new(),
            }],
        }
    }

    #[test]
    fn parses_array_form_fields() {
        let event = sample_event();
        let market = event.markets[0].clone();
        let candidate = parse_market(&event, "nba", market).unwrap();
        assert_eq!(candidate.token_pair.len(), 2);
        assert_eq!(candidate.outcomes.len(), 2);
        assert_eq!(candidate.end_date, "2026-08-02T00:00:00Z");
    }

    #[test]
    fn parses_string_encoded_array_fields() {
        let mut event = sample_event();
        event.markets[0].outcomes = serde_json::json!("[\"Yes\",\"No\"]");
        event.markets[0].clob_token_ids = serde_json::json!("[\"tok-yes\",\"tok-no\"]");
        let market = event.markets[0].clone();
        let candidate = parse_market(&event, "nba", market).unwrap();
        assert_eq!(candidate.token_pair, vec!["tok-yes", "tok-no"]);
    }

    #[test]
    fn rejects_wrong_length_outcomes() {
        let mut event = sample_event();
        event.markets[0].outcomes = serde_json::json!(["Yes", "No", "Maybe"]);
        let market = event.markets[0].clone();
        assert!(parse_market(&event, "nba", market).is_none());
    }

    #[test]
    fn drops_inactive_and_closed_markets() {
        let mut event = sample_event();
        event.markets[0].active = false;
        let market = event.markets[0].clone();
        assert!(parse_market(&event, "nba", market).is_none());
    }

    #[test]
    fn drops_uninteresting_soccer_bet_types() {
        assert!(is_uninteresting_bet_type("epl-team-a-spread", "epl"));
        assert!(is_uninteresting_bet_type("epl-over-under-2-5", "epl"));
        assert!(!is_uninteresting_bet_type("epl-team-a-win", "epl"));
        assert!(!is_uninteresting_bet_type("nba-spread", "nba"));
    }
}
