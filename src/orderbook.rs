// =============================================================================
// Order-book fetcher + parser (component C)
// =============================================================================
//
// Fetches and validates a single token's order book. Adapted from the
// teacher's `market_data/orderbook.rs`, which computed spread/imbalance over
// a crypto base/quote book; here the book is one side of a two-token binary
// market and every price must land in (0,1].
// =============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::instrument;

/// One raw level as returned by the book REST endpoint: price/size may
/// arrive as either JSON strings or numbers.
#[derive(Debug, Deserialize)]
struct RawLevel {
    #[serde(deserialize_with = "de_flexible_f64")]
    price: f64,
    #[serde(deserialize_with = "de_flexible_f64")]
    size: f64,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

fn de_flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        S(String),
        N(f64),
    }
    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::S(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
        StrOrNum::N(n) => Ok(n),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// A validated, sorted, capped order book for one token.
#[derive(Debug, Clone, Default)]
pub struct ParsedBook {
    /// Sorted price-descending.
    pub bids: Vec<BookLevel>,
    /// Sorted price-ascending.
    pub asks: Vec<BookLevel>,
}

/// Failure reason for a book fetch/parse, per SPEC_FULL.md §7.
pub const REASON_BOOK_NOT_USABLE: &str = "book_not_usable";

impl ParsedBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Sum `price*size` over the first `levels` entries on each side.
    pub fn compute_depth(&self, levels: usize) -> (f64, f64) {
        let ask_usd: f64 = self.asks.iter().take(levels).map(|l| l.price * l.size).sum();
        let bid_usd: f64 = self.bids.iter().take(levels).map(|l| l.price * l.size).sum();
        (ask_usd, bid_usd)
    }

    /// Entry-side (ask) and exit-side (bid) depth must each clear their
    /// minimum, else a mutually exclusive reason is returned.
    pub fn is_depth_sufficient(
        &self,
        min_entry_usd: f64,
        min_exit_usd: f64,
        levels: usize,
    ) -> Result<(), &'static str> {
        let (ask_usd, bid_usd) = self.compute_depth(levels);
        if ask_usd < min_entry_usd {
            return Err("depth_ask_below_min");
        }
        if bid_usd < min_exit_usd {
            return Err("depth_bid_below_min");
        }
        Ok(())
    }
}

/// Validate, coerce, sort and cap raw levels into a `ParsedBook`. A level is
/// dropped unless its price lies in `(0,1]` and its size is positive. The
/// parse succeeds iff at least one side yields a surviving level.
fn parse_levels(raw: RawBook, max_levels_considered: usize) -> Result<ParsedBook, &'static str> {
    let mut bids: Vec<BookLevel> = raw
        .bids
        .into_iter()
        .filter(|l| l.price > 0.0 && l.price <= 1.0 && l.size > 0.0)
        .map(|l| BookLevel { price: l.price, size: l.size })
        .collect();
    let mut asks: Vec<BookLevel> = raw
        .asks
        .into_iter()
        .filter(|l| l.price > 0.0 && l.price <= 1.0 && l.size > 0.0)
        .map(|l| BookLevel { price: l.price, size: l.size })
        .collect();

    bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));

    bids.truncate(max_levels_considered);
    asks.truncate(max_levels_considered);

    if bids.is_empty() && asks.is_empty() {
        return Err(REASON_BOOK_NOT_USABLE);
    }

    Ok(ParsedBook { bids, asks })
}

pub struct BookClient {
    http: reqwest::Client,
    base_url: String,
}

impl BookClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// `GET /book?token=<id>`, parsed and capped to `max_levels_considered`.
    #[instrument(skip(self))]
    pub async fn fetch_book(
        &self,
        token_id: &str,
        max_levels_considered: usize,
    ) -> Result<ParsedBook> {
        let url = format!("{}/book?token={}", self.base_url, token_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("book fetch: network error")?;
        if !resp.status().is_success() {
            anyhow::bail!("book fetch: http_{}", resp.status().as_u16());
        }
        let raw: RawBook = resp.json().await.context("book fetch: parse error")?;
        parse_levels(raw, max_levels_considered)
            .map_err(|reason| anyhow::anyhow!("book fetch: {reason}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) -> RawBook {
        RawBook {
            bids: bids.into_iter().map(|(price, size)| RawLevel { price, size }).collect(),
            asks: asks.into_iter().map(|(price, size)| RawLevel { price, size }).collect(),
        }
    }

    #[test]
    fn drops_invalid_levels_and_sorts() {
        let book = parse_levels(
            raw(
                vec![(0.60, 10.0), (0.0, 5.0), (0.55, 20.0), (1.5, 3.0)],
                vec![(0.62, 8.0), (-0.1, 1.0), (0.65, 4.0)],
            ),
            10,
        )
        .unwrap();
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks.len(), 2);
        assert_eq!(book.best_bid(), Some(0.60));
        assert_eq!(book.best_ask(), Some(0.62));
    }

    #[test]
    fn caps_levels_considered() {
        let levels: Vec<(f64, f64)> = (1..=20).map(|i| (0.01 * i as f64, 1.0)).collect();
        let book = parse_levels(raw(levels.clone(), levels), 5).unwrap();
        assert_eq!(book.bids.len(), 5);
        assert_eq!(book.asks.len(), 5);
    }

    #[test]
    fn empty_both_sides_fails() {
        let err = parse_levels(raw(vec![], vec![]), 10).unwrap_err();
        assert_eq!(err, REASON_BOOK_NOT_USABLE);
    }

    #[test]
    fn one_sided_book_still_usable() {
        let book = parse_levels(raw(vec![(0.4, 10.0)], vec![]), 10).unwrap();
        assert_eq!(book.best_bid(), Some(0.4));
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn depth_sums_price_times_size() {
        let book = parse_levels(
            raw(vec![(0.50, 10.0), (0.49, 10.0)], vec![(0.51, 10.0), (0.52, 10.0)]),
            10,
        )
        .unwrap();
        let (ask_usd, bid_usd) = book.compute_depth(2);
        assert!((ask_usd - (0.51 * 10.0 + 0.52 * 10.0)).abs() < 1e-9);
        assert!((bid_usd - (0.50 * 10.0 + 0.49 * 10.0)).abs() < 1e-9);
    }

    #[test]
    fn depth_sufficiency_reports_mutually_exclusive_reasons() {
        let book = parse_levels(raw(vec![(0.5, 1.0)], vec![(0.5, 100.0)]), 10).unwrap();
        assert_eq!(book.is_depth_sufficient(10.0, 10.0, 5), Err("depth_bid_below_min"));

        let book2 = parse_levels(raw(vec![(0.5, 100.0)], vec![(0.5, 1.0)]), 10).unwrap();
        assert_eq!(book2.is_depth_sufficient(10.0, 10.0, 5), Err("depth_ask_below_min"));
    }
}
