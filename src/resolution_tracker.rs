// =============================================================================
// Resolution tracker (component N) — paper-mode / backstop polling
// =============================================================================
//
// In paper mode there is no exchange fill to watch, so this is the only
// thing that ever closes a signaled position; in live/shadow_live modes it
// is a backstop for markets whose book goes quiet before crossing the
// price-driven exit thresholds in `exits.rs`. The fetch-then-parse shape
// mirrors `discovery.rs::DiscoveryClient::fetch_candidates` against the same
// market-metadata endpoint, reading `closed`/`outcomePrices` instead of
// `clobTokenIds`/`outcomes`.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::discovery::coerce_string_array;
use crate::exchange::ExchangeClient;
use crate::execution::{compute_pnl, ExecutionBridge};
use crate::journal::{Journal, SignalEvent};
use crate::types::{CloseReason, MarketStatus};
use crate::watchlist::{MarketRecord, Watchlist};

#[derive(Debug, Deserialize)]
struct RawMarketMeta {
    #[serde(rename = "conditionId")]
    condition_id: String,
    #[serde(default)]
    closed: bool,
    #[serde(rename = "outcomePrices", default)]
    outcome_prices: serde_json::Value,
}

fn parse_outcome_prices(value: &serde_json::Value) -> Vec<f64> {
    coerce_string_array(value)
        .unwrap_or_default()
        .iter()
        .filter_map(|s| s.parse::<f64>().ok())
        .collect()
}

/// Running price trace kept per slug for offline analysis, win or lose.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PriceTrace {
    pub price_min: f64,
    pub price_max: f64,
    pub price_last: f64,
    pub samples: u32,
}

impl PriceTrace {
    fn observe(&mut self, price: f64) {
        if self.samples == 0 {
            self.price_min = price;
            self.price_max = price;
        } else {
            self.price_min = self.price_min.min(price);
            self.price_max = self.price_max.max(price);
        }
        self.price_last = price;
        self.samples += 1;
    }
}

pub struct MarketMetaClient {
    http: reqwest::Client,
    base_url: String,
}

impl MarketMetaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    #[instrument(skip(self))]
    async fn fetch(&self, condition_id: &str) -> Result<Option<RawMarketMeta>> {
        let url = format!("{}/markets?condition_ids={}", self.base_url, condition_id);
        let resp = self.http.get(&url).send().await.context("resolution_tracker: network error")?;
        if !resp.status().is_success() {
            anyhow::bail!("resolution_tracker: http_{}", resp.status().as_u16());
        }
        let metas: Vec<RawMarketMeta> = resp.json().await.context("resolution_tracker: parse error")?;
        Ok(metas.into_iter().find(|m| m.condition_id == condition_id))
    }
}

pub struct ResolutionTracker {
    client: MarketMetaClient,
    traces: RwLock<HashMap<String, PriceTrace>>,
}

fn yes_price_index(record: &MarketRecord) -> Option<usize> {
    let yes_token = record.yes_token_id.as_ref()?;
    record.token_pair.iter().position(|t| t == yes_token)
}

impl ResolutionTracker {
    pub fn new(metadata_base_url: impl Into<String>) -> Self {
        Self { client: MarketMetaClient::new(metadata_base_url), traces: RwLock::new(HashMap::new()) }
    }

    pub fn trace_for(&self, slug: &str) -> Option<PriceTrace> {
        self.traces.read().get(slug).cloned()
    }

    /// Poll up to `runtime.resolution_tracker_poll_batch` signaled markets
    /// for terminal pricing, closing any that resolve. Returns the number
    /// closed this cycle.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_cycle(
        &self,
        watchlist: &Watchlist,
        execution: &ExecutionBridge,
        exchange: &dyn ExchangeClient,
        journal: &Journal,
        runtime: &RuntimeConfig,
    ) -> usize {
        if !runtime.resolution_tracker_enabled {
            return 0;
        }

        let mut candidates: Vec<MarketRecord> = watchlist.all().into_iter().filter(|r| r.status == MarketStatus::Signaled).collect();
        candidates.sort_by(|a, b| a.signal_last_ts.cmp(&b.signal_last_ts));
        candidates.truncate(runtime.resolution_tracker_poll_batch);

        let mut closed = 0;
        for record in candidates {
            let Some(idx) = yes_price_index(&record) else { continue };
            let meta = match self.client.fetch(&record.condition_id).await {
                Ok(Some(meta)) => meta,
                Ok(None) => continue,
                Err(e) => {
                    warn!(condition_id = %record.condition_id, error = %e, "resolution_tracker: poll failed");
                    continue;
                }
            };
            let prices = parse_outcome_prices(&meta.outcome_prices);
            let Some(&price) = prices.get(idx) else { continue };

            self.traces.write().entry(record.slug.clone()).or_default().observe(price);

            let resolved = (meta.closed && price >= 0.99) || price >= runtime.terminal_resolution_threshold;
            if !resolved {
                continue;
            }

            let sid = crate::clock::signal_id(record.pending_since_ts.unwrap_or(record.status_since_ts), &record.slug);
            let Some(yes_token) = record.yes_token_id.clone() else { continue };
            let trade = execution
                .sell(
                    &sid,
                    &yes_token,
                    runtime.execution.resolved_sell_floor,
                    CloseReason::Resolved,
                    runtime.execution_mode,
                    &runtime.execution,
                    exchange,
                    runtime.epsilon,
                )
                .await;

            let now = crate::clock::now_ms();
            if let Some(buy) = execution.get_buy(&sid) {
                let (pnl_usd, win, roi) = compute_pnl(&buy, &trade);
                if let Err(e) = journal.log_signal(&SignalEvent::SignalClose {
                    signal_id: sid.clone(),
                    condition_id: record.condition_id.clone(),
                    ts: now,
                    close_reason: CloseReason::Resolved,
                    win,
                    pnl_usd,
                    roi,
                }) {
                    warn!(error = %e, "failed to append signal close event");
                }
            }

            if let Err(e) = journal.log_execution(&trade) {
                warn!(error = %e, "failed to append resolution-tracker trade journal record");
            }
            watchlist.with_mut(&record.condition_id, |r| r.set_status(MarketStatus::Closed, now));
            info!(signal_id = %sid, slug = %record.slug, price, closed_officially = meta.closed, "position resolved by tracker poll");
            closed += 1;
        }

        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_trace_tracks_min_max_last() {
        let mut trace = PriceTrace::default();
        trace.observe(0.5);
        trace.observe(0.8);
        trace.observe(0.3);
        assert_eq!(trace.price_min, 0.3);
        assert_eq!(trace.price_max, 0.8);
        assert_eq!(trace.price_last, 0.3);
        assert_eq!(trace.samples, 3);
    }

    #[test]
    fn parse_outcome_prices_handles_string_encoded_array() {
        let value = serde_json::json!("[\"0.12\", \"0.88\"]");
        let prices = parse_outcome_prices(&value);
        assert_eq!(prices, vec![0.12, 0.88]);
    }
}
