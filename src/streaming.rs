// =============================================================================
// Streaming price client (component D)
// =============================================================================
//
// Maintains a subscription set and a best-bid/best-ask cache fed by a
// websocket connection with exponential-backoff reconnect. Shaped after the
// teacher's `market_data/orderbook.rs::run_depth_stream` connect/reconnect
// loop, with subscribe/ping-pong framing taken from the CLOB wire format
// documented in SPEC_FULL.md §6 (cross-checked against the Polymarket
// websocket clients in the reference pack).
//
// Concurrency: this module is the single writer of `cache`; the evaluation
// loop only ever reads it (see SPEC_FULL.md §5).
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::clock::now_ms;

#[derive(Debug, Clone, Copy, Default)]
pub struct CachedQuote {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub last_update_ms: i64,
}

pub struct StreamingClient {
    cache: RwLock<HashMap<String, CachedQuote>>,
    subscribed: RwLock<HashSet<String>>,
    outbound: Mutex<Option<tokio::sync::mpsc::UnboundedSender<Message>>>,
    chunk_size: usize,
}

impl StreamingClient {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            subscribed: RwLock::new(HashSet::new()),
            outbound: Mutex::new(None),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn get(&self, token_id: &str) -> Option<CachedQuote> {
        self.cache.read().get(token_id).copied()
    }

    pub fn is_fresh(&self, token_id: &str, now: i64, max_stale_ms: i64) -> bool {
        match self.get(token_id) {
            Some(q) => now - q.last_update_ms <= max_stale_ms,
            None => false,
        }
    }

    /// Register new tokens of interest. If a connection is live, issues a
    /// dynamic "operation: subscribe" message in chunks immediately;
    /// otherwise the tokens are picked up by the next connect's initial
    /// batched subscribe.
    pub async fn add_tokens(&self, tokens: &[String]) {
        let mut newly_added = Vec::new();
        {
            let mut subscribed = self.subscribed.write();
            for t in tokens {
                if subscribed.insert(t.clone()) {
                    newly_added.push(t.clone());
                }
            }
        }
        if newly_added.is_empty() {
            return;
        }
        let sender = self.outbound.lock().await.clone();
        if let Some(sender) = sender {
            for chunk in newly_added.chunks(self.chunk_size) {
                let msg = json!({
                    "assets_ids": chunk,
                    "operation": "subscribe",
                    "custom_feature_enabled": true,
                });
                if sender.send(Message::Text(msg.to_string())).is_err() {
                    warn!("streaming client: outbound channel closed mid-subscribe");
                    break;
                }
            }
        }
    }

    pub(crate) fn apply_update(&self, token_id: &str, best_bid: Option<f64>, best_ask: Option<f64>) {
        let mut cache = self.cache.write();
        let entry = cache.entry(token_id.to_string()).or_default();
        if best_bid.is_some() {
            entry.best_bid = best_bid;
        }
        if best_ask.is_some() {
            entry.best_ask = best_ask;
        }
        entry.last_update_ms = now_ms();
    }
}

#[derive(Debug, Deserialize)]
struct PriceChange {
    asset_id: String,
    #[serde(default)]
    best_bid: Option<FlexNum>,
    #[serde(default)]
    best_ask: Option<FlexNum>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexNum {
    S(String),
    N(f64),
}

impl FlexNum {
    fn as_f64(&self) -> Option<f64> {
        match self {
            FlexNum::S(s) => s.parse().ok(),
            FlexNum::N(n) => Some(*n),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event_type")]
enum WsEvent {
    #[serde(rename = "price_change")]
    PriceChange { price_changes: Vec<PriceChange> },
    #[serde(rename = "best_bid_ask")]
    BestBidAsk {
        asset_id: String,
        #[serde(default)]
        best_bid: Option<FlexNum>,
        #[serde(default)]
        best_ask: Option<FlexNum>,
    },
}

fn handle_text(client: &StreamingClient, text: &str) {
    if text == "ping" {
        return; // handled by caller, which has the write half
    }
    if let Ok(event) = serde_json::from_str::<WsEvent>(text) {
        match event {
            WsEvent::PriceChange { price_changes } => {
                for pc in price_changes {
                    client.apply_update(
                        &pc.asset_id,
                        pc.best_bid.as_ref().and_then(FlexNum::as_f64),
                        pc.best_ask.as_ref().and_then(FlexNum::as_f64),
                    );
                }
            }
            WsEvent::BestBidAsk { asset_id, best_bid, best_ask } => {
                client.apply_update(
                    &asset_id,
                    best_bid.as_ref().and_then(FlexNum::as_f64),
                    best_ask.as_ref().and_then(FlexNum::as_f64),
                );
            }
        }
        return;
    }
    // Top-level array-form book snapshot: [{asset_id, best_bid, best_ask}, ...]
    if let Ok(snapshots) = serde_json::from_str::<Vec<PriceChange>>(text) {
        for s in snapshots {
            client.apply_update(
                &s.asset_id,
                s.best_bid.as_ref().and_then(FlexNum::as_f64),
                s.best_ask.as_ref().and_then(FlexNum::as_f64),
            );
        }
    }
}

/// Connect once, run until disconnect, and return. The caller wraps this in
/// a reconnect-with-backoff loop; reconnect is never awaited by the
/// evaluation loop itself (SPEC_FULL.md §5).
pub async fn run_once(url: &str, client: &Arc<StreamingClient>) -> Result<()> {
    info!(url, "connecting to streaming price client");
    let (ws_stream, _resp) = connect_async(url).await.context("streaming connect failed")?;
    let (mut write, mut read) = ws_stream.split();

    let initial: Vec<String> = client.subscribed.read().iter().cloned().collect();
    for chunk in initial.chunks(client.chunk_size) {
        let msg = json!({
            "assets_ids": chunk,
            "type": "market",
            "custom_feature_enabled": true,
        });
        write.send(Message::Text(msg.to_string())).await.context("initial subscribe failed")?;
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    *client.outbound.lock().await = Some(tx);

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" {
                            if write.send(Message::Text("pong".to_string())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        handle_text(client, &text);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "streaming client read error");
                        break;
                    }
                    None => {
                        warn!("streaming client stream ended");
                        break;
                    }
                }
            }
        }
    }

    *client.outbound.lock().await = None;
    Ok(())
}

/// Reconnect-with-backoff wrapper (1s → 60s cap, doubling each failure).
pub async fn run_with_reconnect(url: String, client: Arc<StreamingClient>, min_backoff_ms: u64, max_backoff_ms: u64) {
    let mut backoff = min_backoff_ms;
    loop {
        match run_once(&url, &client).await {
            Ok(()) => {
                debug!("streaming client disconnected cleanly, reconnecting");
                backoff = min_backoff_ms;
            }
            Err(e) => {
                warn!(error = %e, backoff_ms = backoff, "streaming client error, backing off");
            }
        }
        tokio::time::sleep(Duration::from_millis(backoff)).await;
        backoff = (backoff * 2).min(max_backoff_ms);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamingSnapshot {
    pub subscribed_count: usize,
    pub cached_count: usize,
}

impl StreamingClient {
    pub fn snapshot(&self) -> StreamingSnapshot {
        StreamingSnapshot {
            subscribed_count: self.subscribed.read().len(),
            cached_count: self.cache.read().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_change_event_updates_cache() {
        let client = StreamingClient::new(500);
        let text = r#"{"event_type":"price_change","price_changes":[{"asset_id":"t1","best_bid":"0.61","best_ask":0.63}]}"#;
        handle_text(&client, text);
        let q = client.get("t1").unwrap();
        assert_eq!(q.best_bid, Some(0.61));
        assert_eq!(q.best_ask, Some(0.63));
    }

    #[test]
    fn best_bid_ask_event_updates_cache() {
        let client = StreamingClient::new(500);
        let text = r#"{"event_type":"best_bid_ask","asset_id":"t2","best_bid":0.4,"best_ask":0.45}"#;
        handle_text(&client, text);
        assert_eq!(client.get("t2").unwrap().best_bid, Some(0.4));
    }

    #[test]
    fn array_form_snapshot_updates_multiple() {
        let client = StreamingClient::new(500);
        let text = r#"[{"asset_id":"a","best_bid":0.1,"best_ask":0.2},{"asset_id":"b","best_bid":0.5,"best_ask":0.55}]"#;
        handle_text(&client, text);
        assert!(client.get("a").is_some());
        assert!(client.get("b").is_some());
    }

    #[test]
    fn freshness_respects_max_stale_ms() {
        let client = StreamingClient::new(500);
        client.apply_update("t1", Some(0.5), Some(0.51));
        assert!(client.is_fresh("t1", now_ms(), 10_000));
        assert!(!client.is_fresh("t1", now_ms() + 20_000, 10_000));
    }

    #[test]
    fn unknown_token_is_never_fresh() {
        let client = StreamingClient::new(500);
        assert!(!client.is_fresh("missing", now_ms(), 10_000));
    }
}
