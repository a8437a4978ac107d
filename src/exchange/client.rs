// =============================================================================
// Exchange order-submission client
// =============================================================================
//
// Generalizes the teacher's `binance/client.rs` (HMAC-SHA256 signed REST,
// secret never logged, `#[instrument(skip(...))]`) into a small trait with
// a CLOB-style HTTP implementation plus an in-process shadow implementation
// used in `paper`/`shadow_live` execution modes.
// =============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub ok: bool,
    pub filled_shares: f64,
    pub avg_fill_price: f64,
    pub spent_usd: f64,
    pub is_partial: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self { ok: false, filled_shares: 0.0, avg_fill_price: 0.0, spent_usd: 0.0, is_partial: false, order_id: None, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone)]
pub struct Position {
    pub asset: String,
    pub size: f64,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn execute_buy(&self, token: &str, shares: f64) -> Result<OrderResult>;
    async fn execute_sell(&self, token: &str, shares: f64, floor: f64) -> Result<OrderResult>;
    async fn get_balance(&self) -> Result<f64>;
    async fn get_conditional_balance(&self, token: &str) -> Result<f64>;
    async fn get_positions(&self, funder: &str) -> Result<Vec<Position>>;
    async fn fetch_real_fill_price(&self, order_id: &str, retries: u32, delay_ms: u64) -> Result<Option<f64>>;
}

/// Signed CLOB-style HTTP client. The secret never appears in `Debug` output
/// (the derive is hand-written instead of `#[derive(Debug)]` for exactly
/// that reason, mirroring the teacher's comment that the secret must never
/// be logged).
pub struct HttpExchangeClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for HttpExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExchangeClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpExchangeClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: base_url.into(),
            http: reqwest::Client::builder().timeout(std::time::Duration::from_secs(10)).build().expect("reqwest client builds"),
        }
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u128 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock after epoch").as_millis()
    }

    #[instrument(skip(self))]
    async fn submit_order(&self, side: &str, token: &str, shares: f64, limit_price: Option<f64>) -> Result<OrderResult> {
        let ts = Self::timestamp_ms();
        let payload = format!("side={side}&token={token}&shares={shares}&ts={ts}");
        let signature = self.sign(&payload);

        let mut body = serde_json::json!({ "side": side, "token": token, "shares": shares, "ts": ts });
        if let Some(price) = limit_price {
            body["price"] = serde_json::json!(price);
        }

        let resp = self
            .http
            .post(format!("{}/order", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .header("X-SIGNATURE", signature)
            .json(&body)
            .send()
            .await
            .context("exchange: order submission network error")?;

        if !resp.status().is_success() {
            return Ok(OrderResult::failure(format!("http_{}", resp.status().as_u16())));
        }

        #[derive(Deserialize)]
        struct RawFill {
            #[serde(rename = "filledShares")]
            filled_shares: f64,
            #[serde(rename = "avgFillPrice")]
            avg_fill_price: f64,
            #[serde(rename = "isPartial", default)]
            is_partial: bool,
            #[serde(rename = "orderId")]
            order_id: String,
        }
        let fill: RawFill = resp.json().await.context("exchange: order response parse error")?;
        debug!(order_id = %fill.order_id, filled = fill.filled_shares, "order submitted");

        Ok(OrderResult {
            ok: true,
            filled_shares: fill.filled_shares,
            avg_fill_price: fill.avg_fill_price,
            spent_usd: fill.filled_shares * fill.avg_fill_price,
            is_partial: fill.is_partial,
            order_id: Some(fill.order_id),
            error: None,
        })
    }
}

#[async_trait]
impl ExchangeClient for HttpExchangeClient {
    async fn execute_buy(&self, token: &str, shares: f64) -> Result<OrderResult> {
        self.submit_order("buy", token, shares, None).await
    }

    async fn execute_sell(&self, token: &str, shares: f64, floor: f64) -> Result<OrderResult> {
        self.submit_order("sell", token, shares, Some(floor)).await
    }

    async fn get_balance(&self) -> Result<f64> {
        let resp = self
            .http
            .get(format!("{}/balance", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("exchange: balance fetch failed")?;
        #[derive(Deserialize)]
        struct Raw {
            usd: f64,
        }
        let raw: Raw = resp.json().await.context("exchange: balance parse failed")?;
        Ok(raw.usd)
    }

    async fn get_conditional_balance(&self, token: &str) -> Result<f64> {
        let resp = self
            .http
            .get(format!("{}/balance/conditional?token={}", self.base_url, token))
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("exchange: conditional balance fetch failed")?;
        #[derive(Deserialize)]
        struct Raw {
            shares: f64,
        }
        let raw: Raw = resp.json().await.context("exchange: conditional balance parse failed")?;
        Ok(raw.shares)
    }

    async fn get_positions(&self, funder: &str) -> Result<Vec<Position>> {
        let resp = self
            .http
            .get(format!("{}/positions?funder={}", self.base_url, funder))
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("exchange: positions fetch failed")?;
        #[derive(Deserialize)]
        struct RawPosition {
            asset: String,
            size: f64,
        }
        let raw: Vec<RawPosition> = resp.json().await.context("exchange: positions parse failed")?;
        Ok(raw.into_iter().map(|p| Position { asset: p.asset, size: p.size }).collect())
    }

    async fn fetch_real_fill_price(&self, order_id: &str, retries: u32, delay_ms: u64) -> Result<Option<f64>> {
        for attempt in 0..=retries {
            let resp = self
                .http
                .get(format!("{}/order/{}", self.base_url, order_id))
                .header("X-API-KEY", &self.api_key)
                .send()
                .await
                .context("exchange: fill price fetch failed")?;
            if resp.status().is_success() {
                #[derive(Deserialize)]
                struct Raw {
                    #[serde(rename = "avgFillPrice")]
                    avg_fill_price: Option<f64>,
                }
                let raw: Raw = resp.json().await.context("exchange: fill price parse failed")?;
                if raw.avg_fill_price.is_some() {
                    return Ok(raw.avg_fill_price);
                }
            }
            if attempt < retries {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
        }
        Ok(None)
    }
}

/// In-process shadow exchange used in `paper`/`shadow_live` modes: fills
/// immediately and completely at the requested price, never touches the
/// network.
#[derive(Debug, Default)]
pub struct ShadowExchangeClient;

#[async_trait]
impl ExchangeClient for ShadowExchangeClient {
    async fn execute_buy(&self, _token: &str, shares: f64) -> Result<OrderResult> {
        Ok(OrderResult { ok: true, filled_shares: shares, avg_fill_price: 0.0, spent_usd: 0.0, is_partial: false, order_id: Some("shadow".into()), error: None })
    }

    async fn execute_sell(&self, _token: &str, shares: f64, floor: f64) -> Result<OrderResult> {
        Ok(OrderResult { ok: true, filled_shares: shares, avg_fill_price: floor, spent_usd: shares * floor, is_partial: false, order_id: Some("shadow".into()), error: None })
    }

    async fn get_balance(&self) -> Result<f64> {
        Ok(0.0)
    }

    async fn get_conditional_balance(&self, _token: &str) -> Result<f64> {
        Ok(0.0)
    }

    async fn get_positions(&self, _funder: &str) -> Result<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn fetch_real_fill_price(&self, _order_id: &str, _retries: u32, _delay_ms: u64) -> Result<Option<f64>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_impl_never_prints_secret() {
        let client = HttpExchangeClient::new("key123", "supersecret", "https://clob.example");
        let formatted = format!("{client:?}");
        assert!(!formatted.contains("supersecret"));
        assert!(!formatted.contains("key123"));
    }

    #[tokio::test]
    async fn shadow_buy_fills_completely() {
        let client = ShadowExchangeClient;
        let result = client.execute_buy("tok", 10.0).await.unwrap();
        assert!(result.ok);
        assert_eq!(result.filled_shares, 10.0);
    }

    #[tokio::test]
    async fn shadow_sell_uses_floor_as_price() {
        let client = ShadowExchangeClient;
        let result = client.execute_sell("tok", 10.0, 0.9).await.unwrap();
        assert_eq!(result.avg_fill_price, 0.9);
        assert_eq!(result.spent_usd, 9.0);
    }
}
