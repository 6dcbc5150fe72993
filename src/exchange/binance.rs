//! Binance margin REST client.
//!
//! Authenticated calls carry an HMAC-SHA256 signature over the url-encoded
//! query string plus the `X-MBX-APIKEY` header; public endpoints (ping,
//! ticker price) are unsigned. Numeric fields arrive as JSON strings and
//! are parsed into `Decimal`.
//!
//! API docs: https://binance-docs.github.io/apidocs/spot/en/
//! Base URL: https://api.binance.com (testnet: https://testnet.binance.vision)
//! Error shape on non-2xx: `{"code": <i64>, "msg": <string>}`

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{
    AccountSnapshot, AssetBalance, LoanReceipt, MarginExchange, OrderReceipt, OrderSide,
    SideEffect,
};
use crate::config::ExchangeConfig;
use crate::types::BotError;

const EXCHANGE_NAME: &str = "binance";

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// API response types (Binance JSON → Rust)
// ---------------------------------------------------------------------------

/// `GET /api/v3/ticker/price` response.
#[derive(Debug, Deserialize)]
struct TickerPriceResponse {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

/// `GET /sapi/v1/margin/account` response. Only the fields we use.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginAccountResponse {
    margin_level: String,
    total_asset_of_btc: String,
    total_net_asset_of_btc: String,
    user_assets: Vec<UserAssetResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserAssetResponse {
    asset: String,
    free: String,
    locked: String,
    borrowed: String,
    net_asset: String,
}

/// `POST /sapi/v1/margin/order` response (FULL/RESULT shape).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginOrderResponse {
    #[serde(default)]
    order_id: Option<u64>,
    symbol: String,
    #[serde(default)]
    executed_qty: Option<String>,
    /// Binance's own (misspelled) field name.
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    transact_time: Option<i64>,
}

/// `POST /sapi/v1/margin/loan` and `/repay` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranResponse {
    tran_id: u64,
}

/// Binance error body on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// HMAC-SHA256 signature of a query string, hex-encoded.
///
/// Deterministic: identical (secret, query) pairs always produce the same
/// signature.
pub(crate) fn sign_query(secret: &str, query: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Url-encode parameters in insertion order.
///
/// The signature is computed over this exact string, so order and encoding
/// must match what is sent on the wire.
fn encode_params(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Binance margin API client.
///
/// `Debug` output redacts the API secret via `SecretString`.
#[derive(Debug)]
pub struct BinanceClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: SecretString,
    recv_window_ms: u64,
}

impl BinanceClient {
    /// Create a client with explicit credentials.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: SecretString,
        recv_window_ms: u64,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("CASCADE/0.1.0 (margin-leverage-bot)")
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret,
            recv_window_ms,
        })
    }

    /// Create a client from config, resolving credentials from the env vars
    /// it names and honouring the `BINANCE_TESTNET` toggle.
    pub fn from_config(cfg: &ExchangeConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| BotError::CredentialsMissing(cfg.api_key_env.clone()))?;
        let api_secret = std::env::var(&cfg.api_secret_env)
            .map_err(|_| BotError::CredentialsMissing(cfg.api_secret_env.clone()))?;

        Self::new(
            cfg.effective_base_url(),
            api_key,
            SecretString::new(api_secret),
            cfg.recv_window_ms,
            cfg.timeout_secs,
        )
    }

    // -- Internal helpers ------------------------------------------------

    /// Send a request, signing it when required, and return the raw body on
    /// 2xx. Non-2xx responses are parsed into the Binance `{code, msg}`
    /// shape and surfaced as a uniform error.
    async fn request(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
        signed: bool,
    ) -> Result<String> {
        if signed {
            params.push((
                "timestamp".to_string(),
                Utc::now().timestamp_millis().to_string(),
            ));
            params.push(("recvWindow".to_string(), self.recv_window_ms.to_string()));
            let query = encode_params(&params);
            let signature = sign_query(self.api_secret.expose_secret(), &query);
            params.push(("signature".to_string(), signature));
        }

        let query = encode_params(&params);
        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };

        debug!(method = %method, path, signed, "Binance request");

        let mut req = self.http.request(method, &url);
        if signed {
            req = req.header("X-MBX-APIKEY", &self.api_key);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Binance request failed: {path}"))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            // Best-effort parse of the documented error shape.
            if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
                warn!(path, code = err.code, msg = %err.msg, "Binance API error");
                anyhow::bail!("Binance API error {status} (code {}): {}", err.code, err.msg);
            }
            anyhow::bail!("Binance API error {status}: {body}");
        }

        Ok(body)
    }

    fn parse_decimal(raw: &str, field: &str) -> Result<Decimal> {
        Decimal::from_str(raw)
            .with_context(|| format!("Failed to parse Binance decimal field {field}: {raw:?}"))
    }
}

// ---------------------------------------------------------------------------
// MarginExchange trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarginExchange for BinanceClient {
    /// `GET /api/v3/ping` — unsigned connectivity check.
    async fn ping(&self) -> Result<()> {
        self.request(Method::GET, "/api/v3/ping", Vec::new(), false)
            .await?;
        Ok(())
    }

    /// `GET /api/v3/ticker/price` — unsigned latest price.
    async fn symbol_price(&self, symbol: &str) -> Result<Decimal> {
        let body = self
            .request(
                Method::GET,
                "/api/v3/ticker/price",
                vec![("symbol".to_string(), symbol.to_string())],
                false,
            )
            .await?;

        let ticker: TickerPriceResponse =
            serde_json::from_str(&body).context("Failed to parse Binance ticker response")?;
        Self::parse_decimal(&ticker.price, "price")
    }

    /// `GET /sapi/v1/margin/account` — signed account snapshot.
    async fn account(&self) -> Result<AccountSnapshot> {
        let body = self
            .request(Method::GET, "/sapi/v1/margin/account", Vec::new(), true)
            .await?;

        let account: MarginAccountResponse =
            serde_json::from_str(&body).context("Failed to parse Binance margin account")?;

        let mut assets = Vec::with_capacity(account.user_assets.len());
        for a in account.user_assets {
            assets.push(AssetBalance {
                free: Self::parse_decimal(&a.free, "free")?,
                locked: Self::parse_decimal(&a.locked, "locked")?,
                borrowed: Self::parse_decimal(&a.borrowed, "borrowed")?,
                net_asset: Self::parse_decimal(&a.net_asset, "netAsset")?,
                asset: a.asset,
            });
        }

        Ok(AccountSnapshot {
            margin_level: Self::parse_decimal(&account.margin_level, "marginLevel")?,
            total_asset_of_btc: Self::parse_decimal(&account.total_asset_of_btc, "totalAssetOfBtc")?,
            total_net_asset_of_btc: Self::parse_decimal(
                &account.total_net_asset_of_btc,
                "totalNetAssetOfBtc",
            )?,
            assets,
        })
    }

    /// `POST /sapi/v1/margin/order` — signed market order.
    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        side_effect: SideEffect,
    ) -> Result<OrderReceipt> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), side.as_str().to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), quantity.normalize().to_string()),
            ("sideEffectType".to_string(), side_effect.as_str().to_string()),
            (
                "newClientOrderId".to_string(),
                format!("cascade-{}", uuid::Uuid::new_v4()),
            ),
        ];

        let body = self
            .request(Method::POST, "/sapi/v1/margin/order", params, true)
            .await?;

        let order: MarginOrderResponse =
            serde_json::from_str(&body).context("Failed to parse Binance order response")?;

        let executed_qty = match order.executed_qty.as_deref() {
            Some(raw) => Self::parse_decimal(raw, "executedQty")?,
            None => quantity,
        };
        let quote_qty = match order.cummulative_quote_qty.as_deref() {
            Some(raw) => Self::parse_decimal(raw, "cummulativeQuoteQty")?,
            None => Decimal::ZERO,
        };
        let timestamp = order
            .transact_time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        let receipt = OrderReceipt {
            order_id: order.order_id.map(|id| id.to_string()),
            symbol: order.symbol,
            side,
            executed_qty,
            quote_qty,
            status: order.status.unwrap_or_else(|| "UNKNOWN".to_string()),
            timestamp,
        };

        info!(%receipt, "Margin order placed");
        Ok(receipt)
    }

    /// `POST /sapi/v1/margin/loan` — signed borrow.
    async fn borrow(&self, asset: &str, amount: Decimal) -> Result<LoanReceipt> {
        let params = vec![
            ("asset".to_string(), asset.to_string()),
            ("amount".to_string(), amount.normalize().to_string()),
        ];

        let body = self
            .request(Method::POST, "/sapi/v1/margin/loan", params, true)
            .await?;

        let tran: TranResponse =
            serde_json::from_str(&body).context("Failed to parse Binance loan response")?;

        info!(asset, %amount, tran_id = tran.tran_id, "Margin borrow executed");
        Ok(LoanReceipt {
            tran_id: tran.tran_id,
            asset: asset.to_string(),
            amount,
        })
    }

    /// `POST /sapi/v1/margin/repay` — signed repay.
    async fn repay(&self, asset: &str, amount: Decimal) -> Result<LoanReceipt> {
        let params = vec![
            ("asset".to_string(), asset.to_string()),
            ("amount".to_string(), amount.normalize().to_string()),
        ];

        let body = self
            .request(Method::POST, "/sapi/v1/margin/repay", params, true)
            .await?;

        let tran: TranResponse =
            serde_json::from_str(&body).context("Failed to parse Binance repay response")?;

        info!(asset, %amount, tran_id = tran.tran_id, "Margin repay executed");
        Ok(LoanReceipt {
            tran_id: tran.tran_id,
            asset: asset.to_string(),
            amount,
        })
    }

    fn name(&self) -> &str {
        EXCHANGE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
