// =============================================================================
// MT5 Bridge HTTP Client — JSON over HTTP with bounded retry
// =============================================================================
//
// Consumes the bridge wire protocol:
//   GET  /health /account /symbol /rates /positions
//   POST /order /modify /close
//
// Transient failures (connect errors, timeouts, 408/429, 5xx) are retried
// with exponential backoff capped at `retry_attempts`; 4xx responses are
// permanent and never retried. A modify rejected for stop distance maps to
// `BrokerError::StopsTooClose` so the exit coordinator can widen or skip.
//
// SECURITY: the optional bearer token is sent as a header and never logged.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::bridge::{
    Broker, BrokerPosition, CloseAck, HealthStatus, OrderAck, OrderRequest, SymbolInfo,
};
use crate::config::Mt5Config;
use crate::error::BrokerError;
use crate::types::{Account, Bar, Side, Timeframe};

/// Base delay for the exponential backoff schedule.
const BACKOFF_BASE_MS: u64 = 200;

/// HTTP client for the MT5 broker bridge.
pub struct BridgeClient {
    base_url: String,
    client: reqwest::Client,
    retry_attempts: u32,
    closed: AtomicBool,
}

impl BridgeClient {
    /// Build a client from the bridge section of the engine config.
    pub fn new(cfg: &Mt5Config) -> Self {
        let mut default_headers = HeaderMap::new();
        if let Some(token) = &cfg.token {
            if let Ok(val) = HeaderValue::from_str(&format!("Bearer {token}")) {
                default_headers.insert("Authorization", val);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(cfg.call_timeout_seconds))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        debug!(base_url = %cfg.base_url(), "bridge client initialised");

        Self {
            base_url: cfg.base_url(),
            client,
            retry_attempts: cfg.retry_attempts.max(1),
            closed: AtomicBool::new(false),
        }
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    fn guard_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Permanent("bridge client is closed".into()));
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, BrokerError> {
        self.guard_open()?;
        let url = format!("{}{}", self.base_url, path_and_query);
        self.with_retry(|| async {
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(classify_reqwest_error)?;
            Self::decode(resp).await
        })
        .await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, BrokerError> {
        self.guard_open()?;
        let url = format!("{}{}", self.base_url, path);
        self.with_retry(|| async {
            let resp = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(classify_reqwest_error)?;
            Self::decode(resp).await
        })
        .await
    }

    /// Run `op` until it succeeds, a permanent error surfaces, or the retry
    /// budget is exhausted. Backoff doubles each attempt.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, BrokerError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, BrokerError>>,
    {
        let mut last_err = None;
        for attempt in 0..self.retry_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    let delay = BACKOFF_BASE_MS * (1 << attempt.min(6));
                    warn!(
                        attempt = attempt + 1,
                        max = self.retry_attempts,
                        delay_ms = delay,
                        error = %e,
                        "transient bridge error — backing off"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| BrokerError::Transient("retry budget exhausted".into())))
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, BrokerError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| BrokerError::Permanent(format!("malformed bridge response: {e}")));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

/// Map reqwest-level failures (no HTTP status) onto the taxonomy.
fn classify_reqwest_error(e: reqwest::Error) -> BrokerError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        BrokerError::Transient(e.to_string())
    } else {
        BrokerError::Permanent(e.to_string())
    }
}

/// Map an HTTP error status + body onto the taxonomy.
fn classify_status(status: StatusCode, body: &str) -> BrokerError {
    // The bridge reports stop-distance violations as 422 with a coded body.
    if status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("stops_too_close") {
        #[derive(Deserialize)]
        struct StopsBody {
            #[serde(default)]
            requested: f64,
            #[serde(default)]
            min_distance: f64,
        }
        let parsed: StopsBody = serde_json::from_str(body).unwrap_or(StopsBody {
            requested: 0.0,
            min_distance: 0.0,
        });
        return BrokerError::StopsTooClose {
            requested: parsed.requested,
            min_distance: parsed.min_distance,
        };
    }

    match status.as_u16() {
        408 | 429 => BrokerError::Transient(format!("bridge returned {status}: {body}")),
        500..=599 => BrokerError::Transient(format!("bridge returned {status}: {body}")),
        _ => BrokerError::Permanent(format!("bridge returned {status}: {body}")),
    }
}

// -------------------------------------------------------------------------
// Wire formats
// -------------------------------------------------------------------------

/// A bar row as the bridge serialises it. `time` is epoch seconds in broker
/// time, assumed UTC (naive timestamps are coerced at ingest).
#[derive(Debug, Deserialize)]
struct RateRow {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct PositionRow {
    ticket: u64,
    symbol: String,
    side: Side,
    lot: f64,
    entry_price: f64,
    /// Epoch seconds, coerced to UTC.
    entry_time: i64,
    #[serde(default)]
    sl: Option<f64>,
    #[serde(default)]
    tp: Option<f64>,
    #[serde(default)]
    current_price: f64,
    #[serde(default)]
    unrealized_pnl: f64,
    #[serde(default)]
    magic: i64,
}

fn epoch_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

// -------------------------------------------------------------------------
// Broker impl
// -------------------------------------------------------------------------

#[async_trait]
impl Broker for BridgeClient {
    async fn health(&self) -> Result<HealthStatus, BrokerError> {
        self.get_json("/health").await
    }

    async fn account_info(&self) -> Result<Account, BrokerError> {
        self.get_json("/account").await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError> {
        self.get_json::<SymbolInfo>(&format!("/symbol?s={symbol}"))
            .await
    }

    async fn rates(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        let rows: Vec<RateRow> = self
            .get_json(&format!("/rates?s={symbol}&tf={}&n={count}", timeframe))
            .await?;

        let mut bars: Vec<Bar> = rows
            .into_iter()
            .map(|r| Bar {
                time: epoch_to_utc(r.time),
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
            })
            .collect();

        // The series contract is strictly ascending by time.
        bars.sort_by_key(|b| b.time);
        bars.dedup_by_key(|b| b.time);
        Ok(bars)
    }

    async fn open_positions(
        &self,
        magic: Option<i64>,
    ) -> Result<Vec<BrokerPosition>, BrokerError> {
        let query = match magic {
            Some(m) => format!("/positions?magic={m}"),
            None => "/positions".to_string(),
        };
        let rows: Vec<PositionRow> = self.get_json(&query).await?;
        Ok(rows
            .into_iter()
            .map(|r| BrokerPosition {
                ticket: r.ticket,
                symbol: r.symbol,
                side: r.side,
                lot: r.lot,
                entry_price: r.entry_price,
                entry_time: epoch_to_utc(r.entry_time),
                sl: r.sl,
                tp: r.tp,
                current_price: r.current_price,
                unrealized_pnl: r.unrealized_pnl,
                magic: r.magic,
            })
            .collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        let body = serde_json::json!({
            "symbol": request.symbol,
            "side": request.side,
            "lot": request.lot,
            "sl": request.sl,
            "tp": request.tp,
            "magic": request.magic,
            "comment": request.comment,
        });
        self.post_json("/order", &body).await
    }

    async fn modify_position(
        &self,
        ticket: u64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> Result<(), BrokerError> {
        let body = serde_json::json!({ "ticket": ticket, "sl": sl, "tp": tp });
        // The bridge acks with an empty object.
        let _ack: serde_json::Value = self.post_json("/modify", &body).await?;
        Ok(())
    }

    async fn close_position(
        &self,
        ticket: u64,
        lot: Option<f64>,
    ) -> Result<CloseAck, BrokerError> {
        let body = serde_json::json!({ "ticket": ticket, "lot": lot });
        self.post_json("/close", &body).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!("bridge client close() called more than once");
        } else {
            debug!("bridge client closed");
        }
    }
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("base_url", &self.base_url)
            .field("retry_attempts", &self.retry_attempts)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
