use super::ExchangeClient;
use crate::config::ExchangeSettings;
use crate::error::ApiError;
use crate::models::{
    Collateral, ExchangePosition, HealthStatus, OrderAcceptance, OrderRequest, OrderType, Side,
};
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const GETBOARD_API: &str = "/v1/getboard";
const GETEXECUTIONS_API: &str = "/v1/getexecutions";
const GETHEALTH_API: &str = "/v1/gethealth";
const GETPOSITIONS_API: &str = "/v1/me/getpositions";
const GETCOLLATERAL_API: &str = "/v1/me/getcollateral";
const SENDCHILDORDER_API: &str = "/v1/me/sendchildorder";

const ACCESS_KEY_HEADER: &str = "ACCESS-KEY";
const ACCESS_TIMESTAMP_HEADER: &str = "ACCESS-TIMESTAMP";
const ACCESS_SIGN_HEADER: &str = "ACCESS-SIGN";

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Daily maintenance, 04:00-04:10 JST
const MAINTENANCE_HOUR_JST: u32 = 4;
const MAINTENANCE_MINUTES: u32 = 10;
const JST_OFFSET_HOURS: u32 = 9;

type HmacSha256 = Hmac<Sha256>;

type PrivateRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// bitFlyer Lightning REST client
///
/// Cloneable; clones share the HTTP pool and the private-call rate limiter.
#[derive(Clone)]
pub struct BitflyerClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    product_code: String,
    max_retries: u32,
    retry_interval: Duration,
    rate_limiter: Arc<PrivateRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct BoardResponse {
    mid_price: f64,
}

#[derive(Debug, Deserialize)]
struct ExecutionResponse {
    price: f64,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    product_code: String,
    side: Side,
    size: Decimal,
}

#[derive(Debug, Deserialize)]
struct CollateralResponse {
    collateral: f64,
    open_position_pnl: f64,
}

#[derive(Debug, Deserialize)]
struct ChildOrderResponse {
    child_order_acceptance_id: String,
}

/// Whether `now` falls in the exchange's daily maintenance window
pub fn in_maintenance_window(now: DateTime<Utc>) -> bool {
    let jst_hour = (now.hour() + JST_OFFSET_HOURS) % 24;
    jst_hour == MAINTENANCE_HOUR_JST && now.minute() < MAINTENANCE_MINUTES
}

/// Hex HMAC-SHA256 over `timestamp + method + path + body`
pub fn sign(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

impl BitflyerClient {
    pub fn new(settings: &ExchangeSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let per_minute =
            NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            product_code: settings.product_code.clone(),
            max_retries: settings.max_retries.max(1),
            retry_interval: Duration::from_millis(settings.retry_interval_ms),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        })
    }

    pub fn product_code(&self) -> &str {
        &self.product_code
    }

    async fn get_public<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let body = self.send_with_retry(Method::GET, path, None, false).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get_private<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let body = self.send_with_retry(Method::GET, path, None, true).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Send a request, retrying server-class errors and transport failures.
    ///
    /// Client errors (4xx) are returned immediately.
    async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
        signed: bool,
    ) -> Result<String, ApiError> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            if signed {
                self.rate_limiter.until_ready().await;
            }

            match self.send_once(method.clone(), path, body, signed).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        tracing::warn!(
                            "{} {} returned {} (attempt {}/{}), retrying...",
                            method,
                            path,
                            status,
                            attempt,
                            self.max_retries
                        );
                    } else if !status.is_success() {
                        let text = response.text().await.unwrap_or_default();
                        return Err(ApiError::Status {
                            status: status.as_u16(),
                            body: text,
                        });
                    } else {
                        return Ok(response.text().await?);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "{} {} failed (attempt {}/{}): {}",
                        method,
                        path,
                        attempt,
                        self.max_retries,
                        e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.max_retries {
                sleep(self.retry_interval).await;
            }
        }

        Err(last_error.map(ApiError::Transport).unwrap_or_else(|| {
            ApiError::RetriesExhausted {
                endpoint: path.to_string(),
                attempts: self.max_retries,
            }
        }))
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
        signed: bool,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);

        if signed {
            let timestamp = Utc::now().timestamp_millis().to_string();
            let signature = sign(
                &self.api_secret,
                &timestamp,
                method.as_str(),
                path,
                body.unwrap_or(""),
            );
            request = request
                .header(ACCESS_KEY_HEADER, &self.api_key)
                .header(ACCESS_TIMESTAMP_HEADER, timestamp)
                .header(ACCESS_SIGN_HEADER, signature);
        }

        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        request.send().await
    }

    fn order_body(&self, order: &OrderRequest) -> Result<String, ApiError> {
        let size = order.size.to_f64().ok_or(ApiError::Empty("order size"))?;

        let body = match order.order_type {
            OrderType::Limit => serde_json::json!({
                "product_code": self.product_code,
                "child_order_type": "LIMIT",
                "side": order.side.as_order_side(),
                "price": order.price,
                "size": size,
                "time_in_force": "IOC",
            }),
            OrderType::Market => serde_json::json!({
                "product_code": self.product_code,
                "child_order_type": "MARKET",
                "side": order.side.as_order_side(),
                "size": size,
            }),
        };

        Ok(serde_json::to_string(&body)?)
    }
}

#[async_trait]
impl ExchangeClient for BitflyerClient {
    async fn mid_price(&self) -> Result<i64, ApiError> {
        let path = format!("{}?product_code={}", GETBOARD_API, self.product_code);
        let board: BoardResponse = self.get_public(&path).await?;
        Ok(board.mid_price as i64)
    }

    async fn last_execution_price(&self) -> Result<i64, ApiError> {
        let path = format!(
            "{}?product_code={}&count=1",
            GETEXECUTIONS_API, self.product_code
        );
        let executions: Vec<ExecutionResponse> = self.get_public(&path).await?;
        executions
            .first()
            .map(|e| e.price as i64)
            .ok_or(ApiError::Empty("executions"))
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>, ApiError> {
        let path = format!("{}?product_code={}", GETPOSITIONS_API, self.product_code);
        let positions: Vec<PositionResponse> = self.get_private(&path).await?;

        Ok(positions
            .into_iter()
            .filter(|p| p.product_code == self.product_code)
            .map(|p| ExchangePosition {
                side: p.side,
                size: p.size,
            })
            .collect())
    }

    async fn collateral(&self) -> Result<Collateral, ApiError> {
        let response: CollateralResponse = self.get_private(GETCOLLATERAL_API).await?;
        Ok(Collateral {
            evaluated_amount: response.collateral as i64,
            open_position_pnl: response.open_position_pnl as i64,
        })
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAcceptance, ApiError> {
        let body = self.order_body(order)?;
        let text = self
            .send_with_retry(Method::POST, SENDCHILDORDER_API, Some(&body), true)
            .await?;
        let response: ChildOrderResponse = serde_json::from_str(&text)?;

        Ok(OrderAcceptance {
            acceptance_id: response.child_order_acceptance_id,
        })
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        let path = format!("{}?product_code={}", GETHEALTH_API, self.product_code);
        let response: HealthResponse = self.get_public(&path).await?;
        Ok(HealthStatus::parse(&response.status))
    }

    fn is_maintenance_window(&self, now: DateTime<Utc>) -> bool {
        in_maintenance_window(now)
    }
}
