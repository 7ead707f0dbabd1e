pub mod bitflyer;

pub use bitflyer::BitflyerClient;

use crate::error::ApiError;
use crate::models::{Collateral, ExchangePosition, HealthStatus, OrderAcceptance, OrderRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Exchange operations consumed by the decision engine.
///
/// Implementations embed authentication, decoding and transport-level
/// retries. Every call may be slow or fail; the engine never assumes
/// success and treats any `Err` as "unavailable".
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Midpoint between best bid and best ask
    async fn mid_price(&self) -> Result<i64, ApiError>;

    /// Price of the most recent execution
    async fn last_execution_price(&self) -> Result<i64, ApiError>;

    /// Open positions for the configured instrument only
    async fn positions(&self) -> Result<Vec<ExchangePosition>, ApiError>;

    async fn collateral(&self) -> Result<Collateral, ApiError>;

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAcceptance, ApiError>;

    async fn health(&self) -> Result<HealthStatus, ApiError>;

    fn is_maintenance_window(&self, now: DateTime<Utc>) -> bool;
}
