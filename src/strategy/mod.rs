// Trading strategy module
pub mod scalping;
pub mod signal_window;
pub mod trend_follow;

pub use scalping::ScalpingStrategy;
pub use signal_window::SignalWindow;
pub use trend_follow::TrendFollowStrategy;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Settings, StrategyKind};
use crate::execution::{OrderExecutor, PriceSource};
use crate::models::PriceSample;
use crate::reporting::StatusSnapshot;
use crate::Result;

/// Decision engine driven by the judge loop
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Get strategy name
    fn name(&self) -> &'static str;

    /// Which price the sampler should feed into `judge`
    fn price_source(&self) -> PriceSource;

    /// One-time setup before the first sample
    async fn init(&self) -> Result<()>;

    /// Handle one per-second sample
    async fn judge(&self, sample: &PriceSample) -> Result<()>;

    fn report_status(&self) -> StatusSnapshot;

    /// Close everything on the exchange and forget the local position
    async fn flatten(&self) -> Result<()>;
}

/// Construct the configured strategy
pub fn build(
    kind: StrategyKind,
    settings: &Settings,
    executor: Arc<OrderExecutor>,
) -> Arc<dyn Strategy> {
    match kind {
        StrategyKind::TrendFollow => Arc::new(TrendFollowStrategy::new(
            settings.trend_follow.clone(),
            executor,
            settings.engine.settle_delay(),
        )),
        StrategyKind::Scalping => Arc::new(ScalpingStrategy::new(
            settings.scalping.clone(),
            executor,
            settings.engine.settle_delay(),
        )),
    }
}

/// Lot size from settings; settings validation rejects non-finite values
pub(crate) fn lot(min_lot: f64) -> rust_decimal::Decimal {
    rust_decimal::Decimal::try_from(min_lot).unwrap_or(rust_decimal::Decimal::new(1, 3))
}

pub(crate) async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
