use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{lot, settle, Strategy};
use crate::config::TrendFollowSettings;
use crate::error::EngineError;
use crate::execution::{
    half_spread_price, BarAggregator, OrderExecutor, OrderOutcome, PositionManager, PriceSource,
    TrailDecision,
};
use crate::models::{MinuteBar, OrderRequest, OrderType, PriceSample, Side};
use crate::reporting::StatusSnapshot;

/// Leverage is not applied to trend entries
const TREND_LEVERAGE: f64 = 1.0;

struct TrendState {
    bars: BarAggregator,
    positions: PositionManager,
    last_price: Option<i64>,
}

/// Always-in-the-market trend follower.
///
/// Builds one-minute bars from per-second mids and evaluates a trailing
/// stop at every bar close. An exit reverses the position (doten) in a
/// single order instead of going flat.
pub struct TrendFollowStrategy {
    settings: TrendFollowSettings,
    executor: Arc<OrderExecutor>,
    settle_delay: Duration,
    min_lot: Decimal,
    state: Mutex<TrendState>,
}

impl TrendFollowStrategy {
    pub fn new(settings: TrendFollowSettings, executor: Arc<OrderExecutor>, settle_delay: Duration) -> Self {
        let state = TrendState {
            bars: BarAggregator::default(),
            positions: PositionManager::new(),
            last_price: None,
        };
        Self {
            min_lot: lot(settings.min_lot),
            settings,
            executor,
            settle_delay,
            state: Mutex::new(state),
        }
    }

    /// Same strategy with a custom bar length, in samples
    pub fn with_bar_period(mut self, samples: usize) -> Self {
        self.state().bars = BarAggregator::new(samples);
        self
    }

    fn state(&self) -> MutexGuard<'_, TrendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open `side`, reversing any opposite exchange position in the same order
    async fn enter(&self, side: Side, mid: i64) -> Result<(), EngineError> {
        self.state().positions.ensure_can_open(side)?;
        if !self.executor.ensure_no_exchange_position(side).await? {
            return Ok(());
        }

        let reversing = match self.executor.exchange_size(side.opposite()).await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!("Position fetch failed, {} entry skipped: {}", side, e);
                self.executor
                    .notifier()
                    .send_text(&format!("Failed to fetch positions, entry skipped: {}", e));
                return Ok(());
            }
        };

        // Entry is valued at the side of the book we trade against
        let entry = half_spread_price(mid, self.settings.spread_percentage, side);
        let Some(quantity) = self
            .executor
            .quantity_for(entry, TREND_LEVERAGE, self.min_lot)
            .await
        else {
            return Ok(());
        };

        let order = OrderRequest {
            side,
            price: OrderExecutor::order_price(mid, side),
            size: quantity + reversing,
            order_type: OrderType::Limit,
        };

        match self.executor.submit(&order).await {
            OrderOutcome::Accepted(_) => {
                {
                    let mut state = self.state();
                    let position = state.positions.open_trend(
                        side,
                        entry,
                        quantity,
                        self.settings.trail_percentage,
                        self.settings.loss_cut_percentage,
                        Utc::now(),
                    );
                    tracing::info!("✅ Opened {}", position);
                }
                let verb = if reversing.is_zero() { "entry" } else { "doten" };
                self.executor
                    .announce(&format!("{} {} succeeded!", side, verb));
                self.executor.announce(&self.report_status().to_string());
            }
            OrderOutcome::Declined { .. } => {}
            OrderOutcome::Failed { reason } => {
                self.executor
                    .announce(&format!("{} entry failed: {}", side, reason));
            }
        }
        Ok(())
    }

    async fn on_bar(&self, bar: MinuteBar) -> Result<(), EngineError> {
        tracing::debug!("Bar closed {}", bar);

        let mid = match self.executor.mid_price().await {
            Some(mid) => mid,
            None => {
                tracing::debug!("Using bar close {} as mid", bar.close);
                bar.close
            }
        };

        let (side, held, decision) = {
            let mut state = self.state();
            let side = state.positions.side();
            let held = state
                .positions
                .position()
                .map_or(0, |p| p.held_seconds(Utc::now()));
            let decision = state
                .positions
                .judge_trail(mid, self.settings.spread_percentage);
            (side, held, decision)
        };

        let Some(side) = side else {
            // Initial entry never went through; keep trying long
            tracing::info!("Flat at bar close, retrying long entry");
            return self.enter(Side::Long, mid).await;
        };

        match decision {
            TrailDecision::Hold => Ok(()),
            TrailDecision::TrailStarted { line } => {
                self.executor
                    .announce(&format!("{} position: trailing started at {}", side, line));
                Ok(())
            }
            TrailDecision::TrailUpdated { from, to } => {
                tracing::debug!("{} position: trail line {} -> {}", side, from, to);
                Ok(())
            }
            TrailDecision::Close { reason, price } => {
                self.executor.announce(&format!(
                    "{} position: {} at {} after {}s",
                    side, reason, price, held
                ));
                self.enter(side.opposite(), mid).await
            }
        }
    }
}

#[async_trait]
impl Strategy for TrendFollowStrategy {
    fn name(&self) -> &'static str {
        "trend_follow"
    }

    fn price_source(&self) -> PriceSource {
        PriceSource::MidPrice
    }

    async fn init(&self) -> Result<(), EngineError> {
        self.flatten().await?;
        settle(self.settle_delay).await;

        if let Some(collateral) = self.executor.refresh_collateral().await {
            tracing::info!("Collateral: {}", collateral.evaluated_amount);
        }

        // Start long unconditionally
        match self.executor.mid_price().await {
            Some(mid) => self.enter(Side::Long, mid).await,
            None => {
                tracing::warn!("No board at start, long entry deferred to the first bar");
                Ok(())
            }
        }
    }

    async fn judge(&self, sample: &PriceSample) -> Result<(), EngineError> {
        let bar = {
            let mut state = self.state();
            state.last_price = Some(sample.price);
            state.bars.push(sample.price)
        };
        match bar {
            Some(bar) => self.on_bar(bar).await,
            None => Ok(()),
        }
    }

    fn report_status(&self) -> StatusSnapshot {
        let state = self.state();
        StatusSnapshot {
            strategy: self.name(),
            collateral: self.executor.cached_collateral(),
            price: state.last_price,
            position: state.positions.position().cloned(),
        }
    }

    async fn flatten(&self) -> Result<(), EngineError> {
        self.executor.position_clear().await?;
        self.state().positions.close();
        Ok(())
    }
}
