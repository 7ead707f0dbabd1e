use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{lot, settle, SignalWindow, Strategy};
use crate::config::ScalpingSettings;
use crate::error::EngineError;
use crate::execution::{
    half_spread_price, ExitReason, OrderExecutor, OrderOutcome, Position, PositionManager,
    PriceSource,
};
use crate::models::{OrderRequest, OrderType, PriceSample, Side};
use crate::reporting::StatusSnapshot;

struct ScalpingState {
    window: SignalWindow,
    positions: PositionManager,
    last_price: Option<i64>,
    /// Exit already announced for the open position; retries stay quiet
    announced_exit: Option<ExitReason>,
}

enum Action {
    Open(Side),
    Close(ExitReason),
}

/// Short-horizon momentum scalper.
///
/// Flat between trades. While flat every sample goes into the signal
/// window and a full window may trigger an entry; while open the position
/// is checked against its profit-take, loss-cut and deadline each second.
/// Exits flatten the exchange position without reversing.
pub struct ScalpingStrategy {
    settings: ScalpingSettings,
    executor: Arc<OrderExecutor>,
    settle_delay: Duration,
    min_lot: Decimal,
    state: Mutex<ScalpingState>,
}

impl ScalpingStrategy {
    pub fn new(settings: ScalpingSettings, executor: Arc<OrderExecutor>, settle_delay: Duration) -> Self {
        let state = ScalpingState {
            window: SignalWindow::new(settings.judge_seconds),
            positions: PositionManager::new(),
            last_price: None,
            announced_exit: None,
        };
        Self {
            min_lot: lot(settings.min_lot),
            settings,
            executor,
            settle_delay,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScalpingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_local(&self) -> Option<Position> {
        let mut state = self.state();
        state.announced_exit = None;
        state.positions.close()
    }

    /// Decide what this sample calls for; no I/O under the lock
    fn decide(&self, sample: &PriceSample) -> Option<Action> {
        let mut state = self.state();
        state.last_price = Some(sample.price);

        if state.positions.is_flat() {
            state.window.push(sample.clone());
            if !state.window.is_full() {
                return None;
            }
            let side = state.window.judge(
                self.settings.direction_judge_percentage,
                self.settings.count_judge_ratio,
            )?;
            // Cleared whatever the order outcome, so stale samples cannot re-trigger
            state.window.clear();
            Some(Action::Open(side))
        } else {
            state
                .positions
                .judge_scalp_exit(sample.price, self.settings.spread_percentage, sample.observed_at)
                .map(Action::Close)
        }
    }

    async fn open(&self, side: Side, sample: &PriceSample) -> Result<(), EngineError> {
        self.state().positions.ensure_can_open(side)?;
        if !self.executor.ensure_no_exchange_position(side).await? {
            return Ok(());
        }

        let Some(mid) = self.executor.mid_price().await else {
            tracing::debug!("No board, skipping {} entry", side);
            return Ok(());
        };
        let reference = half_spread_price(mid, self.settings.spread_percentage, side);
        let Some(size) = self
            .executor
            .quantity_for(reference, self.settings.leverage, self.min_lot)
            .await
        else {
            return Ok(());
        };

        let order = OrderRequest {
            side,
            price: OrderExecutor::order_price(mid, side),
            size,
            order_type: OrderType::Market,
        };

        match self.executor.submit(&order).await {
            OrderOutcome::Accepted(_) => {
                {
                    let mut state = self.state();
                    state.announced_exit = None;
                    let position = state.positions.open_scalp(
                        side,
                        sample.price,
                        size,
                        self.settings.spread_percentage,
                        self.settings.profit_take_percentage,
                        self.settings.loss_cut_percentage,
                        self.settings.close_seconds,
                        Utc::now(),
                    );
                    tracing::info!("✅ Opened {}", position);
                }
                self.executor.announce(&format!("{} entry succeeded!", side));
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

    async fn close(&self, reason: ExitReason) -> Result<(), EngineError> {
        let (side, held, first_attempt) = {
            let mut state = self.state();
            let Some(position) = state.positions.position() else {
                return Ok(());
            };
            let (side, held) = (position.side, position.held_seconds(Utc::now()));
            let first_attempt = state.announced_exit != Some(reason);
            state.announced_exit = Some(reason);
            (side, held, first_attempt)
        };
        if first_attempt {
            self.executor.announce(&format!(
                "{}: closing {} position after {}s",
                reason, side, held
            ));
        } else {
            tracing::debug!("{}: retrying close of {} position", reason, side);
        }

        let size = match self.executor.exchange_size(side).await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!("Position fetch failed, close retried next second: {}", e);
                self.executor
                    .notifier()
                    .send_text(&format!("Failed to fetch positions for close: {}", e));
                return Ok(());
            }
        };

        if size.is_zero() {
            // Already gone on the exchange side
            self.close_local();
            self.executor
                .announce(&format!("No {} size left on the exchange, position closed", side));
            return Ok(());
        }

        let Some(mid) = self.executor.mid_price().await else {
            return Ok(());
        };
        let closing = side.opposite();
        let order = OrderRequest {
            side: closing,
            price: OrderExecutor::order_price(mid, closing),
            size,
            order_type: OrderType::Market,
        };

        match self.executor.submit(&order).await {
            OrderOutcome::Accepted(_) => {
                let closed = self.close_local();
                if let Some(closed) = closed {
                    tracing::info!("✅ Closed {} ({})", closed, reason);
                }
                self.executor.announce(&self.report_status().to_string());
            }
            OrderOutcome::Declined { .. } => {}
            OrderOutcome::Failed { reason: failure } => {
                self.executor
                    .announce(&format!("{} close failed: {}", side, failure));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for ScalpingStrategy {
    fn name(&self) -> &'static str {
        "scalping"
    }

    fn price_source(&self) -> PriceSource {
        PriceSource::LastExecution
    }

    async fn init(&self) -> Result<(), EngineError> {
        if let Some(collateral) = self.executor.refresh_collateral().await {
            tracing::info!("Collateral: {}", collateral.evaluated_amount);
        }
        self.flatten().await?;
        settle(self.settle_delay).await;

        let snapshot = self.report_status();
        self.executor.announce(&snapshot.to_string());
        Ok(())
    }

    async fn judge(&self, sample: &PriceSample) -> Result<(), EngineError> {
        match self.decide(sample) {
            Some(Action::Open(side)) => self.open(side, sample).await,
            Some(Action::Close(reason)) => self.close(reason).await,
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
        self.close_local();
        self.state().window.clear();
        Ok(())
    }
}
