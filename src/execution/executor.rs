use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::{Arc, Mutex, PoisonError};

use crate::api::ExchangeClient;
use crate::error::{ApiError, EngineError};
use crate::models::{Collateral, OrderAcceptance, OrderRequest, OrderType, Side};
use crate::notify::Notifier;
use crate::risk::{HealthCheck, HealthGate};

/// Offset from mid used to make a limit order fill like a market order
const ORDER_PRICE_OFFSET_PERCENTAGE: f64 = 1.0;

/// Result of a single order attempt
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Accepted(OrderAcceptance),
    /// Not sent: exchange unhealthy or in maintenance
    Declined { status: String },
    /// Sent but not accepted
    Failed { reason: String },
}

impl OrderOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, OrderOutcome::Accepted(_))
    }
}

/// Sizes, gates and submits orders on behalf of a strategy
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
    notifier: Arc<dyn Notifier>,
    health: HealthGate,
    collateral: Mutex<Option<Collateral>>,
    /// Status of the current run of declines, notified once per run
    last_decline: Mutex<Option<String>>,
}

impl OrderExecutor {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        notifier: Arc<dyn Notifier>,
        health: HealthGate,
    ) -> Self {
        Self {
            client,
            notifier,
            health,
            collateral: Mutex::new(None),
            last_decline: Mutex::new(None),
        }
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Log and forward to the operator
    pub fn announce(&self, message: &str) {
        tracing::info!("{}", message);
        self.notifier.send_text(message);
    }

    /// Quantity for `collateral` at `reference_price`.
    ///
    /// Works in thousandths with integer division, then truncates to three
    /// decimals. Below `min_lot` the order is skipped.
    pub fn size_order(
        collateral: i64,
        reference_price: i64,
        leverage: f64,
        min_lot: Decimal,
    ) -> Option<Decimal> {
        if collateral <= 0 || reference_price <= 0 {
            return None;
        }
        let qty_x1000 = collateral * 1000 / reference_price;
        let leverage = Decimal::try_from(leverage).ok()?;

        let quantity = (Decimal::from(qty_x1000) * leverage / Decimal::from(1000))
            .round_dp_with_strategy(3, RoundingStrategy::ToZero);

        if quantity < min_lot || quantity.is_zero() {
            return None;
        }
        Some(quantity)
    }

    /// Order price pushed 1% through mid in the trade's direction
    pub fn order_price(mid: i64, side: Side) -> i64 {
        let offset = (mid as f64 * ORDER_PRICE_OFFSET_PERCENTAGE / 100.0) as i64;
        match side {
            Side::Long => mid + offset,
            Side::Short => mid - offset,
        }
    }

    /// Size an entry from fresh collateral, notifying when it is skipped
    pub async fn quantity_for(
        &self,
        reference_price: i64,
        leverage: f64,
        min_lot: Decimal,
    ) -> Option<Decimal> {
        let collateral = match self.refresh_collateral().await {
            Some(collateral) => collateral,
            None => self.cached_collateral()?,
        };

        let quantity = Self::size_order(
            collateral.evaluated_amount,
            reference_price,
            leverage,
            min_lot,
        );
        if quantity.is_none() {
            self.announce(&format!(
                "Order skipped: collateral {} at price {} is below the minimum lot {}",
                collateral.evaluated_amount, reference_price, min_lot
            ));
        }
        quantity
    }

    /// Current mid price, `None` (logged and notified) when the board is unavailable
    pub async fn mid_price(&self) -> Option<i64> {
        match self.client.mid_price().await {
            Ok(mid) if mid > 0 => Some(mid),
            Ok(mid) => {
                tracing::warn!("Board returned non-positive mid {}", mid);
                self.notifier.send_text("Failed to fetch board (no mid price)");
                None
            }
            Err(e) => {
                tracing::warn!("Board fetch failed: {}", e);
                self.notifier
                    .send_text(&format!("Failed to fetch board: {}", e));
                None
            }
        }
    }

    /// Total exchange-side size held on `side` for the instrument
    pub async fn exchange_size(&self, side: Side) -> Result<Decimal, ApiError> {
        let positions = self.client.positions().await?;
        Ok(positions
            .iter()
            .filter(|p| p.side == side)
            .map(|p| p.size)
            .sum())
    }

    /// Refuse an entry when the exchange already holds that side.
    ///
    /// Returns `Ok(false)` when positions cannot be read; the entry is then
    /// skipped for this cycle.
    pub async fn ensure_no_exchange_position(&self, side: Side) -> Result<bool, EngineError> {
        match self.exchange_size(side).await {
            Ok(size) if size.is_zero() => Ok(true),
            Ok(size) => Err(EngineError::Invariant(format!(
                "attempted to open {} while the exchange holds {} on that side",
                side, size
            ))),
            Err(e) => {
                tracing::warn!("Position check failed, skipping entry: {}", e);
                self.notifier
                    .send_text(&format!("Failed to fetch positions, entry skipped: {}", e));
                Ok(false)
            }
        }
    }

    /// Re-read collateral and update the cache; `None` keeps the old value
    pub async fn refresh_collateral(&self) -> Option<Collateral> {
        match self.client.collateral().await {
            Ok(collateral) => {
                *self
                    .collateral
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(collateral);
                Some(collateral)
            }
            Err(e) => {
                tracing::warn!("Collateral fetch failed: {}", e);
                self.notifier
                    .send_text(&format!("Failed to fetch collateral: {}", e));
                None
            }
        }
    }

    pub fn cached_collateral(&self) -> Option<Collateral> {
        *self
            .collateral
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, order: &OrderRequest) -> OrderOutcome {
        let result = self.client.submit_order(order).await;
        let id = match &result {
            Ok(acceptance) => acceptance.acceptance_id.as_str(),
            Err(_) => "null",
        };
        self.announce(&format!(
            "[order] side:{} price:{} size:{} orderType:{} id:{}",
            order.side, order.price, order.size, order.order_type, id
        ));

        match result {
            Ok(acceptance) => OrderOutcome::Accepted(acceptance),
            Err(e) => {
                tracing::warn!("❌ Order not accepted: {}", e);
                OrderOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Time-critical submission: declined without contacting the order
    /// endpoint when the exchange is unhealthy.
    ///
    /// Consecutive declines with the same status are notified once.
    pub async fn submit(&self, order: &OrderRequest) -> OrderOutcome {
        if let HealthCheck::Unhealthy(reason) = self.health.check().await {
            let status = reason.to_string();
            tracing::warn!("⏸️  {} order declined, exchange status: {}", order.side, status);

            let previous = self
                .last_decline
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(status.clone());
            if previous.as_deref() != Some(status.as_str()) {
                self.notifier.send_text(&format!(
                    "Exchange unhealthy or in maintenance, order skipped. side:{} status:{}",
                    order.side, status
                ));
            }
            return OrderOutcome::Declined { status };
        }

        self.last_decline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.send(order).await
    }

    /// Submission that must happen: waits out unhealthiness with bounded
    /// rechecks, fatal once they run out or the order is not accepted
    pub async fn submit_with_retry(
        &self,
        order: &OrderRequest,
    ) -> Result<OrderAcceptance, EngineError> {
        if let Err(e) = self.health.wait_until_healthy().await {
            self.notifier
                .send_text(&format!("Exchange stays unhealthy, giving up: {}", e));
            return Err(e);
        }
        match self.send(order).await {
            OrderOutcome::Accepted(acceptance) => Ok(acceptance),
            OrderOutcome::Failed { reason } | OrderOutcome::Declined { status: reason } => {
                Err(EngineError::ClearRejected(reason))
            }
        }
    }

    /// Flatten whatever the exchange holds for the instrument.
    ///
    /// Sells a long or buys back a short; does nothing when flat, so
    /// repeated calls are harmless. Any failure here is fatal.
    pub async fn position_clear(&self) -> Result<Option<OrderAcceptance>, EngineError> {
        let positions = self
            .client
            .positions()
            .await
            .map_err(|e| EngineError::api("position clear", e))?;

        let held = |side: Side| -> Decimal {
            positions
                .iter()
                .filter(|p| p.side == side)
                .map(|p| p.size)
                .sum()
        };

        let (closing_side, size) = {
            let long = held(Side::Long);
            if !long.is_zero() {
                (Side::Short, long)
            } else {
                let short = held(Side::Short);
                if short.is_zero() {
                    tracing::debug!("No position to clear");
                    return Ok(None);
                }
                (Side::Long, short)
            }
        };

        self.announce(&format!(
            "Squaring {} position, size: {}",
            closing_side.opposite(),
            size
        ));

        let mid = self
            .client
            .mid_price()
            .await
            .ok()
            .filter(|mid| *mid > 0)
            .ok_or(EngineError::PriceUnavailable("clear the position"))?;

        let order = OrderRequest {
            side: closing_side,
            price: Self::order_price(mid, closing_side),
            size,
            order_type: OrderType::Market,
        };
        self.submit_with_retry(&order).await.map(Some)
    }
}
