use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::execution::{OrderExecutor, Position};
use crate::models::{Collateral, PriceSample};
use crate::strategy::Strategy;

/// Point-in-time view of the engine for the operator
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub strategy: &'static str,
    pub collateral: Option<Collateral>,
    /// Latest sampled reference price
    pub price: Option<i64>,
    pub position: Option<Position>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[current status] strategy:{}", self.strategy)?;
        match self.collateral {
            Some(c) => write!(
                f,
                " collateral:{} OpenPL:{}",
                c.evaluated_amount, c.open_position_pnl
            )?,
            None => write!(f, " collateral:unknown")?,
        }
        match self.price {
            Some(price) => write!(f, " price:{}", price)?,
            None => write!(f, " price:unknown")?,
        }
        match &self.position {
            Some(position) => {
                write!(f, " position:{}", position)?;
                if let Some(price) = self.price {
                    write!(f, " unrealized:{}", position.unrealized_pnl(price))?;
                }
                Ok(())
            }
            None => write!(f, " position:flat"),
        }
    }
}

/// Periodic status notifications
pub struct StatusReporter {
    strategy: Arc<dyn Strategy>,
    executor: Arc<OrderExecutor>,
    /// Latest sample published by the price sampler
    latest: watch::Receiver<Option<PriceSample>>,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(
        strategy: Arc<dyn Strategy>,
        executor: Arc<OrderExecutor>,
        latest: watch::Receiver<Option<PriceSample>>,
        interval: Duration,
    ) -> Self {
        Self {
            strategy,
            executor,
            latest,
            interval,
        }
    }

    /// Refresh collateral, then log and notify one snapshot.
    ///
    /// The price is the sampler's latest, which keeps moving while the
    /// strategy waits for its next decision.
    pub async fn report_once(&self) -> StatusSnapshot {
        self.executor.refresh_collateral().await;
        let mut snapshot = self.strategy.report_status();
        let latest = self.latest.borrow().as_ref().map(|sample| sample.price);
        if latest.is_some() {
            snapshot.price = latest;
        }
        self.executor.announce(&snapshot.to_string());
        snapshot
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("📣 Status reporter starting (every {:?})", self.interval);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            self.report_once().await;
        }

        tracing::info!("Status reporter stopped");
    }
}
