use crate::api::ExchangeClient;
use crate::error::ApiError;
use crate::models::{Direction, PriceSample};
use crate::notify::Notifier;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Polling granularity; one fetch per wall-clock second
const TICK_MILLIS: u64 = 50;

/// Which price the sampler treats as the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    MidPrice,
    LastExecution,
}

/// Samples the reference price once per wall-clock second.
///
/// Ticks every 50 ms and fetches when the wall-clock second changes, so the
/// time spent fetching never accumulates into drift. A failed fetch reuses
/// the previous price and marks the sample stale; the sampler never retries.
pub struct PriceSampler {
    client: Arc<dyn ExchangeClient>,
    notifier: Arc<dyn Notifier>,
    source: PriceSource,
    last_price: Option<i64>,
    latest: watch::Sender<Option<PriceSample>>,
}

impl PriceSampler {
    /// Create a sampler and the receiver for its latest published sample
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        notifier: Arc<dyn Notifier>,
        source: PriceSource,
    ) -> (Self, watch::Receiver<Option<PriceSample>>) {
        let (latest, receiver) = watch::channel(None);
        let sampler = Self {
            client,
            notifier,
            source,
            last_price: None,
            latest,
        };
        (sampler, receiver)
    }

    async fn fetch(&self) -> Result<i64, ApiError> {
        match self.source {
            PriceSource::MidPrice => self.client.mid_price().await,
            PriceSource::LastExecution => self.client.last_execution_price().await,
        }
    }

    /// Fetch once and turn the result into a sample
    pub async fn sample(&mut self, now: DateTime<Utc>) -> Option<PriceSample> {
        let fetched = self.fetch().await;
        self.observe(fetched, now)
    }

    /// Build a sample from a fetch result and publish it.
    ///
    /// Returns `None` only when the fetch failed and no price was ever seen.
    pub fn observe(
        &mut self,
        fetched: Result<i64, ApiError>,
        now: DateTime<Utc>,
    ) -> Option<PriceSample> {
        let previous = self.last_price;

        let (price, stale) = match fetched {
            Ok(price) if price > 0 => (price, false),
            Ok(price) => {
                self.report_failure(&format!("non-positive price {}", price));
                (previous?, true)
            }
            Err(e) => {
                self.report_failure(&e.to_string());
                (previous?, true)
            }
        };

        let direction = Direction::between(previous, price);
        let sample = PriceSample {
            price,
            direction,
            observed_at: now,
            stale,
        };

        tracing::debug!(
            "Sampled {:?} price: {} previous: {:?} direction: {} stale: {}",
            self.source,
            price,
            previous,
            direction,
            stale
        );
        tracing::debug!(
            target: "price_direction",
            "{},{},{}",
            now.timestamp(),
            price,
            direction
        );

        self.last_price = Some(price);
        self.latest.send_replace(Some(sample.clone()));
        Some(sample)
    }

    fn report_failure(&self, reason: &str) {
        match self.last_price {
            Some(last) => {
                tracing::warn!(
                    "Price fetch failed ({}), reusing last price {}",
                    reason,
                    last
                );
            }
            None => {
                tracing::warn!("Price fetch failed ({}), no previous price yet", reason);
            }
        }
        let what = match self.source {
            PriceSource::MidPrice => "board",
            PriceSource::LastExecution => "execution",
        };
        self.notifier
            .send_text(&format!("Failed to fetch {} price: {}", what, reason));
    }

    /// Sampling loop; runs until shutdown or until the judge side hangs up
    pub async fn run(mut self, samples: mpsc::Sender<PriceSample>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("🔄 Price sampler starting ({:?})", self.source);

        let mut ticker = interval(Duration::from_millis(TICK_MILLIS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_second = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let second = now.timestamp();
            if last_second == Some(second) {
                continue;
            }
            last_second = Some(second);

            let Some(sample) = self.sample(now).await else {
                continue;
            };

            match samples.try_send(sample) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(sample)) => {
                    tracing::warn!(
                        "Judge loop is behind, dropping sample {} at {}",
                        sample.price,
                        sample.observed_at.format("%H:%M:%S")
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::info!("Judge loop gone, stopping sampler");
                    break;
                }
            }
        }

        tracing::info!("Price sampler stopped");
    }
}
