use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::ExchangeClient;
use crate::config::{EngineSettings, Settings};
use crate::error::EngineError;
use crate::execution::{OrderExecutor, PriceSampler};
use crate::models::PriceSample;
use crate::notify::Notifier;
use crate::reporting::StatusReporter;
use crate::risk::HealthGate;
use crate::strategy::{self, Strategy};

/// Samples the judge loop may fall behind by before the sampler drops
const SAMPLE_BUFFER: usize = 8;

/// Why the engine stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Ctrl-C / SIGTERM
    Signal,
    /// Sampler went away; nothing left to judge
    SamplerStopped,
}

/// Owns the three long-running loops and the shutdown path
pub struct Engine {
    strategy: Arc<dyn Strategy>,
    executor: Arc<OrderExecutor>,
    client: Arc<dyn ExchangeClient>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
}

impl Engine {
    /// Wire the configured strategy to `client` and `notifier`
    pub fn new(settings: &Settings, client: Arc<dyn ExchangeClient>, notifier: Arc<dyn Notifier>) -> Self {
        let health = HealthGate::new(
            client.clone(),
            settings.engine.health_retry_attempts,
            settings.engine.health_retry_interval(),
        );
        let executor = Arc::new(OrderExecutor::new(client.clone(), notifier.clone(), health));
        let strategy = strategy::build(settings.engine.strategy, settings, executor.clone());

        Self::with_strategy(strategy, executor, client, notifier, settings.engine.clone())
    }

    pub fn with_strategy(
        strategy: Arc<dyn Strategy>,
        executor: Arc<OrderExecutor>,
        client: Arc<dyn ExchangeClient>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            strategy,
            executor,
            client,
            notifier,
            settings,
        }
    }

    /// Run until `shutdown` resolves or a loop hits a fatal error.
    ///
    /// `shutdown` is watched from the start, including during the startup
    /// clear. Once the loops run, a signal stops them first and the position
    /// is then flattened if configured. A fatal error skips the flatten,
    /// since the position state can no longer be trusted.
    pub async fn run<F>(self, shutdown: F) -> Result<StopReason, EngineError>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!("🚀 Starting {} strategy", self.strategy.name());
        tokio::pin!(shutdown);

        // Dropping the init future cancels any pending health recheck or settle sleep
        let init = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            result = self.strategy.init() => Some(result),
        };
        match init {
            None => {
                tracing::info!("🛑 Shutdown requested during startup");
                self.executor
                    .announce("Shutdown requested during startup, position left as is");
                self.executor
                    .announce(&format!("LOGIC STOP ({:?})", StopReason::Signal));
                return Ok(StopReason::Signal);
            }
            Some(Err(e)) => {
                self.report_fatal(&e);
                return Err(e);
            }
            Some(Ok(())) => {}
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_BUFFER);

        // ========================================================================
        // Loop 1: price sampler
        // ========================================================================
        let (sampler, latest) = PriceSampler::new(
            self.client.clone(),
            self.notifier.clone(),
            self.strategy.price_source(),
        );
        let sampler_handle = tokio::spawn(sampler.run(sample_tx, stop_rx.clone()));

        // ========================================================================
        // Loop 2: judge
        // ========================================================================
        let mut judge_handle: JoinHandle<Result<(), EngineError>> =
            tokio::spawn(judge_loop(self.strategy.clone(), sample_rx, stop_rx.clone()));

        // ========================================================================
        // Loop 3: periodic status
        // ========================================================================
        let reporter = StatusReporter::new(
            self.strategy.clone(),
            self.executor.clone(),
            latest,
            self.settings.notify_interval(),
        );
        let reporter_handle = tokio::spawn(reporter.run(stop_rx));

        tracing::info!("✅ All loops started");

        let (reason, judge_result) = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("🛑 Shutdown requested");
                let _ = stop_tx.send(true);
                (StopReason::Signal, join(&mut judge_handle).await)
            }
            result = &mut judge_handle => {
                let _ = stop_tx.send(true);
                (StopReason::SamplerStopped, flatten_join(result))
            }
        };

        let _ = sampler_handle.await;
        let _ = reporter_handle.await;

        if let Err(e) = judge_result {
            self.report_fatal(&e);
            return Err(e);
        }

        if reason == StopReason::Signal && self.settings.flatten_on_shutdown {
            self.executor.announce("Flattening before exit");
            if let Err(e) = self.strategy.flatten().await {
                self.report_fatal(&e);
                return Err(e);
            }
        }

        self.executor
            .announce(&format!("LOGIC STOP ({:?})", reason));
        Ok(reason)
    }

    fn report_fatal(&self, error: &EngineError) {
        tracing::error!("💥 Fatal: {}", error);
        self.notifier
            .send_text(&format!("Fatal error, stopping: {}", error));
    }
}

async fn join(handle: &mut JoinHandle<Result<(), EngineError>>) -> Result<(), EngineError> {
    flatten_join(handle.await)
}

fn flatten_join(
    result: Result<Result<(), EngineError>, tokio::task::JoinError>,
) -> Result<(), EngineError> {
    result.map_err(|e| EngineError::Invariant(format!("judge loop aborted: {}", e)))?
}

/// Feed samples into the strategy; the only place the position is mutated
async fn judge_loop(
    strategy: Arc<dyn Strategy>,
    mut samples: mpsc::Receiver<PriceSample>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    loop {
        let sample = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            sample = samples.recv() => match sample {
                Some(sample) => sample,
                None => break,
            },
        };
        if *shutdown.borrow() {
            break;
        }
        strategy.judge(&sample).await?;
    }

    tracing::info!("Judge loop stopped");
    Ok(())
}
