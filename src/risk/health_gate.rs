use crate::api::ExchangeClient;
use crate::error::EngineError;
use crate::models::HealthStatus;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Result of one health evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum HealthCheck {
    Healthy,
    Unhealthy(UnhealthyReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnhealthyReason {
    Status(HealthStatus),
    Maintenance,
    Unreachable(String),
}

impl fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnhealthyReason::Status(status) => write!(f, "{}", status),
            UnhealthyReason::Maintenance => f.write_str("MAINTENANCE"),
            UnhealthyReason::Unreachable(e) => write!(f, "UNREACHABLE ({})", e),
        }
    }
}

impl HealthCheck {
    /// Combine the reported status with the maintenance calendar.
    ///
    /// Maintenance wins over a NORMAL status.
    pub fn evaluate(status: Result<HealthStatus, String>, in_maintenance: bool) -> Self {
        if in_maintenance {
            return HealthCheck::Unhealthy(UnhealthyReason::Maintenance);
        }
        match status {
            Ok(status) if status.accepts_orders() => HealthCheck::Healthy,
            Ok(status) => HealthCheck::Unhealthy(UnhealthyReason::Status(status)),
            Err(e) => HealthCheck::Unhealthy(UnhealthyReason::Unreachable(e)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthCheck::Healthy)
    }
}

/// Gate in front of every order submission
#[derive(Clone)]
pub struct HealthGate {
    client: Arc<dyn ExchangeClient>,
    retry_attempts: u32,
    retry_interval: Duration,
}

impl HealthGate {
    pub fn new(client: Arc<dyn ExchangeClient>, retry_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            client,
            retry_attempts,
            retry_interval,
        }
    }

    pub async fn check(&self) -> HealthCheck {
        let status = self.client.health().await.map_err(|e| e.to_string());
        let in_maintenance = self.client.is_maintenance_window(Utc::now());
        HealthCheck::evaluate(status, in_maintenance)
    }

    /// Block until the exchange is healthy, rechecking every retry interval.
    ///
    /// Gives up after `retry_attempts` rechecks; that is fatal because the
    /// caller is trying to flatten and cannot leave a position unmanaged.
    pub async fn wait_until_healthy(&self) -> Result<(), EngineError> {
        let mut check = self.check().await;
        if check.is_healthy() {
            return Ok(());
        }

        for attempt in 1..=self.retry_attempts {
            if let HealthCheck::Unhealthy(reason) = &check {
                tracing::warn!(
                    "Exchange unhealthy ({}), recheck {}/{} in {:?}",
                    reason,
                    attempt,
                    self.retry_attempts,
                    self.retry_interval
                );
            }
            sleep(self.retry_interval).await;

            check = self.check().await;
            if check.is_healthy() {
                tracing::info!("Exchange healthy again after {} rechecks", attempt);
                return Ok(());
            }
        }

        let status = match check {
            HealthCheck::Unhealthy(reason) => reason.to_string(),
            HealthCheck::Healthy => HealthStatus::Normal.to_string(),
        };
        Err(EngineError::ExchangeUnhealthy {
            attempts: self.retry_attempts,
            status,
        })
    }
}
