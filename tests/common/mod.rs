#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxbot::execution::OrderExecutor;
use fxbot::risk::HealthGate;
use fxbot::*;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Scriptable in-memory exchange
pub struct FakeExchange {
    state: Mutex<FakeState>,
}

pub struct FakeState {
    /// `None` makes the board unavailable
    pub mid: Option<i64>,
    pub last_execution: Option<i64>,
    pub health: HealthStatus,
    /// Consumed before falling back to `health`
    pub health_script: VecDeque<HealthStatus>,
    pub health_calls: usize,
    pub maintenance: bool,
    /// Signed net position: positive long, negative short
    pub net_position: Decimal,
    pub positions_available: bool,
    pub collateral: Collateral,
    pub reject_orders: bool,
    /// Accepted orders change `net_position`
    pub fill_orders: bool,
    pub orders: Vec<OrderRequest>,
}

impl FakeExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                mid: Some(5_000_000),
                last_execution: Some(5_000_000),
                health: HealthStatus::Normal,
                health_script: VecDeque::new(),
                health_calls: 0,
                maintenance: false,
                net_position: Decimal::ZERO,
                positions_available: true,
                collateral: Collateral {
                    evaluated_amount: 1_000_000,
                    open_position_pnl: 0,
                },
                reject_orders: false,
                fill_orders: true,
                orders: Vec::new(),
            }),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_mid(&self, mid: Option<i64>) {
        self.with(|s| s.mid = mid);
    }

    pub fn set_health(&self, health: HealthStatus) {
        self.with(|s| s.health = health);
    }

    pub fn hold(&self, side: Side, size: &str) {
        let size = dec(size);
        self.with(|s| {
            s.net_position = match side {
                Side::Long => size,
                Side::Short => -size,
            }
        });
    }

    pub fn net_position(&self) -> Decimal {
        self.with(|s| s.net_position)
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.with(|s| s.orders.clone())
    }

    pub fn health_calls(&self) -> usize {
        self.with(|s| s.health_calls)
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn mid_price(&self) -> Result<i64, ApiError> {
        self.with(|s| s.mid).ok_or(ApiError::Empty("board"))
    }

    async fn last_execution_price(&self) -> Result<i64, ApiError> {
        self.with(|s| s.last_execution)
            .ok_or(ApiError::Empty("executions"))
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>, ApiError> {
        self.with(|s| {
            if !s.positions_available {
                return Err(ApiError::Status {
                    status: 500,
                    body: "positions down".to_string(),
                });
            }
            let net = s.net_position;
            let positions = if net.is_zero() {
                Vec::new()
            } else if net.is_sign_positive() {
                vec![ExchangePosition {
                    side: Side::Long,
                    size: net,
                }]
            } else {
                vec![ExchangePosition {
                    side: Side::Short,
                    size: -net,
                }]
            };
            Ok(positions)
        })
    }

    async fn collateral(&self) -> Result<Collateral, ApiError> {
        Ok(self.with(|s| s.collateral))
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAcceptance, ApiError> {
        self.with(|s| {
            s.orders.push(order.clone());
            if s.reject_orders {
                return Err(ApiError::Status {
                    status: 400,
                    body: "rejected".to_string(),
                });
            }
            if s.fill_orders {
                match order.side {
                    Side::Long => s.net_position += order.size,
                    Side::Short => s.net_position -= order.size,
                }
            }
            Ok(OrderAcceptance {
                acceptance_id: format!("JRF{}", s.orders.len()),
            })
        })
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        Ok(self.with(|s| {
            s.health_calls += 1;
            s.health_script
                .pop_front()
                .unwrap_or_else(|| s.health.clone())
        }))
    }

    fn is_maintenance_window(&self, _now: DateTime<Utc>) -> bool {
        self.with(|s| s.maintenance)
    }
}

/// Keeps every notification for assertions
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

impl Notifier for RecordingNotifier {
    fn send_text(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Executor over the fake with a short health retry
pub fn executor(fake: &Arc<FakeExchange>, notifier: &Arc<RecordingNotifier>) -> Arc<OrderExecutor> {
    let client: Arc<dyn ExchangeClient> = fake.clone();
    let health = HealthGate::new(client.clone(), 3, Duration::from_millis(1));
    Arc::new(OrderExecutor::new(client, notifier.clone(), health))
}

pub fn sample(price: i64, previous: Option<i64>) -> PriceSample {
    PriceSample {
        price,
        direction: Direction::between(previous, price),
        observed_at: Utc::now(),
        stale: false,
    }
}

/// Samples for `prices`, directions chained from one to the next
pub fn samples(prices: &[i64]) -> Vec<PriceSample> {
    let mut previous = None;
    prices
        .iter()
        .map(|&price| {
            let s = sample(price, previous);
            previous = Some(price);
            s
        })
        .collect()
}
