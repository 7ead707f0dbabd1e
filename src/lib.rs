// Core modules
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod models;
pub mod notify;
pub mod reporting;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use api::{BitflyerClient, ExchangeClient};
pub use config::{Settings, StrategyKind};
pub use engine::{Engine, StopReason};
pub use error::{ApiError, ConfigError, EngineError};
pub use models::*;
pub use notify::{LogNotifier, Notifier, SlackNotifier};
pub use strategy::Strategy;

// Error handling
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
