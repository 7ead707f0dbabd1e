use crate::error::ConfigError;
use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `FXBOT_EXCHANGE__API_SECRET`
const ENV_PREFIX: &str = "FXBOT";

/// Which decision engine to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Always in the market, trailing stop with doten on exit
    TrendFollow,
    /// Momentum entries from a short window, flat between trades
    Scalping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    #[serde(default)]
    pub notifier: NotifierSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub trend_follow: TrendFollowSettings,
    #[serde(default)]
    pub scalping: ScalpingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub product_code: String,
    /// Budget for signed (private) calls
    pub requests_per_minute: u32,
    /// Attempts on 5xx / transport errors
    pub max_retries: u32,
    pub retry_interval_ms: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.bitflyer.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            product_code: "FX_BTC_JPY".to_string(),
            requests_per_minute: 90,
            max_retries: 5,
            retry_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierSettings {
    /// Slack incoming webhook; notifications only go to the log when unset
    pub slack_webhook_url: Option<String>,
    pub username: String,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            slack_webhook_url: None,
            username: "fxbot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub strategy: StrategyKind,
    pub notify_interval_minutes: u64,
    pub flatten_on_shutdown: bool,
    pub health_retry_attempts: u32,
    pub health_retry_interval_secs: u64,
    /// Pause after the startup clear so the exchange reflects it
    pub settle_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Scalping,
            notify_interval_minutes: 60,
            flatten_on_shutdown: true,
            health_retry_attempts: 20,
            health_retry_interval_secs: 60,
            settle_seconds: 3,
        }
    }
}

impl EngineSettings {
    pub fn notify_interval(&self) -> Duration {
        Duration::from_secs(self.notify_interval_minutes * 60)
    }

    pub fn health_retry_interval(&self) -> Duration {
        Duration::from_secs(self.health_retry_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrendFollowSettings {
    pub spread_percentage: f64,
    pub trail_percentage: f64,
    pub loss_cut_percentage: f64,
    pub min_lot: f64,
}

impl Default for TrendFollowSettings {
    fn default() -> Self {
        Self {
            spread_percentage: 0.1,
            trail_percentage: 1.0,
            loss_cut_percentage: 1.0,
            min_lot: 0.001,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScalpingSettings {
    pub spread_percentage: f64,
    pub leverage: f64,
    pub loss_cut_percentage: f64,
    pub profit_take_percentage: f64,
    /// Window capacity, one sample per second
    pub judge_seconds: usize,
    pub count_judge_ratio: f64,
    pub direction_judge_percentage: f64,
    /// Timeout after which an open position is closed regardless of price
    pub close_seconds: i64,
    pub min_lot: f64,
}

impl Default for ScalpingSettings {
    fn default() -> Self {
        Self {
            spread_percentage: 0.02,
            leverage: 1.0,
            loss_cut_percentage: 0.1,
            profit_take_percentage: 0.1,
            judge_seconds: 10,
            count_judge_ratio: 0.6,
            direction_judge_percentage: 0.05,
            close_seconds: 60,
            min_lot: 0.01,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file layered with `FXBOT_*` environment overrides.
    ///
    /// The file is optional so a deployment can be configured from the
    /// environment alone.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file {} not found, using environment only", path.display());
        }

        let config = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(settings)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.api_key.is_empty() {
            return Err(ConfigError::invalid("exchange.api_key", "must be set"));
        }
        if self.exchange.api_secret.is_empty() {
            return Err(ConfigError::invalid("exchange.api_secret", "must be set"));
        }
        if self.exchange.product_code.is_empty() {
            return Err(ConfigError::invalid("exchange.product_code", "must be set"));
        }
        if self.exchange.requests_per_minute == 0 {
            return Err(ConfigError::invalid(
                "exchange.requests_per_minute",
                "must be greater than 0",
            ));
        }
        if self.exchange.max_retries == 0 {
            return Err(ConfigError::invalid("exchange.max_retries", "must be at least 1"));
        }
        if self.engine.notify_interval_minutes == 0 {
            return Err(ConfigError::invalid(
                "engine.notify_interval_minutes",
                "must be greater than 0",
            ));
        }
        if self.engine.health_retry_attempts == 0 {
            return Err(ConfigError::invalid(
                "engine.health_retry_attempts",
                "must be at least 1",
            ));
        }

        match self.engine.strategy {
            StrategyKind::TrendFollow => self.trend_follow.validate(),
            StrategyKind::Scalping => self.scalping.validate(),
        }
    }

    /// One-line parameter dump for the startup log (secrets redacted)
    pub fn summary(&self) -> String {
        let mut out = format!(
            "strategy:{:?} product:{} notifyInterval:{}m flattenOnShutdown:{}",
            self.engine.strategy,
            self.exchange.product_code,
            self.engine.notify_interval_minutes,
            self.engine.flatten_on_shutdown
        );
        match self.engine.strategy {
            StrategyKind::TrendFollow => {
                let t = &self.trend_follow;
                out.push_str(&format!(
                    " spread:{} trail:{} lossCut:{} minLot:{}",
                    t.spread_percentage, t.trail_percentage, t.loss_cut_percentage, t.min_lot
                ));
            }
            StrategyKind::Scalping => {
                let s = &self.scalping;
                out.push_str(&format!(
                    " spread:{} leverage:{} lossCut:{} profitTake:{} judgeSeconds:{} countRatio:{} directionPct:{} closeSeconds:{} minLot:{}",
                    s.spread_percentage,
                    s.leverage,
                    s.loss_cut_percentage,
                    s.profit_take_percentage,
                    s.judge_seconds,
                    s.count_judge_ratio,
                    s.direction_judge_percentage,
                    s.close_seconds,
                    s.min_lot
                ));
            }
        }
        out
    }
}

fn require_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(field, format!("must be >= 0, got {}", value)));
    }
    Ok(())
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(field, format!("must be > 0, got {}", value)));
    }
    Ok(())
}

impl TrendFollowSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_negative("trend_follow.spread_percentage", self.spread_percentage)?;
        require_positive("trend_follow.trail_percentage", self.trail_percentage)?;
        require_positive("trend_follow.loss_cut_percentage", self.loss_cut_percentage)?;
        require_positive("trend_follow.min_lot", self.min_lot)?;
        Ok(())
    }
}

impl ScalpingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_negative("scalping.spread_percentage", self.spread_percentage)?;
        require_positive("scalping.leverage", self.leverage)?;
        require_positive("scalping.loss_cut_percentage", self.loss_cut_percentage)?;
        require_positive("scalping.profit_take_percentage", self.profit_take_percentage)?;
        require_non_negative(
            "scalping.direction_judge_percentage",
            self.direction_judge_percentage,
        )?;
        require_positive("scalping.min_lot", self.min_lot)?;

        if self.judge_seconds < 2 {
            return Err(ConfigError::invalid(
                "scalping.judge_seconds",
                "window needs at least 2 samples",
            ));
        }
        if !(0.0..=1.0).contains(&self.count_judge_ratio) {
            return Err(ConfigError::invalid(
                "scalping.count_judge_ratio",
                format!("must be within [0, 1], got {}", self.count_judge_ratio),
            ));
        }
        if self.close_seconds <= 0 {
            return Err(ConfigError::invalid(
                "scalping.close_seconds",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
