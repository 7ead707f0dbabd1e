use anyhow::Context;
use clap::Parser;
use fxbot::{BitflyerClient, Engine, ExchangeClient, LogNotifier, Notifier, Settings, SlackNotifier, StrategyKind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "fxbot=info";

#[derive(Debug, Parser)]
#[command(name = "fxbot", about = "Autonomous single-instrument trading agent")]
struct Args {
    /// Settings file (TOML), layered under FXBOT_* environment variables
    #[arg(long, default_value = "config/bot.toml")]
    config: PathBuf,

    /// Override the configured strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyKind>,

    /// tracing filter, e.g. "fxbot=debug,price_direction=debug"
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    setup_logging(args.log_filter.as_deref());

    tracing::info!("🚀 fxbot starting");

    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    if let Some(strategy) = args.strategy {
        settings.engine.strategy = strategy;
    }
    settings.validate().context("Invalid settings")?;
    tracing::info!("Params {}", settings.summary());

    let client: Arc<dyn ExchangeClient> = Arc::new(
        BitflyerClient::new(&settings.exchange).context("Failed to build exchange client")?,
    );
    let notifier: Arc<dyn Notifier> = match &settings.notifier.slack_webhook_url {
        Some(url) if !url.is_empty() => {
            tracing::info!("Notifications go to Slack as {}", settings.notifier.username);
            Arc::new(SlackNotifier::new(url.clone(), settings.notifier.username.clone()))
        }
        _ => {
            tracing::info!("No Slack webhook configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    };

    notifier.send_text("LOGIC START!");

    let engine = Engine::new(&settings, client, notifier);
    match engine.run(shutdown_signal()).await {
        Ok(reason) => {
            tracing::info!("👋 Stopped ({:?})", reason);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Engine stopped on fatal error: {}", e);
            Err(e.into())
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn setup_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("⚠️  Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("⚠️  Received SIGTERM, shutting down..."),
    }
}
