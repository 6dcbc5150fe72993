//! CASCADE — automated cascade-leverage bot for Binance margin.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores any persisted portfolio snapshot, verifies exchange
//! connectivity, and serves the HTTP control plane until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use cascade::config;
use cascade::engine::monitor::MonitorSettings;
use cascade::engine::{BotController, CascadeSettings, PortfolioState};
use cascade::exchange::binance::BinanceClient;
use cascade::exchange::MarginExchange;
use cascade::server;
use cascade::storage;
use cascade::strategy::ranking;
use cascade::strategy::risk::RiskPolicy;

const BANNER: &str = r#"
   ____    _    ____   ____    _    ____  _____
  / ___|  / \  / ___| / ___|  / \  |  _ \| ____|
 | |     / _ \ \___ \| |     / _ \ | | | |  _|
 | |___ / ___ \ ___) | |___ / ___ \| |_| | |___
  \____/_/   \_\____/ \____/_/   \_\____/|_____|

  Cascade-Leverage Margin Bot
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        bot_name = %cfg.bot.name,
        quote = %cfg.bot.quote_asset,
        max_levels = cfg.bot.max_cascade_levels,
        monitor_interval_secs = cfg.bot.monitor_interval_secs,
        "CASCADE starting up"
    );

    // -- Restore persisted state ------------------------------------------

    let state = Arc::new(PortfolioState::new());
    match storage::load_snapshot(&cfg.storage.state_file) {
        Ok(Some(snapshot)) => {
            if !snapshot.positions.is_empty() {
                warn!(
                    positions = snapshot.positions.len(),
                    "Previous run left open positions. They are restored for \
                     visibility but are NOT monitored until a new start."
                );
            }
            state.restore(snapshot).await;
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Could not restore snapshot, starting fresh"),
    }

    // -- Exchange client ---------------------------------------------------

    let exchange: Arc<dyn MarginExchange> = Arc::new(BinanceClient::from_config(&cfg.exchange)?);
    match exchange.ping().await {
        Ok(()) => info!(exchange = exchange.name(), "Exchange connectivity verified"),
        Err(e) => warn!(error = %e, "Exchange ping failed; continuing, orders will retry"),
    }

    // -- Controller --------------------------------------------------------

    let controller = Arc::new(BotController::new(
        Arc::clone(&exchange),
        CascadeSettings::from_config(&cfg.bot),
        RiskPolicy::from_config(&cfg.risk),
        MonitorSettings {
            interval: Duration::from_secs(cfg.bot.monitor_interval_secs),
            error_backoff: Duration::from_secs(cfg.bot.error_backoff_secs),
        },
        ranking::default_catalog(),
        Arc::clone(&state),
        cfg.storage.state_file.clone(),
    ));

    // -- Control plane -----------------------------------------------------

    // PORT env overrides the config (container orchestrators set it).
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(cfg.server.port);

    if cfg.server.enabled {
        let server_controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if let Err(e) = server::serve(server_controller, port).await {
                error!(error = %e, "Control plane exited");
            }
        });
    } else {
        warn!("Control plane disabled; only a pre-existing cascade would run");
    }

    // -- Shutdown ----------------------------------------------------------

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if controller.stop().await {
        // Give the trading task a moment to unwind positions.
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    let snapshot = state.to_snapshot().await;
    storage::save_snapshot(&snapshot, &cfg.storage.state_file)?;
    info!(
        positions = snapshot.positions.len(),
        status = %snapshot.status,
        "CASCADE shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cascade=info"));

    let json_logging = std::env::var("CASCADE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
