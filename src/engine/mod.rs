//! Core engine — cascade deployment and position monitoring.
//!
//! `BotController` owns the exchange client, the shared portfolio state,
//! and the lifecycle of the background trading task. The HTTP control
//! plane calls `start`/`stop`; the spawned task runs the cascade executor
//! once and then the monitor loop until stopped or an emergency fires.

pub mod cascade;
pub mod monitor;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::exchange::MarginExchange;
use crate::storage::{self, BotSnapshot};
use crate::strategy::ranking::{self, RankedAsset};
use crate::strategy::risk::RiskPolicy;
use crate::types::{AssetProfile, BotError, BotStatus, CapitalLedger, Position};

use self::cascade::CascadeExecutor;
use self::monitor::{MonitorOutcome, MonitorSettings};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Knobs controlling one cascade run, derived from `[bot]` config.
#[derive(Debug, Clone)]
pub struct CascadeSettings {
    pub quote_asset: String,
    pub max_levels: u32,
    pub capital_floor: Decimal,
    pub position_fraction: Decimal,
    pub borrow_utilization: Decimal,
    pub ltv_safety_factor: Decimal,
    pub level_pause: Duration,
}

impl CascadeSettings {
    pub fn from_config(cfg: &BotConfig) -> Self {
        Self {
            quote_asset: cfg.quote_asset.clone(),
            max_levels: cfg.max_cascade_levels,
            capital_floor: cfg.capital_floor,
            position_fraction: cfg.position_fraction,
            borrow_utilization: cfg.borrow_utilization,
            ltv_safety_factor: cfg.ltv_safety_factor,
            level_pause: Duration::from_secs(cfg.level_pause_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared portfolio state
// ---------------------------------------------------------------------------

/// Portfolio state shared between the trading task and the HTTP handlers.
///
/// All mutation goes through the `RwLock`s; the original unsynchronized
/// sharing between server and trading threads is a bug class this layout
/// exists to close.
pub struct PortfolioState {
    pub status: RwLock<BotStatus>,
    pub positions: RwLock<Vec<Position>>,
    pub ledger: RwLock<CapitalLedger>,
    pub last_update: RwLock<DateTime<Utc>>,
}

impl PortfolioState {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(BotStatus::Idle),
            positions: RwLock::new(Vec::new()),
            ledger: RwLock::new(CapitalLedger::default()),
            last_update: RwLock::new(Utc::now()),
        }
    }

    /// Restore from a persisted snapshot. A snapshot that was `Running`
    /// comes back as `Stopped` — the task it belonged to is gone.
    pub async fn restore(&self, snapshot: BotSnapshot) {
        let status = if snapshot.status.is_active() {
            BotStatus::Stopped
        } else {
            snapshot.status
        };
        *self.status.write().await = status;
        *self.positions.write().await = snapshot.positions;
        *self.ledger.write().await = snapshot.ledger;
        *self.last_update.write().await = Utc::now();
    }

    /// Current state as a persistable snapshot.
    pub async fn to_snapshot(&self) -> BotSnapshot {
        BotSnapshot {
            status: *self.status.read().await,
            positions: self.positions.read().await.clone(),
            ledger: self.ledger.read().await.clone(),
            saved_at: Utc::now(),
        }
    }

    pub async fn set_status(&self, status: BotStatus) {
        *self.status.write().await = status;
        *self.last_update.write().await = Utc::now();
    }

    pub async fn touch(&self) {
        *self.last_update.write().await = Utc::now();
    }
}

impl Default for PortfolioState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns the trading lifecycle: validates start requests, spawns the
/// cascade + monitor task, and relays stop signals to it.
pub struct BotController {
    exchange: Arc<dyn MarginExchange>,
    settings: CascadeSettings,
    policy: RiskPolicy,
    monitor_settings: MonitorSettings,
    catalog: Vec<AssetProfile>,
    state: Arc<PortfolioState>,
    state_file: String,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl BotController {
    pub fn new(
        exchange: Arc<dyn MarginExchange>,
        settings: CascadeSettings,
        policy: RiskPolicy,
        monitor_settings: MonitorSettings,
        catalog: Vec<AssetProfile>,
        state: Arc<PortfolioState>,
        state_file: String,
    ) -> Self {
        Self {
            exchange,
            settings,
            policy,
            monitor_settings,
            catalog,
            state,
            state_file,
            stop_tx: Mutex::new(None),
        }
    }

    pub fn state(&self) -> Arc<PortfolioState> {
        Arc::clone(&self.state)
    }

    pub fn exchange(&self) -> Arc<dyn MarginExchange> {
        Arc::clone(&self.exchange)
    }

    /// Configured assets with their ranking scores, best first.
    pub fn ranked_catalog(&self) -> Vec<RankedAsset> {
        ranking::rank(&self.catalog)
    }

    /// Validate a start request and spawn the trading task.
    ///
    /// Returns as soon as the task is spawned; progress is observed via
    /// the shared state (`GET /status`).
    pub async fn start(&self, capital: Decimal) -> Result<(), BotError> {
        self.policy.validate_capital(capital)?;

        // The sender slot doubles as a start mutex: held across the whole
        // validation window so two concurrent starts cannot both pass the
        // status check while the account round-trip is in flight.
        let mut stop_slot = self.stop_tx.lock().await;

        if !self.state.status.read().await.can_start() {
            return Err(BotError::AlreadyRunning);
        }

        // Verify connectivity and quote balance before committing.
        let account = self
            .exchange
            .account()
            .await
            .map_err(|e| BotError::Exchange(e.to_string()))?;
        let available = account.free_balance(&self.settings.quote_asset);
        if available < capital {
            return Err(BotError::InsufficientBalance {
                asset: self.settings.quote_asset.clone(),
                needed: capital,
                available,
            });
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *stop_slot = Some(stop_tx);

        self.state.set_status(BotStatus::Running).await;
        // Positions restored from an old snapshot are display-only; a fresh
        // cascade starts from a clean book.
        self.state.positions.write().await.clear();
        {
            let mut ledger = self.state.ledger.write().await;
            ledger.total_capital = capital;
            ledger.leveraged_capital = Decimal::ZERO;
            ledger.started_at = Some(Utc::now());
        }

        info!(%capital, quote = %self.settings.quote_asset, "Starting cascade deployment");

        let task = TradingTask {
            exchange: Arc::clone(&self.exchange),
            settings: self.settings.clone(),
            policy: self.policy.clone(),
            monitor_settings: self.monitor_settings.clone(),
            ranked: self.ranked_catalog(),
            state: Arc::clone(&self.state),
            state_file: self.state_file.clone(),
        };
        tokio::spawn(async move {
            task.run(capital, stop_rx).await;
        });

        Ok(())
    }

    /// Signal the trading task to stop gracefully. The task unwinds all
    /// positions on its way out. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let status = *self.state.status.read().await;
        if !status.is_active() {
            return false;
        }

        self.state.set_status(BotStatus::Stopping).await;
        if let Some(tx) = self.stop_tx.lock().await.as_ref() {
            let _ = tx.send(true);
            info!("Stop requested — positions will be unwound");
            true
        } else {
            warn!("Stop requested but no trading task is registered");
            false
        }
    }
}

/// Everything the background trading task owns, cloned off the controller
/// so the spawned future is `'static`.
struct TradingTask {
    exchange: Arc<dyn MarginExchange>,
    settings: CascadeSettings,
    policy: RiskPolicy,
    monitor_settings: MonitorSettings,
    ranked: Vec<RankedAsset>,
    state: Arc<PortfolioState>,
    state_file: String,
}

impl TradingTask {
    /// Deploy the cascade, then monitor until stopped or an emergency.
    async fn run(self, capital: Decimal, stop_rx: watch::Receiver<bool>) {
        let executor = CascadeExecutor::new(self.exchange.as_ref(), &self.settings);
        let report = executor.run(capital, &self.ranked, &self.state).await;
        info!(%report, "Cascade deployment finished");

        self.persist().await;

        if self.state.positions.read().await.is_empty() {
            warn!("No positions opened, nothing to monitor");
            self.state.set_status(BotStatus::Stopped).await;
            self.persist().await;
            return;
        }

        let outcome = monitor::run(
            self.exchange.as_ref(),
            &self.policy,
            &self.state,
            &self.monitor_settings,
            &self.state_file,
            stop_rx,
        )
        .await;

        let final_status = match outcome {
            MonitorOutcome::Stopped => BotStatus::Stopped,
            MonitorOutcome::Emergency => BotStatus::EmergencyStopped,
        };
        self.state.set_status(final_status).await;
        self.persist().await;
        info!(status = %final_status, "Trading task exited");
    }

    /// Best-effort snapshot write; persistence failure never kills trading.
    async fn persist(&self) {
        let snapshot = self.state.to_snapshot().await;
        if let Err(e) = storage::save_snapshot(&snapshot, &self.state_file) {
            error!(error = %e, "Failed to save snapshot");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
