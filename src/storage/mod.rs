//! Persistence layer.
//!
//! Saves and loads a portfolio snapshot to/from a JSON file so that a
//! restarted process is aware of positions opened by a previous run. The
//! snapshot is written after every monitor pass and on shutdown.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::types::{BotStatus, CapitalLedger, Position};

/// Default snapshot file path.
pub const DEFAULT_STATE_FILE: &str = "cascade_state.json";

/// Everything needed to resume awareness of an open portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub status: BotStatus,
    pub positions: Vec<Position>,
    pub ledger: CapitalLedger,
    pub saved_at: DateTime<Utc>,
}

impl BotSnapshot {
    /// An empty snapshot for a fresh start.
    pub fn empty() -> Self {
        Self {
            status: BotStatus::Idle,
            positions: Vec::new(),
            ledger: CapitalLedger::default(),
            saved_at: Utc::now(),
        }
    }
}

/// Save a snapshot to a JSON file.
pub fn save_snapshot(snapshot: &BotSnapshot, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)
        .context("Failed to serialise portfolio snapshot")?;

    std::fs::write(path, &json).context(format!("Failed to write snapshot to {path}"))?;

    debug!(
        path,
        positions = snapshot.positions.len(),
        "Snapshot saved"
    );
    Ok(())
}

/// Load a snapshot from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_snapshot(path: &str) -> Result<Option<BotSnapshot>> {
    if !Path::new(path).exists() {
        info!(path, "No saved snapshot found, starting fresh");
        return Ok(None);
    }

    let json =
        std::fs::read_to_string(path).context(format!("Failed to read snapshot from {path}"))?;

    let snapshot: BotSnapshot =
        serde_json::from_str(&json).context(format!("Failed to parse snapshot from {path}"))?;

    info!(
        path,
        positions = snapshot.positions.len(),
        total_capital = %snapshot.ledger.total_capital,
        "Snapshot loaded from disk"
    );

    Ok(Some(snapshot))
}

/// Delete the snapshot file (for testing or reset).
pub fn delete_snapshot(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete snapshot file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
