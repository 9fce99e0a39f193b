//! Persistence layer.
//!
//! Defines the `PersistenceStore` trait the round engine writes balances and
//! stats through, and provides implementations for:
//! - `MemoryStore`: in-process documents, optionally snapshotted to JSON
//! - `SqliteStore`: a SQLite table via `sqlx`
//!
//! Neither store serializes writers across processes: two clients playing
//! as the same player can overwrite each other's balance.

pub mod memory;
pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::types::{Player, PlayerPatch, RecordChange};

/// Capacity of each per-player change channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Abstraction over the remote document store holding player records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Fetch a player's record. `None` if the player does not exist.
    async fn get(&self, player_id: &str) -> Result<Option<Player>>;

    /// Create or replace a player's record.
    async fn put(&self, player: &Player) -> Result<()>;

    /// Apply a partial update. Merging into a missing record creates it.
    async fn merge(&self, player_id: &str, patch: &PlayerPatch) -> Result<()>;

    /// Delete a player's record.
    async fn remove(&self, player_id: &str) -> Result<()>;

    /// Receive every change to a player's record made after this call.
    fn subscribe(&self, player_id: &str) -> broadcast::Receiver<RecordChange>;

    /// Store name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// JSON snapshots
// ---------------------------------------------------------------------------

/// Save all player records to a JSON file.
pub fn save_snapshot(players: &HashMap<String, Player>, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(players).context("Failed to serialise players")?;

    std::fs::write(path, &json).context(format!("Failed to write snapshot to {path}"))?;

    debug!(path, players = players.len(), "Snapshot saved");
    Ok(())
}

/// Load player records from a JSON file.
/// Returns None if the file doesn't exist.
pub fn load_snapshot(path: &str) -> Result<Option<HashMap<String, Player>>> {
    if !Path::new(path).exists() {
        info!(path, "No snapshot found, starting empty");
        return Ok(None);
    }

    let json =
        std::fs::read_to_string(path).context(format!("Failed to read snapshot from {path}"))?;

    let players: HashMap<String, Player> =
        serde_json::from_str(&json).context(format!("Failed to parse snapshot from {path}"))?;

    info!(path, players = players.len(), "Snapshot loaded from disk");

    Ok(Some(players))
}

/// Delete a snapshot file (for testing or reset).
pub fn delete_snapshot(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete snapshot {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
