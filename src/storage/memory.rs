//! In-memory player store.
//!
//! Documents live in a `HashMap` behind an async lock; every write is
//! broadcast to that player's subscribers. Can be seeded from and flushed
//! to a JSON snapshot.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::{load_snapshot, save_snapshot, PersistenceStore, CHANGE_CHANNEL_CAPACITY};
use crate::types::{Player, PlayerPatch, RecordChange};

#[derive(Default)]
pub struct MemoryStore {
    players: RwLock<HashMap<String, Player>>,
    channels: Mutex<HashMap<String, broadcast::Sender<RecordChange>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with the given players.
    pub fn with_players(players: impl IntoIterator<Item = Player>) -> Self {
        let players = players.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            players: RwLock::new(players),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Load from a JSON snapshot, or start empty if the file is missing.
    pub fn from_snapshot(path: &str) -> Result<Self> {
        let players = load_snapshot(path)?.unwrap_or_default();
        Ok(Self::with_players(players.into_values()))
    }

    /// Write every record to a JSON snapshot.
    pub async fn save(&self, path: &str) -> Result<()> {
        let players = self.players.read().await;
        save_snapshot(&players, path)
    }

    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.players.read().await.is_empty()
    }

    fn sender(&self, player_id: &str) -> broadcast::Sender<RecordChange> {
        let mut channels = match self.channels.lock() {
            Ok(channels) => channels,
            Err(poisoned) => {
                tracing::warn!("Channel map lock poisoned; recovering");
                poisoned.into_inner()
            }
        };
        channels
            .entry(player_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
            .clone()
    }

    fn notify(&self, player_id: &str, change: RecordChange) {
        // No subscribers is fine.
        let _ = self.sender(player_id).send(change);
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn get(&self, player_id: &str) -> Result<Option<Player>> {
        Ok(self.players.read().await.get(player_id).cloned())
    }

    async fn put(&self, player: &Player) -> Result<()> {
        let mut players = self.players.write().await;
        players.insert(player.id.clone(), player.clone());
        debug!(player = %player.id, balance = %player.balance, "Player stored");
        // Notify under the write lock so changes go out in commit order.
        self.notify(&player.id, RecordChange::Updated(player.clone()));
        Ok(())
    }

    async fn merge(&self, player_id: &str, patch: &PlayerPatch) -> Result<()> {
        let mut players = self.players.write().await;
        let player = players
            .entry(player_id.to_string())
            .or_insert_with(|| Player::new(player_id, Default::default()));
        player.apply(patch);
        debug!(player = player_id, ?patch, "Player merged");
        self.notify(player_id, RecordChange::Updated(player.clone()));
        Ok(())
    }

    async fn remove(&self, player_id: &str) -> Result<()> {
        let mut players = self.players.write().await;
        if players.remove(player_id).is_some() {
            self.notify(player_id, RecordChange::Removed);
        }
        Ok(())
    }

    fn subscribe(&self, player_id: &str) -> broadcast::Receiver<RecordChange> {
        self.sender(player_id).subscribe()
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
