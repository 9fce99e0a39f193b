//! Store double for integration testing.
//!
//! Wraps a `MemoryStore` and can be told to fail every read and write, so
//! tests can drive the engine through persistence outages. Also records
//! every patch the engine merges.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use keno::storage::memory::MemoryStore;
use keno::storage::PersistenceStore;
use keno::types::{Player, PlayerPatch, RecordChange};

pub struct FlakyStore {
    inner: MemoryStore,
    /// If set, reads and writes return this error.
    force_error: Arc<Mutex<Option<String>>>,
    merges: Arc<Mutex<Vec<(String, PlayerPatch)>>>,
}

impl FlakyStore {
    pub fn with_players(players: impl IntoIterator<Item = Player>) -> Self {
        Self {
            inner: MemoryStore::with_players(players),
            force_error: Arc::new(Mutex::new(None)),
            merges: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Force all subsequent reads and writes to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Patches that reached the underlying store, in order.
    pub fn merges(&self) -> Vec<(String, PlayerPatch)> {
        self.merges.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PersistenceStore for FlakyStore {
    async fn get(&self, player_id: &str) -> Result<Option<Player>> {
        self.check()?;
        self.inner.get(player_id).await
    }

    async fn put(&self, player: &Player) -> Result<()> {
        self.check()?;
        self.inner.put(player).await
    }

    async fn merge(&self, player_id: &str, patch: &PlayerPatch) -> Result<()> {
        self.check()?;
        self.merges
            .lock()
            .unwrap()
            .push((player_id.to_string(), patch.clone()));
        self.inner.merge(player_id, patch).await
    }

    async fn remove(&self, player_id: &str) -> Result<()> {
        self.check()?;
        self.inner.remove(player_id).await
    }

    fn subscribe(&self, player_id: &str) -> broadcast::Receiver<RecordChange> {
        self.inner.subscribe(player_id)
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
