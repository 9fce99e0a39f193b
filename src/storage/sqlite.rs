//! SQLite player store.
//!
//! One row per player. Balances are stored as exact decimal strings.
//! Change notifications reach subscribers in this process only.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{PersistenceStore, CHANGE_CHANNEL_CAPACITY};
use crate::types::{Player, PlayerPatch, RecordChange};

type PlayerRow = (String, String, i64, i64);

pub struct SqliteStore {
    pool: SqlitePool,
    channels: Mutex<HashMap<String, broadcast::Sender<RecordChange>>>,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://keno.db?mode=rwc`) and create the
    /// players table if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        // Every connection to `:memory:` is a separate database, so keep
        // exactly one and never let it expire.
        let options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options
            .connect(url)
            .await
            .with_context(|| format!("Failed to open SQLite database: {url}"))?;

        let store = Self {
            pool,
            channels: Mutex::new(HashMap::new()),
        };
        store.migrate().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    /// A private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS players (
                    id           TEXT PRIMARY KEY,
                    balance      TEXT NOT NULL,
                    games_played INTEGER NOT NULL DEFAULT 0,
                    games_won    INTEGER NOT NULL DEFAULT 0
                )"#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create players table")?;
        Ok(())
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
        let _ = self.sender(player_id).send(change);
    }
}

fn from_row((id, balance, games_played, games_won): PlayerRow) -> Result<Player> {
    let balance = Decimal::from_str(&balance)
        .with_context(|| format!("Corrupt balance {balance:?} for player {id}"))?;
    Ok(Player {
        id,
        balance,
        games_played: u64::try_from(games_played).unwrap_or(0),
        games_won: u64::try_from(games_won).unwrap_or(0),
    })
}

const SELECT_PLAYER: &str = r#"
    SELECT id, balance, games_played, games_won
    FROM   players
    WHERE  id = ?1"#;

const UPSERT_PLAYER: &str = r#"
    INSERT INTO players (id, balance, games_played, games_won)
    VALUES              (?1, ?2, ?3, ?4)
    ON CONFLICT         (id)
    DO UPDATE SET       balance = ?2, games_played = ?3, games_won = ?4"#;

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn get(&self, player_id: &str) -> Result<Option<Player>> {
        let row = sqlx::query_as::<_, PlayerRow>(SELECT_PLAYER)
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read player {player_id}"))?;
        row.map(from_row).transpose()
    }

    async fn put(&self, player: &Player) -> Result<()> {
        sqlx::query(UPSERT_PLAYER)
            .bind(&player.id)
            .bind(player.balance.to_string())
            .bind(player.games_played as i64)
            .bind(player.games_won as i64)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to write player {}", player.id))?;
        debug!(player = %player.id, balance = %player.balance, "Player stored");
        self.notify(&player.id, RecordChange::Updated(player.clone()));
        Ok(())
    }

    async fn merge(&self, player_id: &str, patch: &PlayerPatch) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin merge")?;

        let existing = sqlx::query_as::<_, PlayerRow>(SELECT_PLAYER)
            .bind(player_id)
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("Failed to read player {player_id}"))?;
        let mut player = match existing {
            Some(row) => from_row(row)?,
            None => Player::new(player_id, Decimal::ZERO),
        };
        player.apply(patch);

        sqlx::query(UPSERT_PLAYER)
            .bind(&player.id)
            .bind(player.balance.to_string())
            .bind(player.games_played as i64)
            .bind(player.games_won as i64)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to merge player {player_id}"))?;
        tx.commit().await.context("Failed to commit merge")?;

        debug!(player = player_id, ?patch, "Player merged");
        self.notify(player_id, RecordChange::Updated(player));
        Ok(())
    }

    async fn remove(&self, player_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM players WHERE id = ?1")
            .bind(player_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete player {player_id}"))?;
        if result.rows_affected() > 0 {
            self.notify(player_id, RecordChange::Removed);
        }
        Ok(())
    }

    fn subscribe(&self, player_id: &str) -> broadcast::Receiver<RecordChange> {
        self.sender(player_id).subscribe()
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_get_missing() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_and_get_keeps_exact_balance() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut player = Player::new("alice", dec!(0.10) + dec!(0.20));
        player.games_played = 4;
        player.games_won = 1;
        store.put(&player).await.unwrap();

        let loaded = store.get("alice").await.unwrap().unwrap();
        assert_eq!(loaded.balance, dec!(0.30));
        assert_eq!(loaded, player);
    }

    #[tokio::test]
    async fn test_merge_partial_and_create() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .merge("bob", &PlayerPatch::balance(dec!(12.34)))
            .await
            .unwrap();
        store.merge("bob", &PlayerPatch::stats(2, 1)).await.unwrap();

        let bob = store.get("bob").await.unwrap().unwrap();
        assert_eq!(bob.balance, dec!(12.34));
        assert_eq!(bob.games_played, 2);
        assert_eq!(bob.games_won, 1);
    }

    #[tokio::test]
    async fn test_merge_notifies_subscribers() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put(&Player::new("carol", dec!(3))).await.unwrap();
        let mut rx = store.subscribe("carol");

        store
            .merge("carol", &PlayerPatch::balance(dec!(1)))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            RecordChange::Updated(p) => assert_eq!(p.balance, dec!(1)),
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put(&Player::new("dave", dec!(3))).await.unwrap();
        let mut rx = store.subscribe("dave");

        store.remove("dave").await.unwrap();
        assert!(store.get("dave").await.unwrap().is_none());
        assert_eq!(rx.recv().await.unwrap(), RecordChange::Removed);

        // Removing again is a quiet no-op.
        store.remove("dave").await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
