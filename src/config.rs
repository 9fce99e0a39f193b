//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs, then
//! validates it into the engine's `GameRules` and `PayoutTable`. Every
//! section has defaults, so a minimal file only needs what differs.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::round::GameRules;
use crate::payout::PayoutTable;
use crate::types::KenoError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub game: GameConfig,
    pub timing: TimingConfig,
    pub player: PlayerConfig,
    pub store: StoreConfig,
    pub dashboard: DashboardConfig,
    pub autoplay: AutoplayConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GameConfig {
    pub total_numbers: u8,
    pub draw_count: u8,
    pub max_selections: u8,
    pub default_bet: Decimal,
    pub min_bet: Decimal,
    /// Multipliers indexed by match count.
    pub payouts: Vec<Decimal>,
    /// Fixed RNG seed for reproducible draws.
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            total_numbers: 40,
            draw_count: 10,
            max_selections: 10,
            default_bet: dec!(1.00),
            min_bet: dec!(0.10),
            payouts: PayoutTable::default().multipliers().to_vec(),
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause after every drawn number.
    pub draw_delay_ms: u64,
    /// Extra pause after a hit.
    pub hit_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            draw_delay_ms: 500,
            hit_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlayerConfig {
    pub id: String,
    /// Balance to create the player with when the store has no record.
    pub seed_balance: Option<Decimal>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            id: "player".to_string(),
            seed_balance: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// JSON snapshot for the memory backend, loaded at start and saved on
    /// shutdown.
    pub snapshot_path: Option<String>,
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            snapshot_path: None,
            database_url: "sqlite://keno.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AutoplayConfig {
    /// Rounds to play at startup (0 = none).
    pub rounds: u32,
    pub picks: Vec<u8>,
    /// Bet per round; the game's default bet if unset.
    pub bet: Option<Decimal>,
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), KenoError> {
        let g = &self.game;
        if g.total_numbers == 0 {
            return Err(KenoError::Config("total_numbers must be at least 1".into()));
        }
        if g.draw_count == 0 || g.draw_count > g.total_numbers {
            return Err(KenoError::Config(format!(
                "draw_count must be in 1..={}, got {}",
                g.total_numbers, g.draw_count
            )));
        }
        if g.max_selections == 0 || g.max_selections > g.total_numbers {
            return Err(KenoError::Config(format!(
                "max_selections must be in 1..={}, got {}",
                g.total_numbers, g.max_selections
            )));
        }
        if g.min_bet <= Decimal::ZERO {
            return Err(KenoError::Config("min_bet must be positive".into()));
        }
        if g.default_bet < g.min_bet {
            return Err(KenoError::Config(format!(
                "default_bet {} is below min_bet {}",
                g.default_bet, g.min_bet
            )));
        }
        self.payout_table()?;

        if let Some(bad) = self
            .autoplay
            .picks
            .iter()
            .find(|n| **n == 0 || **n > g.total_numbers)
        {
            return Err(KenoError::Config(format!(
                "autoplay pick {bad} is not on the board"
            )));
        }
        if self.player.id.is_empty() {
            return Err(KenoError::Config("player.id must not be empty".into()));
        }
        Ok(())
    }

    /// Engine rules from the `[game]` and `[timing]` sections.
    pub fn rules(&self) -> GameRules {
        GameRules {
            total_numbers: self.game.total_numbers,
            draw_count: self.game.draw_count,
            max_selections: self.game.max_selections,
            min_bet: self.game.min_bet,
            default_bet: self.game.default_bet,
            draw_delay: Duration::from_millis(self.timing.draw_delay_ms),
            hit_delay: Duration::from_millis(self.timing.hit_delay_ms),
        }
    }

    pub fn payout_table(&self) -> Result<PayoutTable, KenoError> {
        PayoutTable::new(self.game.payouts.clone())
    }
}
