//! Shared types for the keno engine.
//!
//! These types form the data model used across all modules.
//! They are kept free of engine and storage logic so that the payout,
//! engine, storage, and dashboard modules can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// A player's record as held by the persistence store.
///
/// The engine keeps a cached copy for the duration of a session and is the
/// only local writer of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub balance: Decimal,
    #[serde(default)]
    pub games_played: u64,
    #[serde(default)]
    pub games_won: u64,
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | balance=${:.2} | played={} won={} | win_rate={:.1}%",
            self.id,
            self.balance,
            self.games_played,
            self.games_won,
            self.win_rate(),
        )
    }
}

impl Player {
    /// Create a player with the given balance and no games played.
    pub fn new(id: impl Into<String>, balance: Decimal) -> Self {
        Self {
            id: id.into(),
            balance,
            games_played: 0,
            games_won: 0,
        }
    }

    /// Win rate as a percentage. A player with no games reports 0.0.
    pub fn win_rate(&self) -> f64 {
        (self.games_won as f64 / self.games_played.max(1) as f64) * 100.0
    }

    /// Apply a partial update in place. Absent fields are left untouched.
    pub fn apply(&mut self, patch: &PlayerPatch) {
        if let Some(balance) = patch.balance {
            self.balance = balance;
        }
        if let Some(played) = patch.games_played {
            self.games_played = played;
        }
        if let Some(won) = patch.games_won {
            self.games_won = won;
        }
    }
}

/// A partial update for `PersistenceStore::merge`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub games_played: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub games_won: Option<u64>,
}

impl PlayerPatch {
    pub fn balance(balance: Decimal) -> Self {
        Self {
            balance: Some(balance),
            ..Default::default()
        }
    }

    pub fn stats(games_played: u64, games_won: u64) -> Self {
        Self {
            games_played: Some(games_played),
            games_won: Some(games_won),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.balance.is_none() && self.games_played.is_none() && self.games_won.is_none()
    }
}

/// A change to a player's record, delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordChange {
    Updated(Player),
    Removed,
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// Lifecycle of the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundState {
    /// Nothing selected.
    Idle,
    /// At least one number selected, no round running.
    Selecting,
    /// Bet placed, numbers being drawn.
    Active,
    /// Draw complete and paid out.
    Settled,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Idle => write!(f, "Idle"),
            RoundState::Selecting => write!(f, "Selecting"),
            RoundState::Active => write!(f, "Active"),
            RoundState::Settled => write!(f, "Settled"),
        }
    }
}

/// One step of the draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawnNumber {
    pub number: u8,
    pub is_hit: bool,
    /// Zero-based position in the draw.
    pub sequence_index: usize,
}

/// The settled result of a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round_id: Uuid,
    pub selection: Vec<u8>,
    /// Drawn numbers in draw order.
    pub drawn: Vec<u8>,
    pub bet: Decimal,
    pub matches: usize,
    pub multiplier: Decimal,
    pub payout: Decimal,
    pub is_win: bool,
    pub balance_after: Decimal,
    /// False if any balance or stats write for this round failed.
    pub persisted: bool,
    pub settled_at: DateTime<Utc>,
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} | picks={} matches={} x{} | bet=${:.2} | balance=${:.2}",
            self.banner(),
            self.amount_label(),
            self.selection.len(),
            self.matches,
            self.multiplier.normalize(),
            self.bet,
            self.balance_after,
        )
    }
}

impl RoundOutcome {
    /// Result banner text.
    pub fn banner(&self) -> &'static str {
        if self.is_win {
            "Winner!"
        } else {
            "Try Again!"
        }
    }

    /// Signed payout label, e.g. `+$2.00` or `-$0.00`.
    pub fn amount_label(&self) -> String {
        let sign = if self.is_win { '+' } else { '-' };
        format!("{sign}${:.2}", self.payout)
    }

    /// Net change to the balance over the round (payout minus bet).
    pub fn net(&self) -> Decimal {
        self.payout - self.bet
    }
}

/// Point-in-time view of the engine, for readers that must not wait on a
/// running round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub player: Player,
    pub state: RoundState,
    pub selection: Vec<u8>,
    pub drawn: Vec<u8>,
    pub bet_amount: Decimal,
    pub win_rate: f64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Error categories surfaced to the presenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidBet,
    InvalidNumber,
    RoundInProgress,
    PersistenceFailure,
    PlayerNotFound,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidBet => write!(f, "invalid_bet"),
            ErrorKind::InvalidNumber => write!(f, "invalid_number"),
            ErrorKind::RoundInProgress => write!(f, "round_in_progress"),
            ErrorKind::PersistenceFailure => write!(f, "persistence_failure"),
            ErrorKind::PlayerNotFound => write!(f, "player_not_found"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}

/// Everything the engine tells its presenter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    SelectionChanged {
        count: usize,
    },
    RoundStarted {
        bet: Decimal,
    },
    NumberDrawn {
        number: u8,
        is_hit: bool,
        sequence_index: usize,
    },
    RoundResult {
        payout: Decimal,
        is_win: bool,
    },
    BalanceChanged {
        balance: Decimal,
    },
    StatsChanged {
        games_played: u64,
        games_won: u64,
    },
    ErrorRaised {
        kind: ErrorKind,
        message: String,
    },
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameEvent::SelectionChanged { count } => write!(f, "selected {count}"),
            GameEvent::RoundStarted { bet } => write!(f, "round started, bet ${bet:.2}"),
            GameEvent::NumberDrawn {
                number,
                is_hit,
                sequence_index,
            } => write!(
                f,
                "draw #{} -> {number}{}",
                sequence_index + 1,
                if *is_hit { " (hit)" } else { "" }
            ),
            GameEvent::RoundResult { payout, is_win } => {
                write!(f, "{} ${payout:.2}", if *is_win { "won" } else { "lost" })
            }
            GameEvent::BalanceChanged { balance } => write!(f, "balance ${balance:.2}"),
            GameEvent::StatsChanged {
                games_played,
                games_won,
            } => write!(f, "stats {games_won}/{games_played}"),
            GameEvent::ErrorRaised { kind, message } => write!(f, "error [{kind}] {message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a bet was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetRejection {
    NonPositive,
    ExceedsBalance,
    BelowMinimum,
    EmptySelection,
}

impl fmt::Display for BetRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetRejection::NonPositive => write!(f, "bet must be greater than zero"),
            BetRejection::ExceedsBalance => write!(f, "bet exceeds balance"),
            BetRejection::BelowMinimum => write!(f, "bet is below the minimum"),
            BetRejection::EmptySelection => write!(f, "no numbers selected"),
        }
    }
}

/// Domain-specific error types for the keno engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KenoError {
    #[error("Invalid bet amount: {reason}")]
    InvalidBet { reason: BetRejection },

    #[error("Number {number} is not on the board (1..={total})")]
    InvalidNumber { number: u8, total: u8 },

    #[error("A round is already in progress")]
    RoundInProgress,

    #[error("No round is in progress")]
    NoActiveRound,

    #[error("{0} draws remaining before the round can settle")]
    DrawsRemaining(usize),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KenoError {
    pub fn invalid_bet(reason: BetRejection) -> Self {
        KenoError::InvalidBet { reason }
    }

    /// The presenter-facing category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KenoError::InvalidBet { .. } => ErrorKind::InvalidBet,
            KenoError::InvalidNumber { .. } => ErrorKind::InvalidNumber,
            KenoError::RoundInProgress
            | KenoError::NoActiveRound
            | KenoError::DrawsRemaining(_) => ErrorKind::RoundInProgress,
            KenoError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            KenoError::PlayerNotFound(_) => ErrorKind::PlayerNotFound,
            KenoError::Config(_) => ErrorKind::Config,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
