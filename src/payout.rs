//! Payout table.
//!
//! Maps a match count to the multiplier applied to the bet. Match counts
//! outside the table pay nothing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::warn;

use crate::types::KenoError;

/// Multipliers indexed by match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutTable {
    multipliers: Vec<Decimal>,
}

impl Default for PayoutTable {
    fn default() -> Self {
        Self {
            multipliers: vec![dec!(0), dec!(0.5), dec!(1), dec!(2), dec!(5), dec!(20)],
        }
    }
}

impl fmt::Display for PayoutTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .multipliers
            .iter()
            .enumerate()
            .map(|(matches, m)| format!("{matches}:x{}", m.normalize()))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

impl PayoutTable {
    /// Build a table from multipliers indexed by match count.
    ///
    /// Rejects empty tables, negative multipliers, and tables that pay
    /// on zero matches.
    pub fn new(multipliers: Vec<Decimal>) -> Result<Self, KenoError> {
        if multipliers.is_empty() {
            return Err(KenoError::Config("payout table is empty".into()));
        }
        if multipliers[0] != Decimal::ZERO {
            return Err(KenoError::Config(format!(
                "payout for 0 matches must be 0, got {}",
                multipliers[0]
            )));
        }
        if let Some((matches, m)) = multipliers
            .iter()
            .enumerate()
            .find(|(_, m)| **m < Decimal::ZERO)
        {
            return Err(KenoError::Config(format!(
                "negative multiplier {m} for {matches} matches"
            )));
        }

        let table = Self { multipliers };
        if !table.is_monotonic_from_break_even() {
            warn!(table = %table, "Payout table decreases after its break-even point");
        }
        Ok(table)
    }

    /// Multiplier for a match count; 0 outside the table.
    pub fn multiplier(&self, matches: usize) -> Decimal {
        self.multipliers.get(matches).copied().unwrap_or(Decimal::ZERO)
    }

    /// Payout for a match count at the given bet.
    pub fn payout(&self, matches: usize, bet: Decimal) -> Decimal {
        self.multiplier(matches) * bet
    }

    /// Highest match count with an entry.
    pub fn max_matches(&self) -> usize {
        self.multipliers.len() - 1
    }

    /// First match count that returns at least the stake.
    pub fn break_even(&self) -> Option<usize> {
        self.multipliers.iter().position(|m| *m >= Decimal::ONE)
    }

    /// Whether multipliers never decrease from the break-even point on.
    pub fn is_monotonic_from_break_even(&self) -> bool {
        match self.break_even() {
            Some(start) => self.multipliers[start..].windows(2).all(|w| w[0] <= w[1]),
            None => true,
        }
    }

    pub fn multipliers(&self) -> &[Decimal] {
        &self.multipliers
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
