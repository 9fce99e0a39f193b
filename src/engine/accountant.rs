//! Accountant: bet debits, payouts and lifetime stats.
//!
//! Pure bookkeeping over the cached player record. The round engine calls
//! in here and handles persistence and events itself.

use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::info;

use crate::payout::PayoutTable;
use crate::types::Player;

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// The bookkeeping result of a finished draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub matches: usize,
    pub multiplier: Decimal,
    pub payout: Decimal,
    pub is_win: bool,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Numbers present in both the selection and the draw.
    pub fn count_matches(selection: &BTreeSet<u8>, drawn: &[u8]) -> usize {
        drawn.iter().filter(|n| selection.contains(n)).count()
    }

    /// Take the stake out of the cached balance. Returns the new balance.
    pub fn debit(player: &mut Player, bet: Decimal) -> Decimal {
        player.balance -= bet;
        player.balance
    }

    /// Settle a finished draw: credit any payout, count the game, and
    /// count the win if there was a payout.
    pub fn settle(
        player: &mut Player,
        selection: &BTreeSet<u8>,
        drawn: &[u8],
        bet: Decimal,
        table: &PayoutTable,
    ) -> Settlement {
        let balance_before = player.balance;
        let matches = Self::count_matches(selection, drawn);
        let multiplier = table.multiplier(matches);
        let payout = table.payout(matches, bet);
        let is_win = payout > Decimal::ZERO;

        if is_win {
            player.balance += payout;
            player.games_won += 1;
        }
        player.games_played += 1;

        info!(
            player = %player.id,
            matches,
            multiplier = %multiplier,
            payout = format!("${:.2}", payout),
            balance = format!("${:.2}", player.balance),
            "Round settled"
        );

        Settlement {
            matches,
            multiplier,
            payout,
            is_win,
            balance_before,
            balance_after: player.balance,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
