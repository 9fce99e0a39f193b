//! Round engine: selection, bet, draw and settlement.
//!
//! A single-threaded state machine over one player's cached record. Every
//! persistence call is awaited before the round moves on, so the debit is
//! acknowledged before the first number is drawn and the settlement writes
//! are acknowledged before the result is announced. Persistence failures
//! are reported and the local state stands.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::accountant::Accountant;
use super::draw::DrawSequence;
use crate::payout::PayoutTable;
use crate::presenter::Presenter;
use crate::storage::PersistenceStore;
use crate::types::{
    BetRejection, DrawnNumber, EngineSnapshot, GameEvent, KenoError, Player, PlayerPatch,
    RecordChange, RoundOutcome, RoundState,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Board size, limits, and pacing.
#[derive(Debug, Clone)]
pub struct GameRules {
    pub total_numbers: u8,
    pub draw_count: u8,
    pub max_selections: u8,
    pub min_bet: Decimal,
    pub default_bet: Decimal,
    /// Pause after every drawn number.
    pub draw_delay: Duration,
    /// Extra pause after a hit.
    pub hit_delay: Duration,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            total_numbers: 40,
            draw_count: 10,
            max_selections: 10,
            min_bet: dec!(0.10),
            default_bet: dec!(1.00),
            draw_delay: Duration::from_millis(500),
            hit_delay: Duration::from_millis(500),
        }
    }
}

impl GameRules {
    /// The default rules with no pauses between draws.
    pub fn instant() -> Self {
        Self {
            draw_delay: Duration::ZERO,
            hit_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// How long to wait after `drawn` before the next draw.
    pub fn pacing(&self, drawn: &DrawnNumber) -> Duration {
        if drawn.is_hit {
            self.draw_delay + self.hit_delay
        } else {
            self.draw_delay
        }
    }
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// The round in flight, or the last settled one.
#[derive(Debug)]
struct Round {
    id: Uuid,
    bet: Decimal,
    draws: DrawSequence,
    persist_failures: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RoundEngine {
    rules: GameRules,
    payouts: PayoutTable,
    store: Arc<dyn PersistenceStore>,
    presenter: Arc<dyn Presenter>,
    rng: ChaCha20Rng,
    player: Player,
    bet_amount: Decimal,
    selection: BTreeSet<u8>,
    state: RoundState,
    round: Option<Round>,
}

impl RoundEngine {
    /// Build an engine over an already-fetched player record.
    pub fn new(
        player: Player,
        rules: GameRules,
        payouts: PayoutTable,
        store: Arc<dyn PersistenceStore>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let bet_amount = rules.default_bet;
        Self {
            rules,
            payouts,
            store,
            presenter,
            rng: ChaCha20Rng::from_entropy(),
            player,
            bet_amount,
            selection: BTreeSet::new(),
            state: RoundState::Idle,
            round: None,
        }
    }

    /// Fetch the player from the store and build an engine for them.
    ///
    /// Fails with `PlayerNotFound` if the store has no record.
    pub async fn load(
        player_id: &str,
        rules: GameRules,
        payouts: PayoutTable,
        store: Arc<dyn PersistenceStore>,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self, KenoError> {
        let fetched = store.get(player_id).await;
        let player = match fetched {
            Ok(Some(player)) => player,
            Ok(None) => {
                let err = KenoError::PlayerNotFound(player_id.to_string());
                report(presenter.as_ref(), &err);
                return Err(err);
            }
            Err(e) => {
                let err = KenoError::PersistenceFailure(format!("{e:#}"));
                report(presenter.as_ref(), &err);
                return Err(err);
            }
        };

        info!(player = %player, "Player loaded");
        let engine = Self::new(player, rules, payouts, store, presenter);
        engine.emit(GameEvent::BalanceChanged {
            balance: engine.player.balance,
        });
        engine.emit(GameEvent::StatsChanged {
            games_played: engine.player.games_played,
            games_won: engine.player.games_won,
        });
        Ok(engine)
    }

    /// Use a fixed RNG seed, making draws reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha20Rng::seed_from_u64(seed);
        self
    }

    // -- Accessors --

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn balance(&self) -> Decimal {
        self.player.balance
    }

    pub fn bet_amount(&self) -> Decimal {
        self.bet_amount
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn payouts(&self) -> &PayoutTable {
        &self.payouts
    }

    pub fn selection(&self) -> &BTreeSet<u8> {
        &self.selection
    }

    /// Numbers drawn in the current or last round, in draw order.
    pub fn drawn_numbers(&self) -> &[u8] {
        self.round.as_ref().map(|r| r.draws.drawn()).unwrap_or(&[])
    }

    pub fn is_active(&self) -> bool {
        self.state == RoundState::Active
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            player: self.player.clone(),
            state: self.state,
            selection: self.selection.iter().copied().collect(),
            drawn: self.drawn_numbers().to_vec(),
            bet_amount: self.bet_amount,
            win_rate: self.player.win_rate(),
        }
    }

    // -- Selection --

    /// Select a number, or deselect it if already selected.
    ///
    /// Ignored while a round is active. Adding beyond `max_selections` is
    /// ignored. Toggling after a settled round starts a new selection and
    /// discards that round's draw.
    pub fn toggle_selection(&mut self, number: u8) -> Result<(), KenoError> {
        if self.is_active() {
            debug!(number, "Selection locked during round");
            return Ok(());
        }
        if number == 0 || number > self.rules.total_numbers {
            return Err(self.fail(KenoError::InvalidNumber {
                number,
                total: self.rules.total_numbers,
            }));
        }

        if self.state == RoundState::Settled {
            self.round = None;
        }

        if !self.selection.remove(&number)
            && self.selection.len() < self.rules.max_selections as usize
        {
            self.selection.insert(number);
        }

        self.state = if self.selection.is_empty() {
            RoundState::Idle
        } else {
            RoundState::Selecting
        };
        self.emit(GameEvent::SelectionChanged {
            count: self.selection.len(),
        });
        Ok(())
    }

    /// Clear the selection and any finished draw.
    ///
    /// A second call in a row changes nothing and emits nothing.
    pub fn reset_for_new_selection(&mut self) -> Result<(), KenoError> {
        if self.is_active() {
            return Err(self.fail(KenoError::RoundInProgress));
        }
        if self.state == RoundState::Idle && self.selection.is_empty() && self.round.is_none() {
            return Ok(());
        }

        self.selection.clear();
        self.round = None;
        self.state = RoundState::Idle;
        debug!("Board reset");
        self.emit(GameEvent::SelectionChanged { count: 0 });
        Ok(())
    }

    // -- Bet --

    /// Set the bet for the next round.
    pub fn set_bet_amount(&mut self, amount: Decimal) -> Result<(), KenoError> {
        if self.is_active() {
            return Err(self.fail(KenoError::RoundInProgress));
        }
        if let Some(reason) = self.check_bet(amount) {
            return Err(self.fail(KenoError::invalid_bet(reason)));
        }
        self.bet_amount = amount;
        debug!(bet = %amount, "Bet updated");
        Ok(())
    }

    /// Scale the current bet (e.g. 0.5 to halve, 2 to double), rounded to
    /// cents.
    pub fn adjust_bet(&mut self, multiplier: Decimal) -> Result<(), KenoError> {
        self.set_bet_amount((self.bet_amount * multiplier).round_dp(2))
    }

    fn check_bet(&self, amount: Decimal) -> Option<BetRejection> {
        if amount <= Decimal::ZERO {
            Some(BetRejection::NonPositive)
        } else if amount > self.player.balance {
            Some(BetRejection::ExceedsBalance)
        } else if amount < self.rules.min_bet {
            Some(BetRejection::BelowMinimum)
        } else {
            None
        }
    }

    // -- Round lifecycle --

    /// Place `bet` and begin a round with the current selection.
    ///
    /// The debit is written to the store and awaited before this returns.
    /// A failed write is reported but does not stop the round.
    pub async fn start_round(&mut self, bet: Decimal) -> Result<(), KenoError> {
        if self.is_active() {
            return Err(self.fail(KenoError::RoundInProgress));
        }
        if self.selection.is_empty() {
            return Err(self.fail(KenoError::invalid_bet(BetRejection::EmptySelection)));
        }
        if let Some(reason) = self.check_bet(bet) {
            return Err(self.fail(KenoError::invalid_bet(reason)));
        }

        self.bet_amount = bet;
        self.state = RoundState::Active;
        let draws = DrawSequence::new(&mut self.rng, self.rules.total_numbers, self.rules.draw_count);
        let round = Round {
            id: Uuid::new_v4(),
            bet,
            draws,
            persist_failures: 0,
        };
        info!(
            round = %round.id,
            player = %self.player.id,
            bet = format!("${:.2}", bet),
            picks = self.selection.len(),
            "Round started"
        );
        self.round = Some(round);
        self.emit(GameEvent::RoundStarted { bet });

        let balance = Accountant::debit(&mut self.player, bet);
        self.emit(GameEvent::BalanceChanged { balance });
        self.persist(PlayerPatch::balance(balance)).await;
        Ok(())
    }

    /// Draw the next number. `None` once every number has been drawn.
    ///
    /// Waits out the configured pacing before returning.
    pub async fn draw_next(&mut self) -> Result<Option<DrawnNumber>, KenoError> {
        let drawn = self.next_number()?;
        if let Some(drawn) = &drawn {
            pause(self.rules.pacing(drawn)).await;
        }
        Ok(drawn)
    }

    /// Like `draw_next` but returns at once, leaving the pacing to the caller.
    pub fn next_number(&mut self) -> Result<Option<DrawnNumber>, KenoError> {
        if !self.is_active() {
            return Err(self.fail(KenoError::NoActiveRound));
        }
        let Some(round) = self.round.as_mut() else {
            return Err(self.fail(KenoError::NoActiveRound));
        };
        let Some(number) = round.draws.next() else {
            return Ok(None);
        };
        let drawn = DrawnNumber {
            number,
            is_hit: self.selection.contains(&number),
            sequence_index: round.draws.drawn().len() - 1,
        };

        debug!(number, hit = drawn.is_hit, index = drawn.sequence_index, "Number drawn");
        self.emit(GameEvent::NumberDrawn {
            number: drawn.number,
            is_hit: drawn.is_hit,
            sequence_index: drawn.sequence_index,
        });
        Ok(Some(drawn))
    }

    /// Pay out a fully drawn round and record the game.
    ///
    /// The balance write (on a win) and the stats write are awaited before
    /// the result is announced.
    pub async fn settle(&mut self) -> Result<RoundOutcome, KenoError> {
        if !self.is_active() {
            return Err(self.fail(KenoError::NoActiveRound));
        }
        let (round_id, bet, drawn, remaining) = match self.round.as_ref() {
            Some(r) => (r.id, r.bet, r.draws.drawn().to_vec(), r.draws.remaining()),
            None => return Err(self.fail(KenoError::NoActiveRound)),
        };
        if remaining > 0 {
            return Err(self.fail(KenoError::DrawsRemaining(remaining)));
        }

        let settlement =
            Accountant::settle(&mut self.player, &self.selection, &drawn, bet, &self.payouts);

        if settlement.is_win {
            self.emit(GameEvent::BalanceChanged {
                balance: settlement.balance_after,
            });
            self.persist(PlayerPatch::balance(settlement.balance_after))
                .await;
        }
        self.persist(PlayerPatch::stats(
            self.player.games_played,
            self.player.games_won,
        ))
        .await;
        self.emit(GameEvent::StatsChanged {
            games_played: self.player.games_played,
            games_won: self.player.games_won,
        });

        self.state = RoundState::Settled;
        let persist_failures = self.round.as_ref().map_or(0, |r| r.persist_failures);
        let outcome = RoundOutcome {
            round_id,
            selection: self.selection.iter().copied().collect(),
            drawn,
            bet,
            matches: settlement.matches,
            multiplier: settlement.multiplier,
            payout: settlement.payout,
            is_win: settlement.is_win,
            balance_after: settlement.balance_after,
            persisted: persist_failures == 0,
            settled_at: chrono::Utc::now(),
        };

        info!(round = %round_id, outcome = %outcome, "Round complete");
        self.emit(GameEvent::RoundResult {
            payout: outcome.payout,
            is_win: outcome.is_win,
        });
        Ok(outcome)
    }

    /// Start a round, draw every number, and settle.
    pub async fn play_round(&mut self, bet: Decimal) -> Result<RoundOutcome, KenoError> {
        self.start_round(bet).await?;
        while self.draw_next().await?.is_some() {}
        self.settle().await
    }

    // -- Remote changes --

    /// Bring the cached record in line with a change made elsewhere.
    ///
    /// Skipped while a round is active: the engine is the record's writer
    /// until the round settles.
    pub fn apply_remote(&mut self, change: RecordChange) -> Result<(), KenoError> {
        let remote = match change {
            RecordChange::Updated(player) => player,
            RecordChange::Removed => {
                return Err(self.fail(KenoError::PlayerNotFound(self.player.id.clone())));
            }
        };
        if self.is_active() {
            debug!(player = %remote.id, "Remote change skipped during round");
            return Ok(());
        }

        if remote.balance != self.player.balance {
            debug!(from = %self.player.balance, to = %remote.balance, "Remote balance change");
            self.player.balance = remote.balance;
            self.emit(GameEvent::BalanceChanged {
                balance: remote.balance,
            });
        }
        if remote.games_played != self.player.games_played
            || remote.games_won != self.player.games_won
        {
            self.player.games_played = remote.games_played;
            self.player.games_won = remote.games_won;
            self.emit(GameEvent::StatsChanged {
                games_played: remote.games_played,
                games_won: remote.games_won,
            });
        }
        Ok(())
    }

    // -- Internals --

    async fn persist(&mut self, patch: PlayerPatch) {
        if let Err(e) = self.store.merge(&self.player.id, &patch).await {
            let err = KenoError::PersistenceFailure(format!("{e:#}"));
            self.fail(err);
            if let Some(round) = self.round.as_mut() {
                round.persist_failures += 1;
            }
        }
    }

    fn emit(&self, event: GameEvent) {
        self.presenter.present(&event);
    }

    /// Report an error to the presenter and hand it back.
    fn fail(&self, err: KenoError) -> KenoError {
        report(self.presenter.as_ref(), &err);
        err
    }
}

pub(crate) fn report(presenter: &dyn Presenter, err: &KenoError) {
    warn!(kind = %err.kind(), error = %err, "Operation failed");
    presenter.present(&GameEvent::ErrorRaised {
        kind: err.kind(),
        message: err.to_string(),
    });
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
