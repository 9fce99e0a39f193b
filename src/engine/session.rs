//! Shared game session.
//!
//! Wraps a `RoundEngine` for use from several tasks at once: the dashboard
//! handlers, the autoplay loop, and a background task that keeps the
//! engine's cached player in line with the store's change feed.
//!
//! Readers never wait on a round in progress. The session keeps a snapshot
//! of the engine that is refreshed after every step, and `snapshot()` reads
//! that instead of locking the engine.
//!
//! A round runs on its own task. Once started it plays through to
//! settlement even if the caller stops waiting for it.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::round::{pause, report, GameRules, RoundEngine};
use crate::payout::PayoutTable;
use crate::presenter::Presenter;
use crate::storage::PersistenceStore;
use crate::types::{EngineSnapshot, KenoError, RecordChange, RoundOutcome};

/// Settled rounds kept for `history()`.
pub const HISTORY_CAPACITY: usize = 100;

pub struct GameSession {
    player_id: String,
    shared: Arc<Shared>,
    sync_task: JoinHandle<()>,
}

/// State owned jointly by the session, its round tasks and the sync task.
struct Shared {
    engine: Mutex<RoundEngine>,
    presenter: Arc<dyn Presenter>,
    round_active: AtomicBool,
    idle: Notify,
    cache: RwLock<EngineSnapshot>,
    history: std::sync::Mutex<VecDeque<RoundOutcome>>,
}

/// Clears the round flag when the round ends, however it ends.
struct ActiveRound(Arc<Shared>);

impl ActiveRound {
    fn acquire(shared: &Arc<Shared>) -> Option<Self> {
        shared
            .round_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(shared.clone()))
    }
}

impl Drop for ActiveRound {
    fn drop(&mut self) {
        self.0.round_active.store(false, Ordering::Release);
        self.0.idle.notify_waiters();
    }
}

impl GameSession {
    /// Load `player_id` and start following their record.
    pub async fn connect(
        player_id: &str,
        rules: GameRules,
        payouts: PayoutTable,
        store: Arc<dyn PersistenceStore>,
        presenter: Arc<dyn Presenter>,
        seed: Option<u64>,
    ) -> Result<Self, KenoError> {
        // Subscribe before loading so no change between the two is missed.
        let changes = store.subscribe(player_id);

        let mut engine =
            RoundEngine::load(player_id, rules, payouts, store.clone(), presenter.clone()).await?;
        if let Some(seed) = seed {
            engine = engine.with_seed(seed);
        }

        let shared = Arc::new(Shared {
            cache: RwLock::new(engine.snapshot()),
            engine: Mutex::new(engine),
            presenter,
            round_active: AtomicBool::new(false),
            idle: Notify::new(),
            history: std::sync::Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        });
        let sync_task = tokio::spawn(follow_changes(
            player_id.to_string(),
            shared.clone(),
            store,
            changes,
        ));

        info!(player = player_id, "Session connected");
        Ok(Self {
            player_id: player_id.to_string(),
            shared,
            sync_task,
        })
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn is_round_active(&self) -> bool {
        self.shared.round_active.load(Ordering::Acquire)
    }

    /// Wait until no round is being played.
    pub async fn wait_until_idle(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if !self.is_round_active() {
                return;
            }
            idle.await;
        }
    }

    /// Latest engine state. Never waits on a round in progress.
    pub fn snapshot(&self) -> EngineSnapshot {
        match self.shared.cache.read() {
            Ok(snap) => snap.clone(),
            Err(poisoned) => {
                warn!("Snapshot lock poisoned; recovering");
                poisoned.into_inner().clone()
            }
        }
    }

    /// Settled rounds, most recent last.
    pub fn history(&self, limit: usize) -> Vec<RoundOutcome> {
        let history = match self.shared.history.lock() {
            Ok(h) => h,
            Err(poisoned) => {
                warn!("History lock poisoned; recovering");
                poisoned.into_inner()
            }
        };
        let start = history.len().saturating_sub(limit);
        history.iter().skip(start).cloned().collect()
    }

    pub async fn toggle_selection(&self, number: u8) -> Result<EngineSnapshot, KenoError> {
        let mut engine = self.shared.engine.lock().await;
        engine.toggle_selection(number)?;
        Ok(self.shared.refresh(&engine))
    }

    pub async fn set_bet_amount(&self, amount: Decimal) -> Result<EngineSnapshot, KenoError> {
        let mut engine = self.shared.engine.lock().await;
        engine.set_bet_amount(amount)?;
        Ok(self.shared.refresh(&engine))
    }

    pub async fn adjust_bet(&self, multiplier: Decimal) -> Result<EngineSnapshot, KenoError> {
        let mut engine = self.shared.engine.lock().await;
        engine.adjust_bet(multiplier)?;
        Ok(self.shared.refresh(&engine))
    }

    pub async fn reset_for_new_selection(&self) -> Result<EngineSnapshot, KenoError> {
        let mut engine = self.shared.engine.lock().await;
        engine.reset_for_new_selection()?;
        Ok(self.shared.refresh(&engine))
    }

    /// Play one full round with the current selection.
    ///
    /// Uses the engine's current bet when `bet` is `None`. Fails with
    /// `RoundInProgress` if another round is already being played. Dropping
    /// the returned future does not stop the round.
    pub async fn play_round(&self, bet: Option<Decimal>) -> Result<RoundOutcome, KenoError> {
        let Some(active) = ActiveRound::acquire(&self.shared) else {
            let err = KenoError::RoundInProgress;
            report(self.shared.presenter.as_ref(), &err);
            return Err(err);
        };

        let shared = self.shared.clone();
        let round = tokio::spawn(async move {
            let _active = active;
            shared.run_round(bet).await
        });

        match round.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                error!(player = %self.player_id, error = %e, "Round task cancelled");
                Err(KenoError::NoActiveRound)
            }
        }
    }
}

impl Shared {
    async fn run_round(&self, bet: Option<Decimal>) -> Result<RoundOutcome, KenoError> {
        {
            let mut engine = self.engine.lock().await;
            let bet = bet.unwrap_or_else(|| engine.bet_amount());
            engine.start_round(bet).await?;
            self.refresh(&engine);
        }

        // Pause with the engine unlocked so edits and remote changes are
        // seen (and refused or skipped) while the round plays out.
        loop {
            let delay = {
                let mut engine = self.engine.lock().await;
                let drawn = engine.next_number()?;
                self.refresh(&engine);
                match drawn {
                    Some(drawn) => engine.rules().pacing(&drawn),
                    None => break,
                }
            };
            pause(delay).await;
        }

        let outcome = {
            let mut engine = self.engine.lock().await;
            let outcome = engine.settle().await?;
            self.refresh(&engine);
            outcome
        };
        self.record(outcome.clone());
        Ok(outcome)
    }

    fn refresh(&self, engine: &RoundEngine) -> EngineSnapshot {
        let snap = engine.snapshot();
        match self.cache.write() {
            Ok(mut guard) => *guard = snap.clone(),
            Err(poisoned) => *poisoned.into_inner() = snap.clone(),
        }
        snap
    }

    fn record(&self, outcome: RoundOutcome) {
        let mut history = match self.history.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(outcome);
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.sync_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

/// Apply the store's changes to the engine until the feed closes or the
/// player is removed.
async fn follow_changes(
    player_id: String,
    shared: Arc<Shared>,
    store: Arc<dyn PersistenceStore>,
    mut changes: broadcast::Receiver<RecordChange>,
) {
    loop {
        let change = match changes.recv().await {
            Ok(change) => change,
            Err(RecvError::Lagged(skipped)) => {
                warn!(player = %player_id, skipped, "Change feed lagged; re-reading record");
                match refetch(&player_id, store.as_ref()).await {
                    Some(change) => change,
                    None => continue,
                }
            }
            Err(RecvError::Closed) => {
                debug!(player = %player_id, "Change feed closed");
                break;
            }
        };

        let mut engine = shared.engine.lock().await;
        // Each change carries the whole record: only the latest matters.
        // This also folds the echoes of the engine's own writes into the
        // final record instead of replaying intermediate balances.
        let mut latest = change;
        loop {
            match changes.try_recv() {
                Ok(next) => latest = next,
                Err(TryRecvError::Lagged(_)) => {
                    if let Some(fresh) = refetch(&player_id, store.as_ref()).await {
                        latest = fresh;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        let result = engine.apply_remote(latest);
        shared.refresh(&engine);
        if let Err(KenoError::PlayerNotFound(_)) = result {
            warn!(player = %player_id, "Player removed; no longer following changes");
            break;
        }
    }
}

async fn refetch(player_id: &str, store: &dyn PersistenceStore) -> Option<RecordChange> {
    match store.get(player_id).await {
        Ok(Some(player)) => Some(RecordChange::Updated(player)),
        Ok(None) => Some(RecordChange::Removed),
        Err(e) => {
            warn!(player = player_id, error = %e, "Failed to re-read player");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
