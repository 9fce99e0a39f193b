//! Full-session scenarios.
//!
//! Drive `GameSession` and `RoundEngine` end to end against real stores and
//! the failure-injecting double, checking the money and stats invariants
//! across many rounds.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use keno::engine::{GameRules, GameSession, RoundEngine};
use keno::payout::PayoutTable;
use keno::presenter::EventLog;
use keno::storage::memory::MemoryStore;
use keno::storage::sqlite::SqliteStore;
use keno::storage::PersistenceStore;
use keno::types::{
    BetRejection, ErrorKind, GameEvent, KenoError, Player, PlayerPatch, RoundState,
};

use crate::mock_store::FlakyStore;

async fn connect(store: Arc<dyn PersistenceStore>, log: Arc<EventLog>, seed: u64) -> GameSession {
    GameSession::connect(
        "p1",
        GameRules::instant(),
        PayoutTable::default(),
        store,
        log,
        Some(seed),
    )
    .await
    .unwrap()
}

fn events(log: &EventLog) -> Vec<GameEvent> {
    log.recent(usize::MAX).into_iter().map(|e| e.event).collect()
}

async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Money and stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_many_rounds_keep_books_balanced() {
    let store = Arc::new(MemoryStore::with_players([Player::new("p1", dec!(500))]));
    let log = Arc::new(EventLog::new(4096));
    let session = connect(store.clone(), log, 2024).await;

    let table = PayoutTable::default();
    let mut expected_balance = dec!(500);
    let mut wins = 0u64;
    let mut rounds = 0u64;

    // Every pick count from 1 to 10, several rounds each.
    for picks in 1..=10u8 {
        session.reset_for_new_selection().await.unwrap();
        for n in 0..picks {
            session.toggle_selection(n * 4 + 1).await.unwrap();
        }
        assert_eq!(session.snapshot().selection.len(), picks as usize);

        for _ in 0..5 {
            let o = assert_ok!(session.play_round(Some(dec!(1.50))).await);
            rounds += 1;

            assert_eq!(o.drawn.len(), 10);
            assert_eq!(o.drawn.iter().collect::<HashSet<_>>().len(), 10);
            assert!(o.drawn.iter().all(|n| (1..=40).contains(n)));

            let picked: BTreeSet<u8> = o.selection.iter().copied().collect();
            let matches = o.drawn.iter().filter(|n| picked.contains(n)).count();
            assert_eq!(o.matches, matches);
            assert!(o.matches <= picked.len());
            assert_eq!(o.payout, table.payout(matches, dec!(1.50)));
            assert_eq!(o.is_win, o.payout > Decimal::ZERO);
            assert_eq!(o.banner(), if o.is_win { "Winner!" } else { "Try Again!" });

            expected_balance = expected_balance - dec!(1.50) + o.payout;
            wins += u64::from(o.is_win);
            assert_eq!(o.balance_after, expected_balance);
            assert!(o.persisted);
        }
    }

    let snap = session.snapshot();
    assert_eq!(snap.player.balance, expected_balance);
    assert_eq!(snap.player.games_played, rounds);
    assert_eq!(snap.player.games_won, wins);

    let stored = store.get("p1").await.unwrap().unwrap();
    assert_eq!(stored.balance, expected_balance);
    assert_eq!(stored.games_played, rounds);
    assert_eq!(stored.games_won, wins);
}

#[tokio::test]
async fn test_rejected_rounds_change_nothing() {
    let store = Arc::new(MemoryStore::with_players([Player::new("p1", dec!(2))]));
    let log = Arc::new(EventLog::default());
    let session = connect(store.clone(), log.clone(), 1).await;

    // Empty selection.
    assert_eq!(
        session.play_round(Some(dec!(1))).await.unwrap_err(),
        KenoError::invalid_bet(BetRejection::EmptySelection)
    );

    // More than the balance.
    session.toggle_selection(9).await.unwrap();
    assert_eq!(
        session.play_round(Some(dec!(2.01))).await.unwrap_err(),
        KenoError::invalid_bet(BetRejection::ExceedsBalance)
    );

    let snap = session.snapshot();
    assert_eq!(snap.player.balance, dec!(2));
    assert_eq!(snap.player.games_played, 0);
    assert_eq!(snap.state, RoundState::Selecting);
    assert!(snap.drawn.is_empty());
    assert!(!session.is_round_active());
    assert!(session.history(10).is_empty());
    assert_eq!(store.get("p1").await.unwrap().unwrap().balance, dec!(2));

    let errors = events(&log)
        .into_iter()
        .filter(|e| matches!(e, GameEvent::ErrorRaised { kind: ErrorKind::InvalidBet, .. }))
        .count();
    assert_eq!(errors, 2);
}

#[tokio::test]
async fn test_playing_down_to_zero() {
    let store = Arc::new(MemoryStore::with_players([Player::new("p1", dec!(3))]));
    let session = connect(store, Arc::new(EventLog::default()), 99).await;
    // One pick: only a single match pays, and only half the bet back.
    session.toggle_selection(40).await.unwrap();

    let mut played = 0;
    loop {
        let balance = session.snapshot().player.balance;
        if balance < dec!(0.10) {
            break;
        }
        let bet = balance.min(dec!(1));
        session.play_round(Some(bet)).await.unwrap();
        played += 1;
        assert!(played < 1_000, "balance never ran out");
    }

    let balance = session.snapshot().player.balance;
    assert!(balance >= Decimal::ZERO);
    assert!(matches!(
        session.play_round(Some(dec!(0.10))).await,
        Err(KenoError::InvalidBet { .. })
    ));
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_only_one_round_at_a_time() {
    let store = Arc::new(MemoryStore::with_players([Player::new("p1", dec!(10))]));
    // Paced draws so the first round is still running when the second asks.
    let rules = GameRules {
        draw_delay: Duration::from_millis(2),
        ..GameRules::instant()
    };
    let session = GameSession::connect(
        "p1",
        rules,
        PayoutTable::default(),
        store.clone(),
        Arc::new(EventLog::default()),
        Some(3),
    )
    .await
    .unwrap();
    session.toggle_selection(12).await.unwrap();

    let (a, b) = futures::join!(
        session.play_round(Some(dec!(1))),
        session.play_round(Some(dec!(1)))
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| r.as_ref().err() == Some(&KenoError::RoundInProgress)));

    let snap = session.snapshot();
    assert_eq!(snap.player.games_played, 1);
    let outcome = results.into_iter().find_map(Result::ok).unwrap();
    assert_eq!(snap.player.balance, dec!(9) + outcome.payout);
}

#[tokio::test]
async fn test_engine_refuses_second_round() {
    let store = Arc::new(MemoryStore::with_players([Player::new("p1", dec!(10))]));
    let mut engine = RoundEngine::load(
        "p1",
        GameRules::instant(),
        PayoutTable::default(),
        store,
        Arc::new(EventLog::default()),
    )
    .await
    .unwrap();
    engine.toggle_selection(1).unwrap();
    engine.start_round(dec!(1)).await.unwrap();

    assert_eq!(engine.start_round(dec!(1)).await, Err(KenoError::RoundInProgress));
    assert_eq!(engine.balance(), dec!(9));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_store_outage_keeps_local_state() {
    let store = Arc::new(FlakyStore::with_players([Player::new("p1", dec!(10))]));
    let log = Arc::new(EventLog::new(2048));
    let session = connect(store.clone(), log.clone(), 8).await;
    session.toggle_selection(2).await.unwrap();
    session.toggle_selection(4).await.unwrap();

    store.set_error("store unavailable");
    let failed = session.play_round(Some(dec!(1))).await.unwrap();
    assert!(!failed.persisted);
    assert_eq!(failed.balance_after, dec!(9) + failed.payout);
    assert_eq!(session.snapshot().player.games_played, 1);
    assert!(store.merges().is_empty());

    let outage_errors = events(&log)
        .into_iter()
        .filter(|e| {
            matches!(e, GameEvent::ErrorRaised { kind: ErrorKind::PersistenceFailure, message }
                if message.contains("store unavailable"))
        })
        .count();
    assert!(outage_errors >= 2);

    store.clear_error();
    let ok = session.play_round(Some(dec!(1))).await.unwrap();
    assert!(ok.persisted);

    // The next successful writes carry the full local state.
    let record = store.get("p1").await.unwrap().unwrap();
    assert_eq!(record.balance, ok.balance_after);
    assert_eq!(record.games_played, 2);
}

#[tokio::test]
async fn test_debit_written_before_first_draw() {
    let store = Arc::new(FlakyStore::with_players([Player::new("p1", dec!(10))]));
    let mut engine = RoundEngine::load(
        "p1",
        GameRules::instant(),
        PayoutTable::default(),
        store.clone(),
        Arc::new(EventLog::default()),
    )
    .await
    .unwrap();
    engine.toggle_selection(5).unwrap();
    engine.start_round(dec!(4)).await.unwrap();

    assert_eq!(
        store.merges(),
        vec![("p1".to_string(), PlayerPatch::balance(dec!(6)))]
    );
    assert!(engine.drawn_numbers().is_empty());

    while engine.draw_next().await.unwrap().is_some() {}
    let outcome = engine.settle().await.unwrap();

    let merges = store.merges();
    let last = &merges.last().unwrap().1;
    assert_eq!(last, &PlayerPatch::stats(1, u64::from(outcome.is_win)));
    assert_eq!(merges.len(), if outcome.is_win { 3 } else { 2 });
}

#[tokio::test]
async fn test_sqlite_backed_session() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.put(&Player::new("p1", dec!(25))).await.unwrap();
    let session = connect(store.clone(), Arc::new(EventLog::default()), 17).await;

    for n in [6, 16, 26] {
        session.toggle_selection(n).await.unwrap();
    }
    let mut balance = dec!(25);
    for _ in 0..4 {
        let o = session.play_round(Some(dec!(2.25))).await.unwrap();
        balance = balance - dec!(2.25) + o.payout;
    }

    let record = store.get("p1").await.unwrap().unwrap();
    assert_eq!(record.balance, balance);
    assert_eq!(record.games_played, 4);
}

#[tokio::test]
async fn test_missing_player_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let result = GameSession::connect(
        "nobody",
        GameRules::instant(),
        PayoutTable::default(),
        store,
        Arc::new(EventLog::default()),
        None,
    )
    .await;
    assert!(matches!(result, Err(KenoError::PlayerNotFound(id)) if id == "nobody"));
}

// ---------------------------------------------------------------------------
// Realtime sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_second_client_sees_balance_changes() {
    let store = Arc::new(MemoryStore::with_players([Player::new("p1", dec!(10))]));
    let first = connect(store.clone(), Arc::new(EventLog::default()), 1).await;
    let second = connect(store.clone(), Arc::new(EventLog::default()), 2).await;

    first.toggle_selection(30).await.unwrap();
    let outcome = first.play_round(Some(dec!(1))).await.unwrap();

    assert!(
        wait_for(|| {
            let snap = second.snapshot();
            snap.player.balance == outcome.balance_after && snap.player.games_played == 1
        })
        .await
    );
}

#[tokio::test]
async fn test_external_top_up_reaches_presenter() {
    let store = Arc::new(MemoryStore::with_players([Player::new("p1", dec!(1))]));
    let log = Arc::new(EventLog::default());
    let session = connect(store.clone(), log.clone(), 4).await;
    let mut feed = log.subscribe();

    store
        .merge("p1", &PlayerPatch::balance(dec!(50)))
        .await
        .unwrap();

    let logged = tokio::time::timeout(Duration::from_secs(1), feed.recv())
        .await
        .expect("no event before timeout")
        .unwrap();
    assert_eq!(logged.event, GameEvent::BalanceChanged { balance: dec!(50) });
    assert!(wait_for(|| session.snapshot().player.balance == dec!(50)).await);

    // The new balance is usable straight away.
    session.toggle_selection(1).await.unwrap();
    assert_ok!(session.set_bet_amount(dec!(20)).await);
}

// ---------------------------------------------------------------------------
// Presentation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_round_event_stream() {
    let store = Arc::new(MemoryStore::with_players([Player::new("p1", dec!(10))]));
    let log = Arc::new(EventLog::new(1024));
    let session = connect(store, log.clone(), 21).await;
    session.toggle_selection(10).await.unwrap();
    session.toggle_selection(20).await.unwrap();

    let outcome = session.play_round(Some(dec!(1))).await.unwrap();
    let ev = events(&log);

    let started = ev
        .iter()
        .position(|e| *e == GameEvent::RoundStarted { bet: dec!(1) })
        .unwrap();
    let draws: Vec<(u8, bool, usize)> = ev[started..]
        .iter()
        .filter_map(|e| match e {
            GameEvent::NumberDrawn {
                number,
                is_hit,
                sequence_index,
            } => Some((*number, *is_hit, *sequence_index)),
            _ => None,
        })
        .collect();

    assert_eq!(draws.len(), 10);
    for (i, (number, is_hit, index)) in draws.iter().enumerate() {
        assert_eq!(*index, i);
        assert_eq!(*number, outcome.drawn[i]);
        assert_eq!(*is_hit, [10, 20].contains(number));
    }
    assert_eq!(
        ev.last(),
        Some(&GameEvent::RoundResult {
            payout: outcome.payout,
            is_win: outcome.is_win
        })
    );
}
