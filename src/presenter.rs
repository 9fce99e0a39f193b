//! Presenters: consumers of engine events.
//!
//! Defines the `Presenter` trait and provides:
//! - `EventLog`: bounded in-memory history plus a broadcast feed, backing
//!   the dashboard API
//! - `TracingPresenter`: writes each event to the log, for headless runs
//! - `PresenterSet`: forwards each event to several presenters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::types::GameEvent;

/// Sink for engine events.
///
/// Presenters render or forward events; they never feed logic back into
/// the engine. Implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait Presenter: Send + Sync {
    fn present(&self, event: &GameEvent);
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Default number of events kept by `EventLog`.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An event with the time it was presented.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: GameEvent,
}

struct LogInner {
    events: VecDeque<LoggedEvent>,
    next_seq: u64,
}

/// Keeps the most recent events and re-broadcasts each one.
pub struct EventLog {
    inner: Mutex<LogInner>,
    capacity: usize,
    feed: broadcast::Sender<LoggedEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Mutex::new(LogInner {
                events: VecDeque::with_capacity(capacity),
                next_seq: 0,
            }),
            capacity,
            feed,
        }
    }

    /// Live feed of events presented from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LoggedEvent> {
        self.feed.subscribe()
    }

    /// The last `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LoggedEvent> {
        let inner = self.lock();
        let start = inner.events.len().saturating_sub(limit);
        inner.events.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Event log lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Presenter for EventLog {
    fn present(&self, event: &GameEvent) {
        let logged = {
            let mut inner = self.lock();
            let logged = LoggedEvent {
                seq: inner.next_seq,
                at: Utc::now(),
                event: event.clone(),
            };
            inner.next_seq += 1;
            if inner.events.len() == self.capacity {
                inner.events.pop_front();
            }
            if self.capacity > 0 {
                inner.events.push_back(logged.clone());
            }
            logged
        };
        debug!(seq = logged.seq, event = %event, "Event");
        // No live subscribers is fine.
        let _ = self.feed.send(logged);
    }
}

// ---------------------------------------------------------------------------
// Tracing presenter
// ---------------------------------------------------------------------------

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn present(&self, event: &GameEvent) {
        match event {
            GameEvent::ErrorRaised { kind, message } => {
                warn!(kind = %kind, message = %message, "Game error")
            }
            GameEvent::RoundResult { .. } | GameEvent::RoundStarted { .. } => {
                info!(event = %event, "Round")
            }
            _ => debug!(event = %event, "Game event"),
        }
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Forwards every event to each presenter in order.
#[derive(Default, Clone)]
pub struct PresenterSet(Vec<Arc<dyn Presenter>>);

impl PresenterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.0.push(presenter);
        self
    }
}

impl Presenter for PresenterSet {
    fn present(&self, event: &GameEvent) {
        for presenter in &self.0 {
            presenter.present(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn selection_changed(count: usize) -> GameEvent {
        GameEvent::SelectionChanged { count }
    }

    #[test]
    fn test_log_keeps_order() {
        let log = EventLog::new(10);
        log.present(&selection_changed(1));
        log.present(&selection_changed(2));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].seq, 0);
        assert_eq!(recent[1].event, selection_changed(2));
    }

    #[test]
    fn test_log_is_bounded() {
        let log = EventLog::new(3);
        for i in 0..5 {
            log.present(&selection_changed(i));
        }
        assert_eq!(log.len(), 3);
        let recent = log.recent(100);
        assert_eq!(recent[0].event, selection_changed(2));
        assert_eq!(recent[2].seq, 4);
    }

    #[test]
    fn test_recent_limit() {
        let log = EventLog::new(10);
        for i in 0..5 {
            log.present(&selection_changed(i));
        }
        let last_two = log.recent(2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].event, selection_changed(4));
    }

    #[test]
    fn test_empty_log() {
        let log = EventLog::default();
        assert!(log.is_empty());
        assert!(log.recent(5).is_empty());
    }

    #[tokio::test]
    async fn test_feed_delivers_events() {
        let log = EventLog::new(4);
        let mut rx = log.subscribe();
        log.present(&GameEvent::BalanceChanged { balance: dec!(5) });

        let got = rx.recv().await.unwrap();
        assert_eq!(got.event, GameEvent::BalanceChanged { balance: dec!(5) });
    }

    #[test]
    fn test_logged_event_serializes_flat() {
        let log = EventLog::new(4);
        log.present(&selection_changed(3));
        let json = serde_json::to_value(&log.recent(1)[0]).unwrap();
        assert_eq!(json["event"], "selection_changed");
        assert_eq!(json["count"], 3);
        assert_eq!(json["seq"], 0);
    }

    #[test]
    fn test_tracing_presenter_accepts_all_events() {
        let p = TracingPresenter;
        p.present(&selection_changed(1));
        p.present(&GameEvent::RoundResult {
            payout: dec!(0),
            is_win: false,
        });
    }

    #[test]
    fn test_set_forwards_to_every_presenter() {
        let a = Arc::new(EventLog::new(4));
        let mut b = MockPresenter::new();
        b.expect_present().times(2).return_const(());

        let set = PresenterSet::new().with(a.clone()).with(Arc::new(b));
        set.present(&selection_changed(1));
        set.present(&selection_changed(2));
        assert_eq!(a.len(), 2);
    }
}
