//! KENO: keno round engine with realtime balance sync.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the player store, connects a game session, and optionally plays
//! a batch of rounds and serves the dashboard until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use keno::config::{AppConfig, StoreBackend};
use keno::dashboard::{self, DashboardState};
use keno::engine::GameSession;
use keno::presenter::{EventLog, PresenterSet, TracingPresenter};
use keno::storage::memory::MemoryStore;
use keno::storage::sqlite::SqliteStore;
use keno::storage::PersistenceStore;
use keno::types::Player;

const BANNER: &str = r#"
 _  _______ _   _  ___
| |/ / ____| \ | |/ _ \
| ' /|  _| |  \| | | | |
| . \| |___| |\  | |_| |
|_|\_\_____|_| \_|\___/

  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("KENO_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        player = %cfg.player.id,
        board = cfg.game.total_numbers,
        draws = cfg.game.draw_count,
        max_picks = cfg.game.max_selections,
        store = ?cfg.store.backend,
        "KENO starting up"
    );

    // -- Store -----------------------------------------------------------

    let mut memory: Option<Arc<MemoryStore>> = None;
    let store: Arc<dyn PersistenceStore> = match cfg.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(match &cfg.store.snapshot_path {
                Some(path) => MemoryStore::from_snapshot(path)?,
                None => MemoryStore::new(),
            });
            memory = Some(store.clone());
            store
        }
        StoreBackend::Sqlite => Arc::new(SqliteStore::connect(&cfg.store.database_url).await?),
    };
    info!(store = store.name(), "Store ready");

    if let Some(balance) = cfg.player.seed_balance {
        let existing = store
            .get(&cfg.player.id)
            .await
            .context("Failed to look up player")?;
        if existing.is_none() {
            store.put(&Player::new(&cfg.player.id, balance)).await?;
            info!(player = %cfg.player.id, balance = format!("${:.2}", balance), "Player created");
        }
    }

    // -- Session ---------------------------------------------------------

    let events = Arc::new(EventLog::default());
    let presenter = PresenterSet::new()
        .with(events.clone())
        .with(Arc::new(TracingPresenter));
    let session = Arc::new(
        GameSession::connect(
            &cfg.player.id,
            cfg.rules(),
            cfg.payout_table()?,
            store.clone(),
            Arc::new(presenter),
            cfg.game.seed,
        )
        .await
        .with_context(|| format!("Failed to start session for {}", cfg.player.id))?,
    );

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(session.clone(), events.clone()));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    let interrupted = cfg.autoplay.rounds > 0 && autoplay(&session, &cfg).await;

    // -- Wait for shutdown -----------------------------------------------

    if interrupted {
        if session.is_round_active() {
            info!("Waiting for the round in play to settle.");
        }
        session.wait_until_idle().await;
    } else if cfg.dashboard.enabled {
        info!("Serving. Press Ctrl+C to stop.");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Shutdown signal received.");
    }

    if let (Some(memory), Some(path)) = (&memory, &cfg.store.snapshot_path) {
        memory.save(path).await?;
    }

    let snap = session.snapshot();
    info!(
        balance = format!("${:.2}", snap.player.balance),
        played = snap.player.games_played,
        won = snap.player.games_won,
        win_rate = format!("{:.1}%", snap.win_rate),
        "KENO shut down cleanly."
    );

    Ok(())
}

/// Select the configured picks and play rounds until done, out of money,
/// or interrupted. Returns `true` if stopped by Ctrl+C.
async fn autoplay(session: &GameSession, cfg: &AppConfig) -> bool {
    for pick in &cfg.autoplay.picks {
        if !session.snapshot().selection.contains(pick) {
            if let Err(e) = session.toggle_selection(*pick).await {
                warn!(pick, error = %e, "Pick rejected");
            }
        }
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    for round in 1..=cfg.autoplay.rounds {
        tokio::select! {
            result = session.play_round(cfg.autoplay.bet) => match result {
                Ok(outcome) => info!(round, outcome = %outcome, "Autoplay round"),
                Err(e) => {
                    error!(round, error = %e, "Autoplay stopped");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received during autoplay.");
                return true;
            }
        }
    }
    false
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keno=info"));

    let json_logging = std::env::var("KENO_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
