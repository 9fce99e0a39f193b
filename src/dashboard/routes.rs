//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::engine::GameSession;
use crate::presenter::{EventLog, LoggedEvent};
use crate::types::{EngineSnapshot, KenoError, RoundOutcome, RoundState};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub session: Arc<GameSession>,
    pub events: Arc<EventLog>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(session: Arc<GameSession>, events: Arc<EventLog>) -> Self {
        Self {
            session,
            events,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

/// Default and maximum `limit` for list endpoints.
const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub player_id: String,
    pub balance: Decimal,
    pub games_played: u64,
    pub games_won: u64,
    pub win_rate: f64,
    pub state: RoundState,
    pub selection: Vec<u8>,
    pub drawn: Vec<u8>,
    pub bet_amount: Decimal,
    pub round_active: bool,
    /// Banner and signed amount of the last settled round.
    pub last_result: Option<ResultLabel>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultLabel {
    pub banner: String,
    pub amount: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

/// Either an absolute amount or a multiplier on the current bet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BetRequest {
    pub amount: Option<Decimal>,
    pub multiplier: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoundRequest {
    pub bet: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Handler error rendered as `{kind, message}` JSON.
#[derive(Debug)]
pub enum ApiError {
    Game(KenoError),
    BadRequest(String),
}

impl From<KenoError> for ApiError {
    fn from(err: KenoError) -> Self {
        ApiError::Game(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Game(err) => {
                let status = match &err {
                    KenoError::InvalidBet { .. } | KenoError::InvalidNumber { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    KenoError::RoundInProgress
                    | KenoError::NoActiveRound
                    | KenoError::DrawsRemaining(_) => StatusCode::CONFLICT,
                    KenoError::PlayerNotFound(_) => StatusCode::NOT_FOUND,
                    KenoError::PersistenceFailure(_) => StatusCode::BAD_GATEWAY,
                    KenoError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ErrorBody {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    },
                )
            }
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    kind: "bad_request".to_string(),
                    message,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.session.snapshot();
    let last_result = state
        .session
        .history(1)
        .first()
        .filter(|_| snap.state == RoundState::Settled)
        .map(|o| ResultLabel {
            banner: o.banner().to_string(),
            amount: o.amount_label(),
        });

    Json(StatusResponse {
        player_id: snap.player.id.clone(),
        balance: snap.player.balance,
        games_played: snap.player.games_played,
        games_won: snap.player.games_won,
        win_rate: snap.win_rate,
        state: snap.state,
        selection: snap.selection,
        drawn: snap.drawn,
        bet_amount: snap.bet_amount,
        round_active: state.session.is_round_active(),
        last_result,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/rounds?limit=N
pub async fn get_rounds(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<RoundOutcome>> {
    Json(state.session.history(query.limit()))
}

/// GET /api/events?limit=N
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<LoggedEvent>> {
    Json(state.events.recent(query.limit()))
}

/// POST /api/selection/:number
pub async fn toggle_selection(
    State(state): State<AppState>,
    Path(number): Path<u8>,
) -> Result<Json<EngineSnapshot>, ApiError> {
    debug!(number, "Toggle requested");
    Ok(Json(state.session.toggle_selection(number).await?))
}

/// POST /api/bet
pub async fn set_bet(
    State(state): State<AppState>,
    Json(req): Json<BetRequest>,
) -> Result<Json<EngineSnapshot>, ApiError> {
    let snap = match (req.amount, req.multiplier) {
        (Some(amount), None) => state.session.set_bet_amount(amount).await?,
        (None, Some(multiplier)) => state.session.adjust_bet(multiplier).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "expected exactly one of `amount` or `multiplier`".to_string(),
            ))
        }
    };
    Ok(Json(snap))
}

/// POST /api/round
///
/// Plays a whole round and responds once it has settled. The body is
/// optional; without a `bet` the current bet amount is used.
pub async fn play_round(
    State(state): State<AppState>,
    body: Option<Json<RoundRequest>>,
) -> Result<Json<RoundOutcome>, ApiError> {
    let bet = body.and_then(|Json(req)| req.bet);
    Ok(Json(state.session.play_round(bet).await?))
}

/// POST /api/reset
pub async fn reset(State(state): State<AppState>) -> Result<Json<EngineSnapshot>, ApiError> {
    Ok(Json(state.session.reset_for_new_selection().await?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
