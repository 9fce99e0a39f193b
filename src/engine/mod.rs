//! Game engine: draws, settlement, and the round state machine.
//!
//! - `draw` produces the unique numbers of a round, one at a time
//! - `accountant` counts matches and moves money on the player record
//! - `round` is the per-player state machine driving a round end to end
//! - `session` shares one engine between tasks and follows the store

pub mod accountant;
pub mod draw;
pub mod round;
pub mod session;

pub use round::{GameRules, RoundEngine};
pub use session::GameSession;
