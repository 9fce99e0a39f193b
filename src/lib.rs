//! KENO: a single-player keno round engine with realtime balance sync.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod dashboard;
pub mod engine;
pub mod payout;
pub mod presenter;
pub mod storage;
pub mod types;
