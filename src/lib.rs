//! codeboard - realtime collaborative voting board
//!
//! Clients connect over WebSocket, receive the full board once and then a
//! stream of deltas. Each origin address is one identity, which may vote once
//! per code and post one entry.
//!
//! ## Modules
//!
//! - **identity**: origin derivation and the per-identity vote ledger
//! - **db**: MongoDB and in-memory stores for codes and identities
//! - **coordinator**: vote, post and delete rules under per-code locks
//! - **relay**: wire events and the broadcast hub
//! - **server**: HTTP listener, WebSocket sessions, event dispatch

pub mod config;
pub mod coordinator;
pub mod db;
pub mod identity;
pub mod relay;
pub mod server;
pub mod session;
pub mod types;

pub use config::Args;
pub use coordinator::{Coordinator, VoteDirection, VoteOutcome};
pub use server::{run, AppState};
pub use types::{BoardError, Result};
