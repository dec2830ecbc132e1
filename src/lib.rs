// Tradeflow - daily container orchestration for the trading stack
// Sequences the trading-day units inside a weekly window and rotates
// their csv and database backups onto a remote SMB share.

#![deny(clippy::unwrap_used)]

pub mod backup;
pub mod cli;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod remote;
pub mod reports;
pub mod units;

// Re-export commonly used items
pub use config::Config;
pub use errors::{OrchestratorError, RemoteError, TransferError, UnitError};
pub use orchestrator::{Orchestrator, OrchestratorContext};
