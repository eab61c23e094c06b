//! HPoint relay library
//!
//! Reconciles transfer requests between the coin ledger (`CoinToHPoint`) and
//! the point ledger (`HPointToCoin` plus its KIP-7 token). Each direction
//! reads the origin ledger's pending list, pays the batch out on the
//! destination and writes the destination transaction hash back to the
//! origin, which clears the settled prefix.

pub mod api;
pub mod config;
pub mod cycle;
pub mod error;
pub mod ledger;
pub mod listener;
pub mod metrics;
pub mod relay;
pub mod retry;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use cycle::{CycleReport, ReconciliationCycle};
pub use error::LedgerError;
pub use ledger::{LedgerClient, RequestFeed};
pub use relay::{DirectionGuards, Relay};
pub use types::{Direction, PendingBatch, RequestRecord, TxRef};
