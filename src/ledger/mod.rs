//! Ledger capability and the two chain bindings
//!
//! [`LedgerClient`] is the whole surface the reconciliation cycle needs from a
//! ledger. [`RequestFeed`] is the notification side used by the fast path.
//! Each binding owns its own transport and key; nothing is shared between the
//! coin and point chains.

pub mod coin;
pub mod contracts;
pub mod point;
pub mod rpc;

use std::fmt;
use std::future::IntoFuture;
use std::time::Duration;

use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{LedgerError, Operation, SubmissionClass};
use crate::retry::{classify_submission, is_settlement_mismatch};
use crate::types::{PendingBatch, TxRef};

pub use coin::CoinLedger;
pub use point::PointLedger;

/// Read and mutate one ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Short chain name used in logs and metric labels
    fn name(&self) -> &str;

    /// Relay account that signs this ledger's transactions
    fn account(&self) -> Address;

    /// Full ordered backlog of unsettled requests, read fresh every call
    async fn pending_list(&self) -> Result<PendingBatch, LedgerError>;

    /// Issue the mint/emit call for the paired lists as one transaction and
    /// wait for it to confirm. Empty input is a no-op and returns `None`.
    async fn submit_transfer(
        &self,
        destinations: &[Address],
        amounts: &[U256],
    ) -> Result<Option<TxRef>, LedgerError>;

    /// Record `proof` against a prefix of this ledger's pending list
    async fn write_settlement(
        &self,
        origins: &[Address],
        destinations: &[Address],
        amounts: &[U256],
        proof: TxRef,
    ) -> Result<(), LedgerError>;

    /// Current sequence number (nonce) of `account`, including pending txs
    async fn next_sequence_number(&self, account: Address) -> Result<u64, LedgerError>;
}

/// One "request recorded" notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestNotice {
    pub origin_account: Address,
    pub destination_account: Address,
    pub amount: U256,
    pub block_number: u64,
}

/// Source of request notifications
#[async_trait]
pub trait RequestFeed: Send + Sync {
    fn name(&self) -> &str;

    async fn latest_block(&self) -> Result<u64, LedgerError>;

    /// `RequestRecorded` events in `[from_block, to_block]`, in emission order
    async fn request_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RequestNotice>, LedgerError>;
}

// ============================================================================
// Shared helpers for the EVM bindings
// ============================================================================

/// Timeouts applied by a binding
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Reads, nonce fetches and sends
    pub read: Duration,
    /// Receipt waits
    pub confirmation: Duration,
}

/// Reject unpaired column input before touching the network
pub(crate) fn ensure_paired(
    chain: &str,
    columns: &[(&str, usize)],
) -> Result<(), LedgerError> {
    if let Some((first_name, first_len)) = columns.first() {
        for (name, len) in &columns[1..] {
            if len != first_len {
                return Err(LedgerError::InvalidInput {
                    chain: chain.to_string(),
                    message: format!(
                        "{} has {} entries but {} has {}",
                        first_name, first_len, name, len
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Run a read under the read timeout
pub(crate) async fn bounded_read<T, E, F>(
    chain: &str,
    operation: Operation,
    limit: Duration,
    fut: F,
) -> Result<T, LedgerError>
where
    F: IntoFuture<Output = Result<T, E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(LedgerError::read(chain, format!("{}: {}", operation, e))),
        Err(_) => Err(LedgerError::timeout(chain, operation, limit)),
    }
}

/// Send a mutation and hand back the pending transaction. Node errors are classified; a
/// settlement call refused by the contract becomes `SettlementRejected`.
pub(crate) async fn bounded_send<P, E, F>(
    chain: &str,
    operation: Operation,
    limit: Duration,
    fut: F,
) -> Result<P, LedgerError>
where
    F: IntoFuture<Output = Result<P, E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(pending)) => Ok(pending),
        Ok(Err(e)) => Err(send_error(chain, operation, &e.to_string())),
        Err(_) => Err(LedgerError::timeout(chain, operation, limit)),
    }
}

/// Dry-run a mutation with `eth_call` so reverts surface before gas is spent.
/// Failures are classified as if the mutation itself had failed.
pub(crate) async fn preflight<T, E, F>(
    chain: &str,
    operation: Operation,
    limit: Duration,
    fut: F,
) -> Result<(), LedgerError>
where
    F: IntoFuture<Output = Result<T, E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(send_error(chain, operation, &e.to_string())),
        Err(_) => Err(LedgerError::timeout(chain, Operation::Simulate, limit)),
    }
}

/// Map a failed send or simulation onto the taxonomy
pub(crate) fn send_error(chain: &str, operation: Operation, message: &str) -> LedgerError {
    if operation == Operation::WriteSettlement && is_settlement_mismatch(message) {
        return LedgerError::rejected(chain, message);
    }
    LedgerError::submission(chain, classify_submission(message), message)
}

/// Wait for the receipt of a broadcast transaction and check its status
pub(crate) async fn await_confirmation<R, E, F>(
    chain: &str,
    operation: Operation,
    tx_hash: B256,
    limit: Duration,
    fut: F,
) -> Result<(), LedgerError>
where
    R: ReceiptResponse,
    F: IntoFuture<Output = Result<R, E>>,
    E: fmt::Display,
{
    let receipt = match tokio::time::timeout(limit, fut).await {
        Ok(Ok(receipt)) => receipt,
        Ok(Err(e)) => {
            warn!(chain, tx_hash = %tx_hash, error = %e, "Failed to get receipt");
            return Err(LedgerError::unconfirmed(chain, operation, tx_hash, e));
        }
        Err(_) => {
            warn!(chain, tx_hash = %tx_hash, timeout = ?limit, "Receipt not observed in time");
            return Err(LedgerError::unconfirmed(
                chain,
                operation,
                tx_hash,
                format!("no receipt after {:?}", limit),
            ));
        }
    };

    if !receipt.status() {
        let message = format!("transaction 0x{:x} reverted", tx_hash);
        return Err(match operation {
            Operation::WriteSettlement => LedgerError::rejected(chain, message),
            _ => LedgerError::submission(chain, SubmissionClass::Reverted, message),
        });
    }

    debug!(chain, tx_hash = %tx_hash, %operation, "Transaction confirmed");
    Ok(())
}
