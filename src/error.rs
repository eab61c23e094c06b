//! Ledger error taxonomy
//!
//! Every ledger binding maps its transport and contract failures onto
//! [`LedgerError`]. The reconciliation cycle decides from the variant (and for
//! submissions, the [`SubmissionClass`]) whether a direction keeps ticking or
//! halts for operator review.

use std::fmt;
use std::time::Duration;

use alloy::primitives::B256;
use thiserror::Error;

/// Ledger operation, used to label timeouts and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    PendingList,
    SubmitTransfer,
    WriteSettlement,
    SequenceNumber,
    RequestEvents,
    /// `eth_call` dry run of a mutation
    Simulate,
    ChainId,
    GasPrice,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::PendingList => "get_pending_list",
            Operation::SubmitTransfer => "submit_transfer",
            Operation::WriteSettlement => "write_settlement",
            Operation::SequenceNumber => "next_sequence_number",
            Operation::RequestEvents => "request_events",
            Operation::Simulate => "simulate",
            Operation::ChainId => "chain_id",
            Operation::GasPrice => "gas_price",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cause of a failed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionClass {
    /// RPC/network trouble before the transaction was accepted
    Transient,
    /// Gas or fee estimation failed, or the fee was too low
    Fee,
    /// Nonce already used; re-fetch on the next attempt
    StaleNonce,
    /// Reverted for a reason that may clear by itself
    Reverted,
    /// Reverted because the request itself is malformed or unauthorized
    Structural,
}

impl SubmissionClass {
    /// Whether the direction must wait for an operator before retrying
    pub fn requires_review(&self) -> bool {
        matches!(self, SubmissionClass::Structural)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionClass::Transient => "transient",
            SubmissionClass::Fee => "fee",
            SubmissionClass::StaleNonce => "stale_nonce",
            SubmissionClass::Reverted => "reverted",
            SubmissionClass::Structural => "structural",
        }
    }
}

/// Errors surfaced by a ledger binding
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Reading ledger state failed; nothing was mutated
    #[error("[{chain}] read failed: {message}")]
    Read { chain: String, message: String },

    /// A mutating call failed before it took effect
    #[error("[{chain}] submission failed ({}): {message}", .class.as_str())]
    Submission {
        chain: String,
        class: SubmissionClass,
        message: String,
    },

    /// The origin ledger refused the settlement batch
    #[error("[{chain}] settlement rejected: {message}")]
    SettlementRejected { chain: String, message: String },

    /// An operation did not complete within its bound
    #[error("[{chain}] {operation} timed out after {after:?}")]
    Timeout {
        chain: String,
        operation: Operation,
        after: Duration,
    },

    /// Transaction was handed to the node but its receipt was never observed
    #[error("[{chain}] {operation} unconfirmed (tx 0x{tx_hash:x}): {message}")]
    Unconfirmed {
        chain: String,
        operation: Operation,
        tx_hash: B256,
        message: String,
    },

    /// Caller passed arguments the ledger call cannot accept
    #[error("[{chain}] invalid input: {message}")]
    InvalidInput { chain: String, message: String },
}

impl LedgerError {
    pub fn read(chain: &str, message: impl fmt::Display) -> Self {
        LedgerError::Read {
            chain: chain.to_string(),
            message: message.to_string(),
        }
    }

    pub fn submission(chain: &str, class: SubmissionClass, message: impl fmt::Display) -> Self {
        LedgerError::Submission {
            chain: chain.to_string(),
            class,
            message: message.to_string(),
        }
    }

    pub fn rejected(chain: &str, message: impl fmt::Display) -> Self {
        LedgerError::SettlementRejected {
            chain: chain.to_string(),
            message: message.to_string(),
        }
    }

    pub fn timeout(chain: &str, operation: Operation, after: Duration) -> Self {
        LedgerError::Timeout {
            chain: chain.to_string(),
            operation,
            after,
        }
    }

    pub fn unconfirmed(
        chain: &str,
        operation: Operation,
        tx_hash: B256,
        message: impl fmt::Display,
    ) -> Self {
        LedgerError::Unconfirmed {
            chain: chain.to_string(),
            operation,
            tx_hash,
            message: message.to_string(),
        }
    }

    /// Chain the error came from
    pub fn chain(&self) -> &str {
        match self {
            LedgerError::Read { chain, .. }
            | LedgerError::Submission { chain, .. }
            | LedgerError::SettlementRejected { chain, .. }
            | LedgerError::Timeout { chain, .. }
            | LedgerError::Unconfirmed { chain, .. }
            | LedgerError::InvalidInput { chain, .. } => chain,
        }
    }

    /// Label for the errors metric
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Read { .. } => "read",
            LedgerError::Submission { .. } => "submission",
            LedgerError::SettlementRejected { .. } => "settlement_rejected",
            LedgerError::Timeout { .. } => "timeout",
            LedgerError::Unconfirmed { .. } => "unconfirmed",
            LedgerError::InvalidInput { .. } => "invalid_input",
        }
    }

    /// True when the ledger may already reflect the mutation. A mutating call
    /// that timed out while sending may have reached the node.
    pub fn possibly_applied(&self) -> bool {
        match self {
            LedgerError::Unconfirmed { .. } => true,
            LedgerError::Timeout { operation, .. } => matches!(
                operation,
                Operation::SubmitTransfer | Operation::WriteSettlement
            ),
            _ => false,
        }
    }

    /// Transaction hash of a broadcast whose outcome is unknown
    pub fn unconfirmed_tx(&self) -> Option<B256> {
        match self {
            LedgerError::Unconfirmed { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_possibly_applied_only_for_mutations() {
        let read = LedgerError::timeout("coin", Operation::PendingList, Duration::from_secs(5));
        let nonce = LedgerError::timeout("coin", Operation::SequenceNumber, Duration::from_secs(5));
        let send = LedgerError::timeout("coin", Operation::SubmitTransfer, Duration::from_secs(5));
        let receipt = LedgerError::unconfirmed(
            "coin",
            Operation::SubmitTransfer,
            B256::repeat_byte(0xab),
            "receipt not observed",
        );

        assert!(!read.possibly_applied());
        assert!(!nonce.possibly_applied());
        assert!(send.possibly_applied());
        assert!(receipt.possibly_applied());
        assert_eq!(receipt.kind(), "unconfirmed");
        assert_eq!(receipt.unconfirmed_tx(), Some(B256::repeat_byte(0xab)));
        assert!(receipt.to_string().contains("0xabab"));
    }

    #[test]
    fn test_display_includes_chain_and_class() {
        let err = LedgerError::submission("point", SubmissionClass::StaleNonce, "nonce too low");
        let msg = err.to_string();
        assert!(msg.contains("[point]"));
        assert!(msg.contains("stale_nonce"));
        assert!(msg.contains("nonce too low"));
    }

    #[test]
    fn test_only_structural_requires_review() {
        assert!(SubmissionClass::Structural.requires_review());
        assert!(!SubmissionClass::Reverted.requires_review());
        assert!(!SubmissionClass::StaleNonce.requires_review());
    }
}
