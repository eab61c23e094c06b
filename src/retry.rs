//! Error classification and reconnect backoff
//!
//! Ledger nodes report failures as free-form strings (JSON-RPC messages and
//! revert reasons). These helpers map them onto [`SubmissionClass`] and decide
//! whether a settlement failure is the ledger refusing the batch.

use std::time::Duration;

use crate::error::SubmissionClass;

/// Backoff used when re-establishing a notification stream
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Revert reasons the request contracts use when a settlement batch is not an
/// ordered prefix of their pending list
const SETTLEMENT_MISMATCH: &[&str] = &[
    "input should be matched with pending list",
    "input array length can not be bigger than request list length",
    "input array length",
];

/// Revert reasons that will not clear without a human looking at the batch
const STRUCTURAL: &[&str] = &[
    "cannot be zero",
    "zero address",
    "caller is not the owner",
    "not the owner",
    "does not have",
    "not minter",
    "invalid signature",
    "length mismatch",
    "array length",
    "invalid parameters",
];

/// Classify a submission failure message
pub fn classify_submission(error: &str) -> SubmissionClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("nonce too low")
        || error_lower.contains("already known")
        || error_lower.contains("known transaction")
        || error_lower.contains("nonce too high")
    {
        return SubmissionClass::StaleNonce;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("intrinsic gas")
        || error_lower.contains("gas required exceeds")
        || error_lower.contains("failed to estimate gas")
    {
        return SubmissionClass::Fee;
    }

    if error_lower.contains("revert") {
        if STRUCTURAL.iter().any(|p| error_lower.contains(p)) {
            return SubmissionClass::Structural;
        }
        return SubmissionClass::Reverted;
    }

    SubmissionClass::Transient
}

/// True when the origin ledger refused the settlement input itself
pub fn is_settlement_mismatch(error: &str) -> bool {
    let error_lower = error.to_lowercase();
    SETTLEMENT_MISMATCH.iter().any(|p| error_lower.contains(p))
}
