//! Value types synchronized between the two ledgers
//!
//! A [`PendingBatch`] is read fresh from a ledger on every cycle and carries the
//! records in the exact order the origin ledger stores them. That order is what
//! the origin ledger later demands back when the settlement proof is written.

use std::fmt;

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

// ============================================================================
// Directions
// ============================================================================

/// One of the two relay directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Requests recorded on the coin chain, minted on the point chain
    CoinToPoint,
    /// Requests recorded on the point chain, emitted on the coin chain
    PointToCoin,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::CoinToPoint, Direction::PointToCoin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::CoinToPoint => "coin-to-point",
            Direction::PointToCoin => "point-to-coin",
        }
    }

    /// Parse the kebab-case form used in URLs and metrics labels
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coin-to-point" => Some(Direction::CoinToPoint),
            "point-to-coin" => Some(Direction::PointToCoin),
            _ => None,
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            Direction::CoinToPoint => Direction::PointToCoin,
            Direction::PointToCoin => Direction::CoinToPoint,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records and batches
// ============================================================================

/// A single pending transfer request as stored by the origin ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Account that locked/burned value on the origin ledger
    pub origin_account: Address,
    /// Account credited on the destination ledger
    pub destination_account: Address,
    pub amount: U256,
    /// Zero-based index in the origin ledger's pending list at read time
    pub position: u64,
}

impl RequestRecord {
    pub fn new(origin: Address, destination: Address, amount: U256, position: u64) -> Self {
        Self {
            origin_account: origin,
            destination_account: destination,
            amount,
            position,
        }
    }

    /// Same request, ignoring where it sat in the list
    pub fn same_request(&self, other: &RequestRecord) -> bool {
        self.origin_account == other.origin_account
            && self.destination_account == other.destination_account
            && self.amount == other.amount
    }
}

impl fmt::Display for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} -> {} ({})",
            self.position, self.origin_account, self.destination_account, self.amount
        )
    }
}

/// Ordered snapshot of one ledger's unsettled requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    records: Vec<RequestRecord>,
}

impl PendingBatch {
    pub fn new(records: Vec<RequestRecord>) -> Self {
        Self { records }
    }

    /// Build a batch from the three positionally paired columns returned by
    /// `getPendingList()`. Positions are assigned from list order.
    pub fn from_columns(
        chain: &str,
        origins: Vec<Address>,
        destinations: Vec<Address>,
        amounts: Vec<U256>,
    ) -> Result<Self, LedgerError> {
        if origins.len() != destinations.len() || origins.len() != amounts.len() {
            return Err(LedgerError::Read {
                chain: chain.to_string(),
                message: format!(
                    "pending list columns differ in length: {} origins, {} destinations, {} amounts",
                    origins.len(),
                    destinations.len(),
                    amounts.len()
                ),
            });
        }

        let records = origins
            .into_iter()
            .zip(destinations)
            .zip(amounts)
            .enumerate()
            .map(|(i, ((origin, destination), amount))| {
                RequestRecord::new(origin, destination, amount, i as u64)
            })
            .collect();

        Ok(Self { records })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RequestRecord> {
        self.records
    }

    /// The first `max` records, in order. The rest stay pending on the ledger.
    pub fn capped(&self, max: usize) -> PendingBatch {
        PendingBatch {
            records: self.records.iter().take(max).cloned().collect(),
        }
    }

    pub fn origins(&self) -> Vec<Address> {
        self.records.iter().map(|r| r.origin_account).collect()
    }

    pub fn destinations(&self) -> Vec<Address> {
        self.records.iter().map(|r| r.destination_account).collect()
    }

    pub fn amounts(&self) -> Vec<U256> {
        self.records.iter().map(|r| r.amount).collect()
    }

    /// Split into the column form used by the ledger calls, preserving index order
    pub fn columns(&self) -> SettlementColumns {
        SettlementColumns {
            origins: self.origins(),
            destinations: self.destinations(),
            amounts: self.amounts(),
        }
    }

    /// True when this batch matches the head of `other`, record for record
    pub fn is_prefix_of(&self, other: &PendingBatch) -> bool {
        self.records.len() <= other.records.len()
            && self
                .records
                .iter()
                .zip(other.records.iter())
                .all(|(a, b)| a.same_request(b))
    }

    /// Sum of all amounts, saturating
    pub fn total_amount(&self) -> U256 {
        self.records
            .iter()
            .fold(U256::ZERO, |acc, r| acc.saturating_add(r.amount))
    }
}

/// Column form of a batch: the shape both `submitTransfer` and
/// `writeSettlement` take on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementColumns {
    pub origins: Vec<Address>,
    pub destinations: Vec<Address>,
    pub amounts: Vec<U256>,
}

// ============================================================================
// Settlement proof
// ============================================================================

/// Transaction reference produced by the destination ledger for a whole batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxRef(pub B256);

impl TxRef {
    pub fn as_b256(&self) -> B256 {
        self.0
    }
}

impl From<B256> for TxRef {
    fn from(hash: B256) -> Self {
        TxRef(hash)
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}
