//! In-memory ledger for unit tests
//!
//! Follows the request contracts' rules: requests are appended at the tail and
//! `write_settlement` only accepts an ordered prefix of the pending list,
//! removing it on success. Failures can be scripted per operation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::error::LedgerError;
use crate::ledger::{LedgerClient, RequestFeed, RequestNotice};
use crate::types::{PendingBatch, TxRef};

pub fn addr(b: u8) -> Address {
    Address::repeat_byte(b)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferCall {
    pub destinations: Vec<Address>,
    pub amounts: Vec<U256>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementCall {
    pub origins: Vec<Address>,
    pub destinations: Vec<Address>,
    pub amounts: Vec<U256>,
    pub proof: TxRef,
}

#[derive(Default)]
struct State {
    pending: Vec<(Address, Address, U256)>,
    transfers: Vec<TransferCall>,
    settlements: Vec<SettlementCall>,
    pending_reads: usize,
    nonce: u64,
    read_delay: Duration,
    read_failures: VecDeque<LedgerError>,
    transfer_failures: VecDeque<LedgerError>,
    settlement_failures: VecDeque<LedgerError>,
    events: Vec<RequestNotice>,
    head: u64,
    feed_failures: usize,
    event_queries: usize,
}

pub struct MockLedger {
    name: &'static str,
    account: Address,
    state: Mutex<State>,
}

impl MockLedger {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            account: addr(0xee),
            state: Mutex::new(State::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_request(&self, origin: Address, destination: Address, amount: u64) {
        self.state()
            .pending
            .push((origin, destination, U256::from(amount)));
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn transfers(&self) -> Vec<TransferCall> {
        self.state().transfers.clone()
    }

    pub fn settlements(&self) -> Vec<SettlementCall> {
        self.state().settlements.clone()
    }

    pub fn pending_reads(&self) -> usize {
        self.state().pending_reads
    }

    /// Every `pending_list` call sleeps this long first
    pub fn set_read_delay(&self, delay: Duration) {
        self.state().read_delay = delay;
    }

    pub fn fail_next_read(&self, error: LedgerError) {
        self.state().read_failures.push_back(error);
    }

    pub fn fail_next_transfer(&self, error: LedgerError) {
        self.state().transfer_failures.push_back(error);
    }

    pub fn fail_next_settlement(&self, error: LedgerError) {
        self.state().settlement_failures.push_back(error);
    }

    /// Record a request and emit its notification in `block`
    pub fn record_request(&self, origin: Address, destination: Address, amount: u64, block: u64) {
        let mut state = self.state();
        state
            .pending
            .push((origin, destination, U256::from(amount)));
        state.events.push(RequestNotice {
            origin_account: origin,
            destination_account: destination,
            amount: U256::from(amount),
            block_number: block,
        });
        state.head = state.head.max(block);
    }

    pub fn set_head(&self, block: u64) {
        self.state().head = block;
    }

    /// The next `count` feed calls fail
    pub fn fail_feed(&self, count: usize) {
        self.state().feed_failures = count;
    }

    pub fn event_queries(&self) -> usize {
        self.state().event_queries
    }

    fn take_feed_failure(&self) -> Option<LedgerError> {
        let mut state = self.state();
        if state.feed_failures > 0 {
            state.feed_failures -= 1;
            Some(LedgerError::read(self.name, "feed connection reset"))
        } else {
            None
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn name(&self) -> &str {
        self.name
    }

    fn account(&self) -> Address {
        self.account
    }

    async fn pending_list(&self) -> Result<PendingBatch, LedgerError> {
        let delay = {
            let mut state = self.state();
            state.pending_reads += 1;
            state.read_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(error) = state.read_failures.pop_front() {
            return Err(error);
        }
        let (origins, rest): (Vec<_>, Vec<_>) =
            state.pending.iter().map(|(o, d, a)| (*o, (*d, *a))).unzip();
        let (destinations, amounts) = rest.into_iter().unzip();
        PendingBatch::from_columns(self.name, origins, destinations, amounts)
    }

    async fn submit_transfer(
        &self,
        destinations: &[Address],
        amounts: &[U256],
    ) -> Result<Option<TxRef>, LedgerError> {
        if destinations.len() != amounts.len() {
            return Err(LedgerError::InvalidInput {
                chain: self.name.to_string(),
                message: "unpaired columns".to_string(),
            });
        }
        if destinations.is_empty() {
            return Ok(None);
        }

        let mut state = self.state();
        if let Some(error) = state.transfer_failures.pop_front() {
            return Err(error);
        }
        state.nonce += 1;
        state.transfers.push(TransferCall {
            destinations: destinations.to_vec(),
            amounts: amounts.to_vec(),
        });
        Ok(Some(TxRef(B256::left_padding_from(&state.nonce.to_be_bytes()))))
    }

    async fn write_settlement(
        &self,
        origins: &[Address],
        destinations: &[Address],
        amounts: &[U256],
        proof: TxRef,
    ) -> Result<(), LedgerError> {
        let mut state = self.state();
        if let Some(error) = state.settlement_failures.pop_front() {
            return Err(error);
        }

        if origins.len() > state.pending.len() {
            return Err(LedgerError::rejected(
                self.name,
                "input array length can not be bigger than request list length on the contract",
            ));
        }
        let matches = origins
            .iter()
            .zip(destinations)
            .zip(amounts)
            .zip(state.pending.iter())
            .all(|(((o, d), a), p)| (*o, *d, *a) == *p);
        if !matches || origins.len() != destinations.len() || origins.len() != amounts.len() {
            return Err(LedgerError::rejected(
                self.name,
                "input should be matched with pending list on the contract",
            ));
        }

        state.pending.drain(..origins.len());
        state.nonce += 1;
        state.settlements.push(SettlementCall {
            origins: origins.to_vec(),
            destinations: destinations.to_vec(),
            amounts: amounts.to_vec(),
            proof,
        });
        Ok(())
    }

    async fn next_sequence_number(&self, _account: Address) -> Result<u64, LedgerError> {
        Ok(self.state().nonce)
    }
}

#[async_trait]
impl RequestFeed for MockLedger {
    fn name(&self) -> &str {
        self.name
    }

    async fn latest_block(&self) -> Result<u64, LedgerError> {
        if let Some(error) = self.take_feed_failure() {
            return Err(error);
        }
        Ok(self.state().head)
    }

    async fn request_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RequestNotice>, LedgerError> {
        if let Some(error) = self.take_feed_failure() {
            return Err(error);
        }
        let mut state = self.state();
        state.event_queries += 1;
        Ok(state
            .events
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }
}
