//! Coin chain binding (chain A)
//!
//! Requests live in the `CoinToHPoint` contract, which also pays out coin for
//! point-side requests via `emitErc20Token`.
//!
//! # Transaction Building
//!
//! Uses `ProviderBuilder::with_recommended_fillers()` so gas limit and EIP-1559
//! fees are estimated by the node; estimation surfaces revert reasons before
//! anything is broadcast. The nonce is always set explicitly from a fresh
//! `eth_getTransactionCount` taken under the submission lock.

use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Url;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::contracts::CoinToHPoint;
use super::{
    await_confirmation, bounded_read, bounded_send, ensure_paired, LedgerClient, RequestFeed,
    RequestNotice, Timeouts,
};
use crate::config::CoinConfig;
use crate::error::{LedgerError, Operation};
use crate::types::{PendingBatch, TxRef};

pub const CHAIN_NAME: &str = "coin";

pub struct CoinLedger {
    rpc_url: Url,
    chain_id: u64,
    bridge_address: Address,
    signer: PrivateKeySigner,
    provider: RootProvider<Http<Client>>,
    timeouts: Timeouts,
    /// Serializes this account's transactions
    submit_lock: Mutex<()>,
}

impl CoinLedger {
    pub fn new(config: &CoinConfig, timeouts: Timeouts) -> Result<Self> {
        let rpc_url: Url = config.rpc_url.parse().wrap_err("Invalid COIN_RPC_URL")?;
        let bridge_address =
            Address::from_str(&config.bridge_address).wrap_err("Invalid coin bridge address")?;
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .wrap_err("Invalid coin private key")?;
        let provider = ProviderBuilder::new().on_http(rpc_url.clone());

        info!(
            chain = CHAIN_NAME,
            relay_address = %signer.address(),
            chain_id = config.chain_id,
            bridge_address = %bridge_address,
            "Coin ledger initialized"
        );

        Ok(Self {
            rpc_url,
            chain_id: config.chain_id,
            bridge_address,
            signer,
            provider,
            timeouts,
            submit_lock: Mutex::new(()),
        })
    }

    /// Fail start-up when the node serves a different chain than configured
    pub async fn verify_chain_id(&self) -> Result<()> {
        let reported = bounded_read(
            CHAIN_NAME,
            Operation::ChainId,
            self.timeouts.read,
            self.provider.get_chain_id(),
        )
        .await?;
        if reported != self.chain_id {
            return Err(eyre!(
                "coin node reports chain id {} but COIN_CHAIN_ID is {}",
                reported,
                self.chain_id
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for CoinLedger {
    fn name(&self) -> &str {
        CHAIN_NAME
    }

    fn account(&self) -> Address {
        self.signer.address()
    }

    async fn pending_list(&self) -> Result<PendingBatch, LedgerError> {
        let contract = CoinToHPoint::new(self.bridge_address, &self.provider);
        let call = contract.getPendingList();
        let list = bounded_read(
            CHAIN_NAME,
            Operation::PendingList,
            self.timeouts.read,
            call.call(),
        )
        .await?;

        PendingBatch::from_columns(CHAIN_NAME, list.requesters, list.receivers, list.amounts)
    }

    async fn submit_transfer(
        &self,
        destinations: &[Address],
        amounts: &[U256],
    ) -> Result<Option<TxRef>, LedgerError> {
        ensure_paired(
            CHAIN_NAME,
            &[("destinations", destinations.len()), ("amounts", amounts.len())],
        )?;
        if destinations.is_empty() {
            return Ok(None);
        }

        let _guard = self.submit_lock.lock().await;
        let nonce = self.next_sequence_number(self.account()).await?;

        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());
        let contract = CoinToHPoint::new(self.bridge_address, &provider);

        debug!(
            chain = CHAIN_NAME,
            records = destinations.len(),
            nonce,
            "Submitting emitErc20Token"
        );

        let call = contract
            .emitErc20Token(destinations.to_vec(), amounts.to_vec())
            .nonce(nonce);
        let pending = bounded_send(
            CHAIN_NAME,
            Operation::SubmitTransfer,
            self.timeouts.read,
            call.send(),
        )
        .await?;

        let tx_hash = *pending.tx_hash();
        info!(chain = CHAIN_NAME, tx_hash = %tx_hash, "Transfer sent, waiting for confirmation");

        await_confirmation(
            CHAIN_NAME,
            Operation::SubmitTransfer,
            tx_hash,
            self.timeouts.confirmation,
            pending.get_receipt(),
        )
        .await?;

        Ok(Some(TxRef(tx_hash)))
    }

    async fn write_settlement(
        &self,
        origins: &[Address],
        destinations: &[Address],
        amounts: &[U256],
        proof: TxRef,
    ) -> Result<(), LedgerError> {
        ensure_paired(
            CHAIN_NAME,
            &[
                ("origins", origins.len()),
                ("destinations", destinations.len()),
                ("amounts", amounts.len()),
            ],
        )?;

        let _guard = self.submit_lock.lock().await;
        let nonce = self.next_sequence_number(self.account()).await?;

        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());
        let contract = CoinToHPoint::new(self.bridge_address, &provider);

        debug!(
            chain = CHAIN_NAME,
            records = origins.len(),
            proof = %proof,
            nonce,
            "Submitting addTxHash"
        );

        let call = contract
            .addTxHash(
                origins.to_vec(),
                destinations.to_vec(),
                amounts.to_vec(),
                proof.as_b256(),
            )
            .nonce(nonce);
        let pending = bounded_send(
            CHAIN_NAME,
            Operation::WriteSettlement,
            self.timeouts.read,
            call.send(),
        )
        .await?;

        let tx_hash = *pending.tx_hash();
        info!(chain = CHAIN_NAME, tx_hash = %tx_hash, "Settlement sent, waiting for confirmation");

        await_confirmation(
            CHAIN_NAME,
            Operation::WriteSettlement,
            tx_hash,
            self.timeouts.confirmation,
            pending.get_receipt(),
        )
        .await
    }

    async fn next_sequence_number(&self, account: Address) -> Result<u64, LedgerError> {
        bounded_read(
            CHAIN_NAME,
            Operation::SequenceNumber,
            self.timeouts.read,
            self.provider.get_transaction_count(account).pending(),
        )
        .await
    }
}

#[async_trait]
impl RequestFeed for CoinLedger {
    fn name(&self) -> &str {
        CHAIN_NAME
    }

    async fn latest_block(&self) -> Result<u64, LedgerError> {
        bounded_read(
            CHAIN_NAME,
            Operation::RequestEvents,
            self.timeouts.read,
            self.provider.get_block_number(),
        )
        .await
    }

    async fn request_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RequestNotice>, LedgerError> {
        let contract = CoinToHPoint::new(self.bridge_address, &self.provider);
        let filter = contract
            .RequestRecorded_filter()
            .from_block(from_block)
            .to_block(to_block);
        let events = bounded_read(
            CHAIN_NAME,
            Operation::RequestEvents,
            self.timeouts.read,
            filter.query(),
        )
        .await?;

        Ok(events
            .into_iter()
            .map(|(event, log)| RequestNotice {
                origin_account: event.requester,
                destination_account: event.toAddrOnKlaytn,
                amount: event.amount,
                block_number: log.block_number.unwrap_or(to_block),
            })
            .collect())
    }
}
