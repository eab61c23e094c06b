//! Point chain binding (chain B, Klaytn/Kaia)
//!
//! Requests live in `HPointToCoin`; points are minted by calling
//! `KIP7Logic.mintMultiple` on the token proxy address.
//!
//! Transactions are legacy-typed with a fixed gas limit and the node's gas
//! price. The nonce comes from `klay_getTransactionCount(account, "pending")`.
//! Since the gas limit is not estimated, every mutation is simulated with
//! `eth_call` first so a revert is caught before gas is spent.

use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::fillers::ChainIdFiller;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Url;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::contracts::{HPointToCoin, KIP7Logic};
use super::rpc::JsonRpcClient;
use super::{
    await_confirmation, bounded_read, bounded_send, ensure_paired, preflight, LedgerClient,
    RequestFeed, RequestNotice, Timeouts,
};
use crate::config::PointConfig;
use crate::error::{LedgerError, Operation};
use crate::types::{PendingBatch, TxRef};

pub const CHAIN_NAME: &str = "point";

pub struct PointLedger {
    rpc_url: Url,
    chain_id: u64,
    bridge_address: Address,
    token_address: Address,
    signer: PrivateKeySigner,
    gas_limit: u64,
    provider: RootProvider<Http<Client>>,
    klay: JsonRpcClient,
    timeouts: Timeouts,
    submit_lock: Mutex<()>,
}

impl PointLedger {
    pub fn new(config: &PointConfig, timeouts: Timeouts) -> Result<Self> {
        let rpc_url: Url = config.rpc_url.parse().wrap_err("Invalid POINT_RPC_URL")?;
        let bridge_address =
            Address::from_str(&config.bridge_address).wrap_err("Invalid point bridge address")?;
        let token_address =
            Address::from_str(&config.token_address).wrap_err("Invalid point token address")?;
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .wrap_err("Invalid point private key")?;
        let provider = ProviderBuilder::new().on_http(rpc_url.clone());
        let klay = JsonRpcClient::new(CHAIN_NAME, &config.rpc_url, timeouts.read)?;

        info!(
            chain = CHAIN_NAME,
            relay_address = %signer.address(),
            chain_id = config.chain_id,
            bridge_address = %bridge_address,
            token_address = %token_address,
            gas_limit = config.gas_limit,
            "Point ledger initialized"
        );

        Ok(Self {
            rpc_url,
            chain_id: config.chain_id,
            bridge_address,
            token_address,
            signer,
            gas_limit: config.gas_limit,
            provider,
            klay,
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
                "point node reports chain id {} but POINT_CHAIN_ID is {}",
                reported,
                self.chain_id
            ));
        }
        Ok(())
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        bounded_read(
            CHAIN_NAME,
            Operation::GasPrice,
            self.timeouts.read,
            self.provider.get_gas_price(),
        )
        .await
    }
}

#[async_trait]
impl LedgerClient for PointLedger {
    fn name(&self) -> &str {
        CHAIN_NAME
    }

    fn account(&self) -> Address {
        self.signer.address()
    }

    async fn pending_list(&self) -> Result<PendingBatch, LedgerError> {
        let contract = HPointToCoin::new(self.bridge_address, &self.provider);
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
        let gas_price = self.gas_price().await?;
        let nonce = self.next_sequence_number(self.account()).await?;

        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .filler(ChainIdFiller::new(Some(self.chain_id)))
            .wallet(wallet)
            .on_http(self.rpc_url.clone());
        let token = KIP7Logic::new(self.token_address, &provider);

        let call = token
            .mintMultiple(destinations.to_vec(), amounts.to_vec())
            .from(self.account())
            .gas(self.gas_limit)
            .gas_price(gas_price)
            .nonce(nonce);

        preflight(
            CHAIN_NAME,
            Operation::SubmitTransfer,
            self.timeouts.read,
            call.call(),
        )
        .await?;

        debug!(
            chain = CHAIN_NAME,
            records = destinations.len(),
            nonce,
            gas_price,
            "Submitting mintMultiple"
        );

        let pending = bounded_send(
            CHAIN_NAME,
            Operation::SubmitTransfer,
            self.timeouts.read,
            call.send(),
        )
        .await?;

        let tx_hash = *pending.tx_hash();
        info!(chain = CHAIN_NAME, tx_hash = %tx_hash, "Mint sent, waiting for confirmation");

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
        let gas_price = self.gas_price().await?;
        let nonce = self.next_sequence_number(self.account()).await?;

        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .filler(ChainIdFiller::new(Some(self.chain_id)))
            .wallet(wallet)
            .on_http(self.rpc_url.clone());
        let contract = HPointToCoin::new(self.bridge_address, &provider);

        let call = contract
            .addTxHash(
                origins.to_vec(),
                destinations.to_vec(),
                amounts.to_vec(),
                proof.as_b256(),
            )
            .from(self.account())
            .gas(self.gas_limit)
            .gas_price(gas_price)
            .nonce(nonce);

        preflight(
            CHAIN_NAME,
            Operation::WriteSettlement,
            self.timeouts.read,
            call.call(),
        )
        .await?;

        debug!(
            chain = CHAIN_NAME,
            records = origins.len(),
            proof = %proof,
            nonce,
            "Submitting addTxHash"
        );

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
        self.klay.klay_transaction_count(account).await
    }
}

#[async_trait]
impl RequestFeed for PointLedger {
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
        let contract = HPointToCoin::new(self.bridge_address, &self.provider);
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
                destination_account: event.toAddrOnCoin,
                amount: event.amount,
                block_number: log.block_number.unwrap_or(to_block),
            })
            .collect())
    }
}
