//! Raw JSON-RPC client for methods alloy has no typed binding for
//!
//! The point chain is Klaytn/Kaia, whose account nonce lives behind
//! `klay_getTransactionCount`.

use std::time::Duration;

use alloy::primitives::Address;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{LedgerError, Operation};

/// JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Clone)]
pub struct JsonRpcClient {
    chain: String,
    rpc_url: String,
    client: Client,
    timeout: Duration,
}

impl JsonRpcClient {
    pub fn new(chain: &str, rpc_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::read(chain, format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            chain: chain.to_string(),
            rpc_url: rpc_url.to_string(),
            client,
            timeout,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        operation: Operation,
    ) -> Result<T, LedgerError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::timeout(&self.chain, operation, self.timeout)
                } else {
                    LedgerError::read(&self.chain, format!("{} request failed: {}", method, e))
                }
            })?
            .json::<RpcResponse<T>>()
            .await
            .map_err(|e| LedgerError::read(&self.chain, format!("{} bad response: {}", method, e)))?;

        if let Some(error) = response.error {
            return Err(LedgerError::read(
                &self.chain,
                format!("{} RPC error: {} - {}", method, error.code, error.message),
            ));
        }

        response
            .result
            .ok_or_else(|| LedgerError::read(&self.chain, format!("{} returned no result", method)))
    }

    /// `klay_getTransactionCount(account, "pending")`
    pub async fn klay_transaction_count(&self, account: Address) -> Result<u64, LedgerError> {
        let hex: String = self
            .call(
                "klay_getTransactionCount",
                serde_json::json!([format!("{:#x}", account), "pending"]),
                Operation::SequenceNumber,
            )
            .await?;
        parse_quantity(&hex).map_err(|e| LedgerError::read(&self.chain, e))
    }
}

/// Parse a hex quantity (`0x1a`) as returned by JSON-RPC
pub fn parse_quantity(hex: &str) -> Result<u64, String> {
    let digits = hex
        .strip_prefix("0x")
        .ok_or_else(|| format!("quantity {:?} is missing 0x prefix", hex))?;
    if digits.is_empty() {
        return Err("empty quantity".to_string());
    }
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {:?}: {}", hex, e))
}
