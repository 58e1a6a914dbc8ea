//! Node RPC capability and its JSON-RPC over HTTP implementation.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, TxHash};
use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use crate::config::RpcConfig;

/// Timeout for a single RPC request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of a receipt query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// Known to the node but not mined yet.
    Pending,
    /// Mined successfully, creating a contract at the address.
    Mined(Address),
    /// Mined, but execution reverted.
    Reverted,
    /// The node no longer knows the transaction.
    Dropped,
}

/// The node operations the deployment pipeline relies on.
pub trait RpcClient: Send + Sync {
    /// Submit a contract creation transaction carrying `bytecode`.
    fn submit_transaction(
        &self,
        bytecode: &str,
    ) -> impl Future<Output = anyhow::Result<TxHash>> + Send;

    /// Query the current state of `tx_hash`.
    fn get_receipt(
        &self,
        tx_hash: &TxHash,
    ) -> impl Future<Output = anyhow::Result<ReceiptStatus>> + Send;

    /// Current block height, used as a liveness probe.
    fn get_block_number(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// An `error` member in the response is turned into an error carrying the
/// node's message.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> anyhow::Result<T> {
    let response = client
        .post(url.clone())
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {method} request"))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {method} response"))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error from {method}: {}",
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .with_context(|| format!("No result in {method} response"))?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {method} result"))
}

/// Poll `check_fn` until it succeeds or `timeout` elapses.
pub async fn wait_until_ready<F, Fut>(name: &str, timeout: Duration, check_fn: F) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let start = tokio::time::Instant::now();

    loop {
        let err = match check_fn().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if start.elapsed() >= timeout {
            return Err(err.context(format!("Timeout waiting for {name} to be ready")));
        }

        tracing::trace!(error = %err, service = %name, "Readiness check failed, retrying...");
        tokio::time::sleep(READY_POLL_INTERVAL.min(timeout)).await;
    }
}

/// Receipt fields the pipeline reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<Address>,
}

impl TransactionReceipt {
    fn reverted(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x0" | "0x00"))
    }
}

/// [`RpcClient`] talking JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: Url,
    from: Address,
    gas: u64,
}

impl JsonRpcClient {
    /// Connect to the endpoint of `config`.
    ///
    /// Without a configured sender, the node's coinbase account is used.
    pub async fn connect(config: &RpcConfig) -> anyhow::Result<Self> {
        let client = create_client()?;

        let from = match config.from {
            Some(from) => from,
            None => json_rpc_call(&client, &config.url, "eth_coinbase", vec![])
                .await
                .context("Failed to resolve default sender account")?,
        };

        tracing::debug!(url = %config.url, %from, gas = config.gas, "Connected to RPC endpoint");

        Ok(Self {
            client,
            url: config.url.clone(),
            from,
            gas: config.gas,
        })
    }

    pub fn from_address(&self) -> Address {
        self.from
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> anyhow::Result<T> {
        json_rpc_call(&self.client, &self.url, method, params).await
    }
}

impl RpcClient for JsonRpcClient {
    async fn submit_transaction(&self, bytecode: &str) -> anyhow::Result<TxHash> {
        let data = if bytecode.starts_with("0x") {
            bytecode.to_string()
        } else {
            format!("0x{bytecode}")
        };

        let tx = json!({
            "from": self.from,
            "data": data,
            "gas": format!("{:#x}", self.gas),
        });

        self.call("eth_sendTransaction", vec![tx]).await
    }

    async fn get_receipt(&self, tx_hash: &TxHash) -> anyhow::Result<ReceiptStatus> {
        let receipt: Option<TransactionReceipt> = self
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;

        let Some(receipt) = receipt else {
            // No receipt yet: pending if the node still knows the transaction.
            let known: Option<Value> = self
                .call("eth_getTransactionByHash", vec![json!(tx_hash)])
                .await?;
            return Ok(match known {
                Some(_) => ReceiptStatus::Pending,
                None => ReceiptStatus::Dropped,
            });
        };

        if receipt.reverted() {
            return Ok(ReceiptStatus::Reverted);
        }

        receipt
            .contract_address
            .map(ReceiptStatus::Mined)
            .with_context(|| format!("Receipt of {tx_hash} has no contract address"))
    }

    async fn get_block_number(&self) -> anyhow::Result<u64> {
        let height: String = self.call("eth_blockNumber", vec![]).await?;
        let digits = height.trim_start_matches("0x");
        u64::from_str_radix(digits, 16)
            .with_context(|| format!("Invalid block number returned by node: {height}"))
    }
}
