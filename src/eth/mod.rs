pub mod abi;
pub mod address;
pub mod tx;

use std::time::Duration;

use jsonrpsee::core::ClientError;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;

use self::abi::{decode_hex_blob, parse_quantity, to_quantity};
use self::address::Address;

#[derive(Debug, Error)]
pub enum EthError {
    #[error("RPC call {method} failed: {source}")]
    Rpc {
        method: &'static str,
        #[source]
        source: ClientError,
    },
    #[error("Transaction {tx_hash} unconfirmed after {waited_ms}ms")]
    ConfirmTimeout { tx_hash: String, waited_ms: u64 },
    #[error("Malformed RPC response: {0}")]
    Decode(String),
}

impl EthError {
    fn rpc(method: &'static str, source: ClientError) -> Self {
        Self::Rpc { method, source }
    }

    fn decode(detail: impl Into<String>) -> Self {
        Self::Decode(detail.into())
    }
}

/// Thin Ethereum JSON-RPC client over HTTP.
///
/// Every call carries the configured request timeout; receipt confirmation
/// additionally has its own bounded polling deadline, so no request can hang
/// on a stuck transaction.
#[derive(Clone)]
pub struct EthClient {
    inner: HttpClient,
    timeout: Duration,
}

impl EthClient {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        assert!(!endpoint.is_empty(), "RPC endpoint must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .map_err(|err| anyhow::anyhow!("Failed to build RPC client for {endpoint}: {err}"))?;

        Ok(Self {
            inner: client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `eth_call` against the latest block; returns the raw return data.
    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, EthError> {
        let request = CallRequest {
            to: to.to_lowercase_hex(),
            data: format!("0x{}", hex::encode(data)),
        };
        let response: String = self
            .inner
            .request("eth_call", rpc_params![request, "latest"])
            .await
            .map_err(|err| EthError::rpc("eth_call", err))?;
        decode_hex_blob(&response).map_err(|err| EthError::decode(err.to_string()))
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, EthError> {
        let logs: Vec<LogEntry> = self
            .inner
            .request("eth_getLogs", rpc_params![filter])
            .await
            .map_err(|err| EthError::rpc("eth_getLogs", err))?;
        assert!(
            logs.len() <= 100_000,
            "Log batch exceeds defensive limit"
        );
        Ok(logs)
    }

    /// Nonce of an account including pending transactions.
    pub async fn transaction_count(&self, account: Address) -> Result<u128, EthError> {
        let response: String = self
            .inner
            .request(
                "eth_getTransactionCount",
                rpc_params![account.to_lowercase_hex(), "pending"],
            )
            .await
            .map_err(|err| EthError::rpc("eth_getTransactionCount", err))?;
        parse_quantity(&response).map_err(|err| EthError::decode(err.to_string()))
    }

    pub async fn gas_price(&self) -> Result<u128, EthError> {
        let response: String = self
            .inner
            .request("eth_gasPrice", rpc_params![])
            .await
            .map_err(|err| EthError::rpc("eth_gasPrice", err))?;
        parse_quantity(&response).map_err(|err| EthError::decode(err.to_string()))
    }

    /// Submits raw signed transaction bytes; returns the transaction hash.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, EthError> {
        let response: String = self
            .inner
            .request(
                "eth_sendRawTransaction",
                rpc_params![format!("0x{}", hex::encode(raw))],
            )
            .await
            .map_err(|err| EthError::rpc("eth_sendRawTransaction", err))?;
        if !response.starts_with("0x") || response.len() != 66 {
            return Err(EthError::decode(format!(
                "Unexpected transaction hash {response}"
            )));
        }
        Ok(response)
    }

    /// Polls for a transaction receipt until `deadline` elapses.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: &str,
        deadline: Duration,
        poll_interval: Duration,
    ) -> Result<TxReceipt, EthError> {
        assert!(
            poll_interval >= Duration::from_millis(100),
            "Receipt poll interval must be >= 100ms"
        );
        let started = tokio::time::Instant::now();
        loop {
            let receipt: Option<TxReceipt> = self
                .inner
                .request("eth_getTransactionReceipt", rpc_params![tx_hash])
                .await
                .map_err(|err| EthError::rpc("eth_getTransactionReceipt", err))?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            if started.elapsed() >= deadline {
                return Err(EthError::ConfirmTimeout {
                    tx_hash: tx_hash.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            sleep(poll_interval).await;
        }
    }
}

#[derive(Debug, Serialize)]
struct CallRequest {
    to: String,
    data: String,
}

/// `eth_getLogs` filter. `None` topic slots match anything.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<Option<String>>,
    pub from_block: String,
    pub to_block: String,
}

impl LogFilter {
    pub fn for_event(
        contract: Address,
        topics: Vec<Option<String>>,
        from_block: u64,
    ) -> Self {
        Self {
            address: contract.to_lowercase_hex(),
            topics,
            from_block: to_quantity(u128::from(from_block)),
            to_block: "latest".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub topics: Vec<String>,
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl TxReceipt {
    /// Post-Byzantium receipts carry `0x1` for success.
    pub fn succeeded(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1"))
    }
}
