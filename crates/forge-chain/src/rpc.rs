//! HTTP JSON-RPC 2.0 wallet provider (`eth_*` methods).

use crate::client::TransactionReceipt;
use crate::provider::{TransactionRequest, WalletProvider};
use crate::{ChainError, Result};
use async_trait::async_trait;
use forge_types::{Address, TxHash, Wei};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// EIP-1193 "user rejected request"
pub const USER_REJECTED_CODE: i64 = 4001;
const METHOD_NOT_FOUND_CODE: i64 = -32601;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    gas_used: String,
    status: Option<String>,
}

pub struct JsonRpcProvider {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        debug!(method, id, "JSON-RPC request");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::Transport(format!("{} timed out", method))
                } else {
                    ChainError::Transport(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!("HTTP error: {}", status)));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Transport(format!("failed to parse response: {}", e)))?;

        if let Some(error) = body.error {
            return Err(map_rpc_error(error.code, error.message));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

/// Keep provider codes intact except where a typed variant exists
pub fn map_rpc_error(code: i64, message: String) -> ChainError {
    if code == USER_REJECTED_CODE {
        return ChainError::UserRejected;
    }
    let lower = message.to_lowercase();
    if let Some(idx) = lower.find("execution reverted") {
        let reason = message
            .get(idx + "execution reverted".len()..)
            .unwrap_or_default()
            .trim_start_matches(':')
            .trim()
            .to_string();
        return ChainError::Reverted(reason);
    }
    ChainError::Rpc { code, message }
}

pub fn parse_quantity(value: &str) -> Result<u128> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::Abi(format!("quantity without 0x prefix: {}", value)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Abi(format!("invalid quantity {}: {}", value, e)))
}

fn parse_u64_quantity(value: &str) -> Result<u64> {
    u64::try_from(parse_quantity(value)?)
        .map_err(|_| ChainError::Abi(format!("quantity exceeds u64: {}", value)))
}

fn quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

fn parse_bytes(value: &Value) -> Result<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::Abi("expected hex data string".to_string()))?;
    hex::decode(text.strip_prefix("0x").unwrap_or(text))
        .map_err(|e| ChainError::Abi(format!("invalid hex data: {}", e)))
}

fn as_str(value: &Value) -> Result<&str> {
    value
        .as_str()
        .ok_or_else(|| ChainError::Abi(format!("expected string, got {}", value)))
}

fn tx_object(tx: &TransactionRequest) -> Value {
    let mut obj = json!({
        "from": tx.from.to_string(),
        "to": tx.to.to_string(),
        "value": quantity(tx.value.as_wei()),
        "data": format!("0x{}", hex::encode(&tx.data)),
    });
    if let Some(gas) = tx.gas {
        obj["gas"] = Value::String(quantity(gas as u128));
    }
    obj
}

fn parse_receipt(value: Value) -> Result<Option<TransactionReceipt>> {
    if value.is_null() {
        return Ok(None);
    }
    let raw: RpcReceipt = serde_json::from_value(value)
        .map_err(|e| ChainError::Abi(format!("malformed receipt: {}", e)))?;
    // Pending blocks report a null block number
    let Some(block) = raw.block_number else {
        return Ok(None);
    };
    Ok(Some(TransactionReceipt {
        tx_hash: TxHash::parse(&raw.transaction_hash)?,
        block_number: parse_u64_quantity(&block)?,
        gas_used: parse_u64_quantity(&raw.gas_used)?,
        status: raw.status.as_deref() == Some("0x1"),
    }))
}

#[async_trait]
impl WalletProvider for JsonRpcProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let result = match self.request("eth_requestAccounts", json!([])).await {
            Err(ChainError::Rpc { code, .. }) if code == METHOD_NOT_FOUND_CODE => {
                self.request("eth_accounts", json!([])).await?
            }
            other => other?,
        };
        let list = result
            .as_array()
            .ok_or_else(|| ChainError::Abi("accounts must be an array".to_string()))?;
        list.iter()
            .map(|v| Ok(Address::parse(as_str(v)?)?))
            .collect()
    }

    async fn chain_id(&self) -> Result<u64> {
        let result = self.request("eth_chainId", json!([])).await?;
        parse_u64_quantity(as_str(&result)?)
    }

    async fn get_balance(&self, address: &Address) -> Result<Wei> {
        let result = self
            .request("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        Ok(Wei::from_wei(parse_quantity(as_str(&result)?)?))
    }

    async fn get_code(&self, address: &Address) -> Result<Vec<u8>> {
        let result = self
            .request("eth_getCode", json!([address.to_string(), "latest"]))
            .await?;
        parse_bytes(&result)
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        let block = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let timestamp = block
            .get("timestamp")
            .ok_or_else(|| ChainError::Abi("block without timestamp".to_string()))?;
        parse_u64_quantity(as_str(timestamp)?)
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>> {
        let call = json!({
            "to": to.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        });
        let result = self.request("eth_call", json!([call, "latest"])).await?;
        parse_bytes(&result)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        let result = self.request("eth_estimateGas", json!([tx_object(tx)])).await?;
        parse_u64_quantity(as_str(&result)?)
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash> {
        let result = self
            .request("eth_sendTransaction", json!([tx_object(tx)]))
            .await?;
        Ok(TxHash::parse(as_str(&result)?)?)
    }

    async fn get_transaction_receipt(&self, hash: &TxHash) -> Result<Option<TransactionReceipt>> {
        let result = self
            .request("eth_getTransactionReceipt", json!([hash.as_str()]))
            .await?;
        parse_receipt(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            map_rpc_error(4001, "User denied transaction signature".into()),
            ChainError::UserRejected
        );
        assert_eq!(
            map_rpc_error(3, "execution reverted: Only creator".into()),
            ChainError::Reverted("Only creator".into())
        );
        assert_eq!(
            map_rpc_error(-32000, "insufficient funds for gas * price + value".into()),
            ChainError::Rpc {
                code: -32000,
                message: "insufficient funds for gas * price + value".into()
            }
        );
    }

    #[test]
    fn test_quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x6f05b59d3b20000").unwrap(), 500_000_000_000_000_000);
        assert!(parse_quantity("1234").is_err());
        assert_eq!(quantity(255), "0xff");
    }

    #[test]
    fn test_receipt_parsing() {
        let hash = format!("0x{}", "ab".repeat(32));
        let mined = json!({
            "transactionHash": hash,
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
            "status": "0x1",
        });
        let receipt = parse_receipt(mined).unwrap().unwrap();
        assert_eq!(receipt.block_number, 16);
        assert_eq!(receipt.gas_used, 21000);
        assert!(receipt.status);

        let reverted = json!({
            "transactionHash": hash,
            "blockNumber": "0x11",
            "gasUsed": "0x5208",
            "status": "0x0",
        });
        assert!(!parse_receipt(reverted).unwrap().unwrap().status);

        assert_eq!(parse_receipt(Value::Null).unwrap(), None);
    }
}
