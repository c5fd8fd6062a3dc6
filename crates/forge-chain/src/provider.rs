use crate::client::TransactionReceipt;
use crate::Result;
use async_trait::async_trait;
use forge_types::{Address, TxHash, Wei};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Transaction submitted through the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub value: Wei,
    pub data: Vec<u8>,
    pub gas: Option<u64>,
}

/// Wallet / node access used by the funding contract client.
///
/// Mirrors the subset of the Ethereum JSON-RPC surface the contract needs.
/// Errors keep the provider's own code (4001 for a user rejection) so the
/// classifier can tell them apart.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    async fn chain_id(&self) -> Result<u64>;

    async fn get_balance(&self, address: &Address) -> Result<Wei>;

    async fn get_code(&self, address: &Address) -> Result<Vec<u8>>;

    /// Timestamp (unix seconds) of the latest block
    async fn latest_block_timestamp(&self) -> Result<u64>;

    /// Read-only call against the latest state
    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash>;

    async fn get_transaction_receipt(&self, hash: &TxHash) -> Result<Option<TransactionReceipt>>;
}

#[async_trait]
impl<P: WalletProvider + ?Sized> WalletProvider for Arc<P> {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        (**self).request_accounts().await
    }

    async fn chain_id(&self) -> Result<u64> {
        (**self).chain_id().await
    }

    async fn get_balance(&self, address: &Address) -> Result<Wei> {
        (**self).get_balance(address).await
    }

    async fn get_code(&self, address: &Address) -> Result<Vec<u8>> {
        (**self).get_code(address).await
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        (**self).latest_block_timestamp().await
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>> {
        (**self).call(to, data).await
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        (**self).estimate_gas(tx).await
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash> {
        (**self).send_transaction(tx).await
    }

    async fn get_transaction_receipt(&self, hash: &TxHash) -> Result<Option<TransactionReceipt>> {
        (**self).get_transaction_receipt(hash).await
    }
}
