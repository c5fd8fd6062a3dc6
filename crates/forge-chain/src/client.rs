use crate::abi::{self, Token};
use crate::provider::{TransactionRequest, WalletProvider};
use crate::{ChainError, Result};
use async_trait::async_trait;
use forge_types::{Address, ProjectId, TxHash, Wei};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Gas limit headroom over the node's estimate, in percent
const GAS_MARGIN_PERCENT: u64 = 20;

/// Project state as stored by the funding contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainProject {
    pub creator: Address,
    pub target_amount: Wei,
    pub raised_amount: Wei,
    /// Unix seconds
    pub deadline: u64,
    pub is_active: bool,
    pub funds_withdrawn: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    /// `true` when the transaction executed successfully
    pub status: bool,
}

/// A state-changing contract call, used for gas estimation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    CreateProject {
        project_id: ProjectId,
        target: Wei,
        deadline: u64,
    },
    Donate {
        project_id: ProjectId,
        amount: Wei,
        message: String,
    },
    WithdrawFunds {
        project_id: ProjectId,
    },
}

impl ContractCall {
    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::CreateProject { .. } => "createProject",
            ContractCall::Donate { .. } => "donate",
            ContractCall::WithdrawFunds { .. } => "withdrawFunds",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ContractCall::CreateProject {
                project_id,
                target,
                deadline,
            } => abi::encode_call(
                abi::CREATE_PROJECT,
                &[
                    Token::String(project_id.to_string()),
                    Token::Uint(target.as_wei()),
                    Token::Uint(*deadline as u128),
                ],
            ),
            ContractCall::Donate {
                project_id,
                message,
                ..
            } => abi::encode_call(
                abi::DONATE,
                &[
                    Token::String(project_id.to_string()),
                    Token::String(message.clone()),
                ],
            ),
            ContractCall::WithdrawFunds { project_id } => abi::encode_call(
                abi::WITHDRAW_FUNDS,
                &[Token::String(project_id.to_string())],
            ),
        }
    }

    /// ETH attached to the call
    pub fn value(&self) -> Wei {
        match self {
            ContractCall::Donate { amount, .. } => *amount,
            _ => Wei::ZERO,
        }
    }
}

/// Funding contract operations.
///
/// Every state-changing call returns as soon as the transaction is accepted;
/// the hash carries no finality guarantee.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn create_project(&self, project_id: &ProjectId, target: Wei, deadline: u64)
        -> Result<TxHash>;

    async fn donate(&self, project_id: &ProjectId, amount: Wei, message: &str) -> Result<TxHash>;

    async fn withdraw_funds(&self, project_id: &ProjectId) -> Result<TxHash>;

    /// `None` when the contract has no project under this id
    async fn get_project(&self, project_id: &ProjectId) -> Result<Option<OnChainProject>>;

    /// `None` while the transaction is not mined yet
    async fn get_transaction_receipt(&self, hash: &TxHash) -> Result<Option<TransactionReceipt>>;

    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64>;
}

/// Pre-flight checks for a donation. Nothing is submitted unless this passes.
pub fn validate_donation(
    project_id: &ProjectId,
    project: Option<&OnChainProject>,
    amount: Wei,
    balance: Wei,
    now: u64,
) -> Result<()> {
    if amount.is_zero() {
        return Err(ChainError::InvalidAmount("donation must be positive".to_string()));
    }
    let project = project.ok_or_else(|| ChainError::ProjectNotFound(project_id.to_string()))?;
    if !project.is_active {
        return Err(ChainError::ProjectInactive(project_id.to_string()));
    }
    if now >= project.deadline {
        return Err(ChainError::DeadlinePassed {
            project: project_id.to_string(),
            deadline: project.deadline,
        });
    }
    if balance < amount {
        return Err(ChainError::InsufficientFunds {
            needed: amount,
            available: balance,
        });
    }
    Ok(())
}

/// [`ChainClient`] speaking the contract ABI through a [`WalletProvider`]
pub struct FundingContract<P: WalletProvider> {
    provider: P,
    contract: Address,
    expected_chain_id: Option<u64>,
    account: RwLock<Option<Address>>,
}

impl<P: WalletProvider> FundingContract<P> {
    pub fn new(provider: P, contract: Address, expected_chain_id: Option<u64>) -> Self {
        Self {
            provider,
            contract,
            expected_chain_id,
            account: RwLock::new(None),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn contract_address(&self) -> Address {
        self.contract
    }

    /// Request the wallet account, then check the network and the deployment
    pub async fn connect(&self) -> Result<Address> {
        let accounts = self.provider.request_accounts().await?;
        let account = *accounts.first().ok_or(ChainError::WalletNotConnected)?;

        if let Some(expected) = self.expected_chain_id {
            let actual = self.provider.chain_id().await?;
            if actual != expected {
                return Err(ChainError::WrongNetwork { expected, actual });
            }
        }
        self.ensure_deployed().await?;

        *self.account.write().await = Some(account);
        info!(account = %account, contract = %self.contract, "🔗 Wallet connected");
        Ok(account)
    }

    pub async fn account(&self) -> Option<Address> {
        *self.account.read().await
    }

    pub async fn ensure_deployed(&self) -> Result<()> {
        let code = self.provider.get_code(&self.contract).await?;
        if code.is_empty() {
            return Err(ChainError::ContractNotDeployed(self.contract.to_string()));
        }
        Ok(())
    }

    async fn sender(&self) -> Result<Address> {
        self.account().await.ok_or(ChainError::WalletNotConnected)
    }

    async fn submit(&self, call: ContractCall) -> Result<TxHash> {
        let from = self.sender().await?;
        let mut tx = TransactionRequest {
            from,
            to: self.contract,
            value: call.value(),
            data: call.encode(),
            gas: None,
        };
        let estimate = self.provider.estimate_gas(&tx).await?;
        tx.gas = Some(estimate + estimate * GAS_MARGIN_PERCENT / 100);

        let hash = self.provider.send_transaction(&tx).await?;
        debug!(call = call.name(), tx = %hash.short(), gas = ?tx.gas, "Transaction submitted");
        Ok(hash)
    }
}

#[async_trait]
impl<P: WalletProvider> ChainClient for FundingContract<P> {
    async fn create_project(
        &self,
        project_id: &ProjectId,
        target: Wei,
        deadline: u64,
    ) -> Result<TxHash> {
        if target.is_zero() {
            return Err(ChainError::InvalidAmount("target must be positive".to_string()));
        }
        let now = self.provider.latest_block_timestamp().await?;
        if deadline <= now {
            return Err(ChainError::DeadlinePassed {
                project: project_id.to_string(),
                deadline,
            });
        }

        let hash = self
            .submit(ContractCall::CreateProject {
                project_id: project_id.clone(),
                target,
                deadline,
            })
            .await?;
        info!(project = %project_id, target = %target, deadline, tx = %hash.short(), "📝 Project created on chain");
        Ok(hash)
    }

    async fn donate(&self, project_id: &ProjectId, amount: Wei, message: &str) -> Result<TxHash> {
        let from = self.sender().await?;
        if amount.is_zero() {
            return Err(ChainError::InvalidAmount("donation must be positive".to_string()));
        }

        let project = self.get_project(project_id).await?;
        let balance = self.provider.get_balance(&from).await?;
        let now = self.provider.latest_block_timestamp().await?;
        if let Err(e) = validate_donation(project_id, project.as_ref(), amount, balance, now) {
            warn!(project = %project_id, amount = %amount, error = %e, "Donation rejected before submission");
            return Err(e);
        }

        let hash = self
            .submit(ContractCall::Donate {
                project_id: project_id.clone(),
                amount,
                message: message.to_string(),
            })
            .await?;
        info!(project = %project_id, amount = %amount, from = %from, tx = %hash.short(), "💸 Donation submitted");
        Ok(hash)
    }

    async fn withdraw_funds(&self, project_id: &ProjectId) -> Result<TxHash> {
        let hash = self
            .submit(ContractCall::WithdrawFunds {
                project_id: project_id.clone(),
            })
            .await?;
        info!(project = %project_id, tx = %hash.short(), "🏦 Withdrawal submitted");
        Ok(hash)
    }

    async fn get_project(&self, project_id: &ProjectId) -> Result<Option<OnChainProject>> {
        let data = abi::encode_call(abi::GET_PROJECT, &[Token::String(project_id.to_string())]);
        let output = self.provider.call(&self.contract, &data).await?;
        if output.is_empty() {
            return Err(ChainError::ContractNotDeployed(self.contract.to_string()));
        }
        abi::decode_project(&output)
    }

    async fn get_transaction_receipt(&self, hash: &TxHash) -> Result<Option<TransactionReceipt>> {
        self.provider.get_transaction_receipt(hash).await
    }

    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64> {
        let from = self.sender().await?;
        let tx = TransactionRequest {
            from,
            to: self.contract,
            value: call.value(),
            data: call.encode(),
            gas: None,
        };
        self.provider.estimate_gas(&tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(deadline: u64, active: bool) -> OnChainProject {
        OnChainProject {
            creator: Address::from_bytes([1u8; 20]),
            target_amount: Wei::from_eth(10),
            raised_amount: Wei::ZERO,
            deadline,
            is_active: active,
            funds_withdrawn: false,
        }
    }

    #[test]
    fn test_validate_donation_order() {
        let id = ProjectId::from("p1");
        let half = Wei::parse_eth("0.5").unwrap();

        assert!(matches!(
            validate_donation(&id, None, half, Wei::from_eth(1), 100),
            Err(ChainError::ProjectNotFound(_))
        ));
        assert!(matches!(
            validate_donation(&id, Some(&project(200, false)), half, Wei::from_eth(1), 100),
            Err(ChainError::ProjectInactive(_))
        ));
        assert!(matches!(
            validate_donation(&id, Some(&project(100, true)), half, Wei::from_eth(1), 100),
            Err(ChainError::DeadlinePassed { deadline: 100, .. })
        ));
        assert!(matches!(
            validate_donation(&id, Some(&project(200, true)), half, Wei::parse_eth("0.1").unwrap(), 100),
            Err(ChainError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            validate_donation(&id, Some(&project(200, true)), Wei::ZERO, Wei::from_eth(1), 100),
            Err(ChainError::InvalidAmount(_))
        ));
        assert!(validate_donation(&id, Some(&project(200, true)), half, half, 100).is_ok());
    }

    #[test]
    fn test_donate_call_carries_value() {
        let call = ContractCall::Donate {
            project_id: ProjectId::from("p1"),
            amount: Wei::from_eth(2),
            message: "go".to_string(),
        };
        assert_eq!(call.value(), Wei::from_eth(2));
        assert_eq!(&call.encode()[..4], &abi::selector(abi::DONATE));
        assert_eq!(
            ContractCall::WithdrawFunds { project_id: ProjectId::from("p1") }.value(),
            Wei::ZERO
        );
    }
}
