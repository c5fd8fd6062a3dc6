//! Deterministic in-process funding contract.
//!
//! Implements [`WalletProvider`] by decoding calldata and executing it against
//! an in-memory copy of the contract state, so a [`crate::FundingContract`]
//! on top of it goes through the full ABI path. Failure hooks let tests and
//! `--simulate` runs reproduce reverted withdrawals, user rejections, slow
//! confirmations and flaky receipt lookups.

use crate::abi::{self, ParamKind, Token};
use crate::client::{OnChainProject, TransactionReceipt};
use crate::provider::{TransactionRequest, WalletProvider};
use crate::{ChainError, Result};
use async_trait::async_trait;
use forge_types::{Address, TxHash, Wei};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_CHAIN_ID: u64 = 31337;

const CREATE_PROJECT_GAS: u64 = 180_000;
const DONATE_GAS: u64 = 85_000;
const WITHDRAW_GAS: u64 = 60_000;
const TRANSFER_GAS: u64 = 21_000;

/// Placeholder runtime bytecode reported by `eth_getCode`
const CONTRACT_CODE: &[u8] = &[0x60, 0x80, 0x60, 0x40, 0x52];

/// Event emitted by the simulated contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub topic: [u8; 32],
    pub project_id: String,
    pub account: Address,
    pub amount: Wei,
    pub tx_hash: TxHash,
}

struct MinedTx {
    receipt: TransactionReceipt,
    polls_remaining: u32,
    withheld: bool,
}

#[derive(Default)]
struct ChainState {
    connected: bool,
    balances: HashMap<Address, Wei>,
    projects: HashMap<String, OnChainProject>,
    transactions: HashMap<TxHash, MinedTx>,
    events: Vec<LoggedEvent>,
    nonce: u64,
    block_number: u64,
    clock: Option<u64>,
    fail_next_withdrawal: Option<String>,
    reject_next_transaction: bool,
    lookup_failures: u32,
    withheld_projects: HashSet<String>,
}

pub struct SimulatedChain {
    contract: Address,
    account: Address,
    chain_id: u64,
    confirmation_polls: u32,
    state: Mutex<ChainState>,
}

enum Effect {
    Create {
        id: String,
        target: Wei,
        deadline: u64,
    },
    Donate {
        id: String,
    },
    Withdraw {
        id: String,
    },
}

impl SimulatedChain {
    pub fn new(contract: Address, account: Address) -> Self {
        Self {
            contract,
            account,
            chain_id: DEFAULT_CHAIN_ID,
            confirmation_polls: 0,
            state: Mutex::new(ChainState {
                connected: true,
                ..ChainState::default()
            }),
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Number of receipt lookups that report "not mined" before the receipt appears
    pub fn with_confirmation_polls(mut self, polls: u32) -> Self {
        self.confirmation_polls = polls;
        self
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub async fn fund(&self, address: Address, amount: Wei) {
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(address).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub async fn balance(&self, address: &Address) -> Wei {
        self.state
            .lock()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    pub async fn project(&self, id: &str) -> Option<OnChainProject> {
        self.state.lock().await.projects.get(id).cloned()
    }

    pub async fn events(&self) -> Vec<LoggedEvent> {
        self.state.lock().await.events.clone()
    }

    /// Pin the block timestamp (unix seconds)
    pub async fn set_time(&self, now: u64) {
        self.state.lock().await.clock = Some(now);
    }

    pub async fn now(&self) -> u64 {
        current_time(&*self.state.lock().await)
    }

    pub async fn set_connected(&self, connected: bool) {
        self.state.lock().await.connected = connected;
    }

    pub async fn set_project_active(&self, id: &str, active: bool) {
        if let Some(project) = self.state.lock().await.projects.get_mut(id) {
            project.is_active = active;
        }
    }

    /// Donation from another account, mined immediately
    pub async fn external_donation(&self, id: &str, from: Address, amount: Wei) -> Result<TxHash> {
        let mut state = self.state.lock().await;
        let project = state
            .projects
            .get_mut(id)
            .ok_or_else(|| ChainError::Reverted("Project does not exist".to_string()))?;
        project.raised_amount = project.raised_amount.saturating_add(amount);
        let hash = self.record_tx(&mut state, from, id.as_bytes(), DONATE_GAS, 0);
        state.events.push(LoggedEvent {
            topic: abi::event_topic(abi::EVENT_DONATION_RECEIVED),
            project_id: id.to_string(),
            account: from,
            amount,
            tx_hash: hash.clone(),
        });
        Ok(hash)
    }

    /// The next `withdrawFunds` reverts with `reason`
    pub async fn fail_next_withdrawal(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next_withdrawal = Some(reason.into());
    }

    /// The next transaction is refused by the wallet (EIP-1193 code 4001)
    pub async fn reject_next_transaction(&self) {
        self.state.lock().await.reject_next_transaction = true;
    }

    /// The next `count` receipt lookups fail with a transport error
    pub async fn fail_lookups(&self, count: u32) {
        self.state.lock().await.lookup_failures = count;
    }

    /// Keep reporting the transaction as not mined
    pub async fn withhold_receipt(&self, hash: &TxHash) {
        if let Some(tx) = self.state.lock().await.transactions.get_mut(hash) {
            tx.withheld = true;
        }
    }

    pub async fn release_receipt(&self, hash: &TxHash) {
        if let Some(tx) = self.state.lock().await.transactions.get_mut(hash) {
            tx.withheld = false;
        }
    }

    /// Mark an accepted transaction as reverted in its receipt
    pub async fn fail_receipt(&self, hash: &TxHash) {
        if let Some(tx) = self.state.lock().await.transactions.get_mut(hash) {
            tx.receipt.status = false;
        }
    }

    /// Make `getProject` lookups for `id` return nothing
    pub async fn hide_project(&self, id: &str) {
        self.state.lock().await.withheld_projects.insert(id.to_string());
    }

    fn record_tx(
        &self,
        state: &mut ChainState,
        from: Address,
        data: &[u8],
        gas_used: u64,
        polls: u32,
    ) -> TxHash {
        state.nonce += 1;
        state.block_number += 1;

        let mut preimage = Vec::with_capacity(20 + 20 + 8 + data.len());
        preimage.extend_from_slice(self.contract.as_bytes());
        preimage.extend_from_slice(from.as_bytes());
        preimage.extend_from_slice(&state.nonce.to_be_bytes());
        preimage.extend_from_slice(data);
        let hash = TxHash::from_bytes(abi::keccak256(&preimage));

        state.transactions.insert(
            hash.clone(),
            MinedTx {
                receipt: TransactionReceipt {
                    tx_hash: hash.clone(),
                    block_number: state.block_number,
                    gas_used,
                    status: true,
                },
                polls_remaining: polls,
                withheld: false,
            },
        );
        hash
    }

    /// Validate a transaction against the current state without applying it
    fn plan(&self, state: &ChainState, tx: &TransactionRequest) -> Result<(Effect, u64)> {
        if tx.to != self.contract {
            return Err(ChainError::Rpc {
                code: -32000,
                message: format!("no contract at {}", tx.to),
            });
        }
        let balance = state.balances.get(&tx.from).copied().unwrap_or_default();
        if balance < tx.value {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "insufficient funds for gas * price + value".to_string(),
            });
        }

        let (sel, args) = abi::split_selector(&tx.data)?;
        let now = current_time(state);

        if sel == abi::selector(abi::CREATE_PROJECT) {
            let tokens = abi::decode_tokens(args, &[ParamKind::String, ParamKind::Uint, ParamKind::Uint])?;
            let (id, target, deadline) = match tokens.as_slice() {
                [Token::String(id), Token::Uint(target), Token::Uint(deadline)] => {
                    (id.clone(), *target, *deadline)
                }
                _ => return Err(ChainError::Abi("bad createProject arguments".to_string())),
            };
            if state.projects.contains_key(&id) {
                return Err(ChainError::Reverted("Project already exists".to_string()));
            }
            let deadline = u64::try_from(deadline)
                .map_err(|_| ChainError::Reverted("Deadline out of range".to_string()))?;
            if deadline <= now {
                return Err(ChainError::Reverted("Deadline must be in the future".to_string()));
            }
            return Ok((
                Effect::Create {
                    id,
                    target: Wei::from_wei(target),
                    deadline,
                },
                CREATE_PROJECT_GAS,
            ));
        }

        if sel == abi::selector(abi::DONATE) {
            let tokens = abi::decode_tokens(args, &[ParamKind::String, ParamKind::String])?;
            let id = match tokens.first() {
                Some(Token::String(id)) => id.clone(),
                _ => return Err(ChainError::Abi("bad donate arguments".to_string())),
            };
            let project = state
                .projects
                .get(&id)
                .ok_or_else(|| ChainError::Reverted("Project does not exist".to_string()))?;
            if !project.is_active {
                return Err(ChainError::Reverted("Project is not active".to_string()));
            }
            if now >= project.deadline {
                return Err(ChainError::Reverted("Project deadline has passed".to_string()));
            }
            if tx.value.is_zero() {
                return Err(ChainError::Reverted("Donation must be greater than 0".to_string()));
            }
            return Ok((Effect::Donate { id }, DONATE_GAS));
        }

        if sel == abi::selector(abi::WITHDRAW_FUNDS) {
            let tokens = abi::decode_tokens(args, &[ParamKind::String])?;
            let id = match tokens.first() {
                Some(Token::String(id)) => id.clone(),
                _ => return Err(ChainError::Abi("bad withdrawFunds arguments".to_string())),
            };
            let project = state
                .projects
                .get(&id)
                .ok_or_else(|| ChainError::Reverted("Project does not exist".to_string()))?;
            if project.creator != tx.from {
                return Err(ChainError::Reverted(
                    "Only project creator can withdraw".to_string(),
                ));
            }
            if project.raised_amount.is_zero() {
                return Err(ChainError::Reverted("No funds to withdraw".to_string()));
            }
            return Ok((Effect::Withdraw { id }, WITHDRAW_GAS));
        }

        Err(ChainError::Reverted(format!(
            "unknown selector 0x{}",
            hex::encode(sel)
        )))
    }
}

fn current_time(state: &ChainState) -> u64 {
    state
        .clock
        .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64)
}

#[async_trait]
impl WalletProvider for SimulatedChain {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        if self.state.lock().await.connected {
            Ok(vec![self.account])
        } else {
            Ok(Vec::new())
        }
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn get_balance(&self, address: &Address) -> Result<Wei> {
        Ok(self.balance(address).await)
    }

    async fn get_code(&self, address: &Address) -> Result<Vec<u8>> {
        if *address == self.contract {
            Ok(CONTRACT_CODE.to_vec())
        } else {
            Ok(Vec::new())
        }
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        Ok(self.now().await)
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>> {
        if *to != self.contract {
            return Ok(Vec::new());
        }
        let (sel, args) = abi::split_selector(data)?;
        if sel != abi::selector(abi::GET_PROJECT) {
            return Err(ChainError::Reverted(format!(
                "unknown view selector 0x{}",
                hex::encode(sel)
            )));
        }
        let id = match abi::decode_tokens(args, &[ParamKind::String])?.pop() {
            Some(Token::String(id)) => id,
            _ => return Err(ChainError::Abi("bad getProject arguments".to_string())),
        };

        let state = self.state.lock().await;
        let project = state
            .projects
            .get(&id)
            .filter(|_| !state.withheld_projects.contains(&id))
            .cloned()
            .unwrap_or(OnChainProject {
                creator: Address::ZERO,
                target_amount: Wei::ZERO,
                raised_amount: Wei::ZERO,
                deadline: 0,
                is_active: false,
                funds_withdrawn: false,
            });
        Ok(abi::encode_project(&project))
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        let state = self.state.lock().await;
        if tx.data.is_empty() {
            return Ok(TRANSFER_GAS);
        }
        self.plan(&state, tx).map(|(_, gas)| gas)
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash> {
        let mut state = self.state.lock().await;
        if std::mem::take(&mut state.reject_next_transaction) {
            return Err(ChainError::UserRejected);
        }

        let (effect, gas) = self.plan(&state, tx)?;
        if let Effect::Withdraw { .. } = effect {
            if let Some(reason) = state.fail_next_withdrawal.take() {
                return Err(ChainError::Reverted(reason));
            }
        }

        let hash = self.record_tx(&mut state, tx.from, &tx.data, gas, self.confirmation_polls);
        let (topic, id, amount) = match effect {
            Effect::Create {
                id,
                target,
                deadline,
            } => {
                state.projects.insert(
                    id.clone(),
                    OnChainProject {
                        creator: tx.from,
                        target_amount: target,
                        raised_amount: Wei::ZERO,
                        deadline,
                        is_active: true,
                        funds_withdrawn: false,
                    },
                );
                (abi::event_topic(abi::EVENT_PROJECT_CREATED), id, target)
            }
            Effect::Donate { id } => {
                if let Some(balance) = state.balances.get_mut(&tx.from) {
                    *balance = balance.saturating_sub(tx.value);
                }
                if let Some(project) = state.projects.get_mut(&id) {
                    project.raised_amount = project.raised_amount.saturating_add(tx.value);
                }
                (abi::event_topic(abi::EVENT_DONATION_RECEIVED), id, tx.value)
            }
            Effect::Withdraw { id } => {
                let mut raised = Wei::ZERO;
                if let Some(project) = state.projects.get_mut(&id) {
                    project.funds_withdrawn = true;
                    raised = project.raised_amount;
                }
                (abi::event_topic(abi::EVENT_FUNDS_WITHDRAWN), id, raised)
            }
        };
        state.events.push(LoggedEvent {
            topic,
            project_id: id,
            account: tx.from,
            amount,
            tx_hash: hash.clone(),
        });

        debug!(tx = %hash.short(), block = state.block_number, "Simulated transaction accepted");
        Ok(hash)
    }

    async fn get_transaction_receipt(&self, hash: &TxHash) -> Result<Option<TransactionReceipt>> {
        let mut state = self.state.lock().await;
        if state.lookup_failures > 0 {
            state.lookup_failures -= 1;
            return Err(ChainError::Transport("connection reset by peer".to_string()));
        }
        let Some(tx) = state.transactions.get_mut(hash) else {
            return Ok(None);
        };
        if tx.withheld {
            return Ok(None);
        }
        if tx.polls_remaining > 0 {
            tx.polls_remaining -= 1;
            return Ok(None);
        }
        Ok(Some(tx.receipt.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> SimulatedChain {
        SimulatedChain::new(
            Address::from_bytes([0xcc; 20]),
            Address::from_bytes([0x01; 20]),
        )
    }

    #[tokio::test]
    async fn test_receipt_after_confirmation_polls() {
        let sim = chain().with_confirmation_polls(2);
        sim.set_time(1_000).await;
        let tx = TransactionRequest {
            from: sim.account(),
            to: sim.contract(),
            value: Wei::ZERO,
            data: abi::encode_call(
                abi::CREATE_PROJECT,
                &[Token::String("p1".into()), Token::Uint(1), Token::Uint(2_000)],
            ),
            gas: None,
        };
        let hash = sim.send_transaction(&tx).await.unwrap();

        assert!(sim.get_transaction_receipt(&hash).await.unwrap().is_none());
        assert!(sim.get_transaction_receipt(&hash).await.unwrap().is_none());
        let receipt = sim.get_transaction_receipt(&hash).await.unwrap().unwrap();
        assert!(receipt.status);
        assert_eq!(receipt.gas_used, CREATE_PROJECT_GAS);
    }

    #[tokio::test]
    async fn test_lookup_failures_are_transient() {
        let sim = chain();
        sim.fail_lookups(1).await;
        let hash = TxHash::from_bytes([9u8; 32]);
        assert!(matches!(
            sim.get_transaction_receipt(&hash).await,
            Err(ChainError::Transport(_))
        ));
        assert_eq!(sim.get_transaction_receipt(&hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_user_rejection_consumes_flag() {
        let sim = chain();
        sim.reject_next_transaction().await;
        let tx = TransactionRequest {
            from: sim.account(),
            to: sim.contract(),
            value: Wei::ZERO,
            data: Vec::new(),
            gas: None,
        };
        assert_eq!(sim.send_transaction(&tx).await, Err(ChainError::UserRejected));
        // Empty calldata is not a contract call
        assert!(sim.send_transaction(&tx).await.is_err());
    }
}
