//! Client for the ProjectForge funding contract.
//!
//! [`ChainClient`] is the seam the escrow services depend on.
//! [`FundingContract`] implements it over any [`WalletProvider`]: the HTTP
//! [`JsonRpcProvider`] for a real node, or the in-process [`SimulatedChain`].

pub mod abi;
pub mod client;
pub mod error;
pub mod provider;
pub mod rpc;
pub mod simulated;

pub use client::{
    validate_donation, ChainClient, ContractCall, FundingContract, OnChainProject,
    TransactionReceipt,
};
pub use error::{ChainError, Result};
pub use provider::{TransactionRequest, WalletProvider};
pub use rpc::JsonRpcProvider;
pub use simulated::{LoggedEvent, SimulatedChain, DEFAULT_CHAIN_ID};
