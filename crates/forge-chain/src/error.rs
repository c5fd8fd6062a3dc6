use forge_types::{TypesError, Wei};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("User rejected the request")]
    UserRejected,

    #[error("Project not found on chain: {0}")]
    ProjectNotFound(String),

    #[error("Project is not active: {0}")]
    ProjectInactive(String),

    #[error("Project deadline has passed: {project} (deadline {deadline})")]
    DeadlinePassed { project: String, deadline: u64 },

    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Wei, available: Wei },

    #[error("Invalid donation amount: {0}")]
    InvalidAmount(String),

    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("Contract not deployed at {0}")]
    ContractNotDeployed(String),

    #[error("Wrong network: expected chain {expected}, connected to {actual}")]
    WrongNetwork { expected: u64, actual: u64 },

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Provider error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Types error: {0}")]
    Types(#[from] TypesError),
}

pub type Result<T> = std::result::Result<T, ChainError>;
