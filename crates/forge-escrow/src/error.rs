use forge_chain::ChainError;
use forge_storage::StorageError;
use forge_types::{MilestoneId, MilestoneStatus, ReleaseId, ReleaseStatus, TxHash, TypesError, Wei};
use thiserror::Error;

/// Escrow operation result type
pub type Result<T> = std::result::Result<T, EscrowError>;

/// Errors raised inside the escrow services.
///
/// They never cross the public boundary as-is: every service method turns
/// them into a [`crate::ClassifiedError`].
#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Milestone not found: {0}")]
    MilestoneNotFound(MilestoneId),

    #[error("Release not found: {0}")]
    ReleaseNotFound(ReleaseId),

    #[error("Contribution not found: {0}")]
    ContributionNotFound(TxHash),

    #[error("Milestone allocation must total 100% (±0.01), got {total}")]
    InvalidAllocation { total: String },

    #[error("Milestone {milestone} is {status}, release requires approved")]
    MilestoneNotApproved {
        milestone: MilestoneId,
        status: MilestoneStatus,
    },

    #[error("Milestone in wrong status: expected {expected}, found {found}")]
    InvalidMilestoneStatus { expected: String, found: MilestoneStatus },

    #[error("Release {release} is {status}, expected {expected}")]
    InvalidReleaseStatus {
        release: ReleaseId,
        status: ReleaseStatus,
        expected: String,
    },

    #[error("A release is already open for {0}")]
    ReleaseAlreadyRequested(String),

    #[error("Release {0} is already being executed")]
    ReleaseInProgress(ReleaseId),

    #[error("Release {0} has a withdrawal whose outcome was not recorded")]
    WithdrawalUnsettled(ReleaseId),

    #[error("Release amount {amount} exceeds locked funds {locked}")]
    ExceedsLockedFunds { amount: Wei, locked: Wei },

    #[error("No locked funds to release")]
    NoLockedFunds,

    #[error("Unauthorized: {actor} may not {action}")]
    Unauthorized { actor: String, action: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EscrowError {
    /// Stable machine-readable code surfaced to callers
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::ProjectNotFound(_) => "project_not_found",
            EscrowError::MilestoneNotFound(_) => "milestone_not_found",
            EscrowError::ReleaseNotFound(_) => "release_not_found",
            EscrowError::ContributionNotFound(_) => "contribution_not_found",
            EscrowError::InvalidAllocation { .. } => "invalid_allocation",
            EscrowError::MilestoneNotApproved { .. } => "milestone_not_approved",
            EscrowError::InvalidMilestoneStatus { .. } => "invalid_milestone_status",
            EscrowError::InvalidReleaseStatus { .. } => "invalid_release_status",
            EscrowError::ReleaseAlreadyRequested(_) => "release_already_requested",
            EscrowError::ReleaseInProgress(_) => "release_in_progress",
            EscrowError::WithdrawalUnsettled(_) => "withdrawal_unsettled",
            EscrowError::ExceedsLockedFunds { .. } => "exceeds_locked_funds",
            EscrowError::NoLockedFunds => "no_locked_funds",
            EscrowError::Unauthorized { .. } => "unauthorized",
            EscrowError::InvalidInput(_) => "invalid_input",
            EscrowError::Types(_) => "invalid_transition",
            EscrowError::Chain(_) => "chain_error",
            EscrowError::Storage(_) => "database_error",
        }
    }
}
