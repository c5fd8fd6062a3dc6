//! Error classification.
//!
//! Maps chain, storage and escrow failures onto a closed taxonomy that
//! callers can act on without inspecting error internals. Typed errors are
//! mapped by variant; opaque provider errors fall back to matching codes and
//! message fragments.

use crate::error::EscrowError;
use forge_chain::ChainError;
use forge_storage::StorageError;
use forge_types::TypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    WalletConnection,
    Network,
    Blockchain,
    Database,
    Validation,
    Permissions,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What the caller should offer the user next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Retry,
    ReconnectWallet,
    Reauthenticate,
    FixInput,
    ContactSupport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub code: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub user_message: String,
    pub retryable: bool,
    /// Original error text, for logs and support
    pub detail: String,
}

impl ClassifiedError {
    pub fn new(
        code: &str,
        category: ErrorCategory,
        severity: Severity,
        retryable: bool,
        user_message: &str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            code: code.to_string(),
            category,
            severity,
            user_message: user_message.to_string(),
            retryable,
            detail: detail.into(),
        }
    }

    pub fn suggested_action(&self) -> SuggestedAction {
        match (self.category, self.retryable) {
            (ErrorCategory::WalletConnection, _) => SuggestedAction::ReconnectWallet,
            (ErrorCategory::Permissions, _) => SuggestedAction::Reauthenticate,
            (ErrorCategory::Validation, false) => SuggestedAction::FixInput,
            (_, true) => SuggestedAction::Retry,
            (_, false) => SuggestedAction::ContactSupport,
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.detail)
    }
}

impl std::error::Error for ClassifiedError {}

/// Conversion into the public error taxonomy
pub trait Classify {
    fn classify(&self) -> ClassifiedError;
}

use ErrorCategory::*;
use Severity::*;

struct Rule {
    patterns: &'static [&'static str],
    code: &'static str,
    category: ErrorCategory,
    severity: Severity,
    retryable: bool,
    message: &'static str,
}

/// Checked in order; the first rule with a matching fragment wins.
const RULES: &[Rule] = &[
    Rule {
        patterns: &["4001", "user rejected", "user denied"],
        code: "user_rejected",
        category: WalletConnection,
        severity: Low,
        retryable: true,
        message: "The request was cancelled in your wallet.",
    },
    Rule {
        patterns: &["-32002", "already pending"],
        code: "wallet_request_pending",
        category: WalletConnection,
        severity: Low,
        retryable: true,
        message: "Your wallet already has a pending request. Open it to continue.",
    },
    Rule {
        patterns: &["wallet not connected", "no accounts"],
        code: "wallet_not_connected",
        category: WalletConnection,
        severity: Medium,
        retryable: true,
        message: "Connect your wallet to continue.",
    },
    Rule {
        patterns: &["wrong network", "chain mismatch", "unsupported chain"],
        code: "wrong_network",
        category: WalletConnection,
        severity: Medium,
        retryable: true,
        message: "Switch your wallet to the supported network.",
    },
    Rule {
        patterns: &["insufficient funds"],
        code: "insufficient_funds",
        category: Blockchain,
        severity: Medium,
        retryable: true,
        message: "Your balance is too low for this transaction.",
    },
    Rule {
        patterns: &["execution reverted"],
        code: "transaction_reverted",
        category: Blockchain,
        severity: Medium,
        retryable: true,
        message: "The contract rejected the transaction.",
    },
    Rule {
        patterns: &["not deployed", "no contract"],
        code: "contract_not_deployed",
        category: Blockchain,
        severity: Critical,
        retryable: false,
        message: "The funding contract is unavailable on this network.",
    },
    Rule {
        patterns: &["out of gas", "gas required exceeds", "intrinsic gas"],
        code: "gas_estimation_failed",
        category: Blockchain,
        severity: Medium,
        retryable: true,
        message: "The transaction could not be priced. Try again shortly.",
    },
    Rule {
        patterns: &["nonce"],
        code: "nonce_conflict",
        category: Blockchain,
        severity: Medium,
        retryable: true,
        message: "Another transaction from your account is still pending.",
    },
    Rule {
        patterns: &["timeout", "timed out", "network", "connection", "failed to fetch"],
        code: "network_error",
        category: Network,
        severity: Medium,
        retryable: true,
        message: "Network problem. Check your connection and retry.",
    },
    Rule {
        patterns: &["duplicate key", "23505", "already exists"],
        code: "duplicate_record",
        category: Database,
        severity: Low,
        retryable: false,
        message: "This record already exists.",
    },
    Rule {
        patterns: &["database", "storage", "pgrst"],
        code: "database_error",
        category: Database,
        severity: High,
        retryable: true,
        message: "Saving failed. Your funds are safe; please retry.",
    },
    Rule {
        patterns: &["unauthorized", "permission", "forbidden", "jwt"],
        code: "unauthorized",
        category: Permissions,
        severity: High,
        retryable: false,
        message: "You are not allowed to perform this action.",
    },
    Rule {
        patterns: &["invalid", "required", "must be"],
        code: "validation_error",
        category: Validation,
        severity: Low,
        retryable: false,
        message: "Some of the provided values are not valid.",
    },
];

/// Classify an opaque error message by code and substring
pub fn classify_message(raw: &str) -> ClassifiedError {
    let lower = raw.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| lower.contains(p)))
        .map(|rule| {
            ClassifiedError::new(
                rule.code,
                rule.category,
                rule.severity,
                rule.retryable,
                rule.message,
                raw,
            )
        })
        .unwrap_or_else(|| {
            ClassifiedError::new(
                "unknown_error",
                Unknown,
                Medium,
                true,
                "Something went wrong. Please try again.",
                raw,
            )
        })
}

impl Classify for ChainError {
    fn classify(&self) -> ClassifiedError {
        let detail = self.to_string();
        match self {
            ChainError::WalletNotConnected => ClassifiedError::new(
                "wallet_not_connected",
                WalletConnection,
                Medium,
                true,
                "Connect your wallet to continue.",
                detail,
            ),
            ChainError::UserRejected => ClassifiedError::new(
                "user_rejected",
                WalletConnection,
                Low,
                true,
                "The request was cancelled in your wallet.",
                detail,
            ),
            ChainError::WrongNetwork { .. } => ClassifiedError::new(
                "wrong_network",
                WalletConnection,
                Medium,
                true,
                "Switch your wallet to the supported network.",
                detail,
            ),
            ChainError::ProjectNotFound(_) => ClassifiedError::new(
                "project_not_found",
                Validation,
                Medium,
                false,
                "This project does not exist on chain.",
                detail,
            ),
            ChainError::ProjectInactive(_) => ClassifiedError::new(
                "project_inactive",
                Validation,
                Medium,
                false,
                "This project is no longer accepting contributions.",
                detail,
            ),
            ChainError::DeadlinePassed { .. } => ClassifiedError::new(
                "deadline_passed",
                Validation,
                Medium,
                false,
                "The funding deadline for this project has passed.",
                detail,
            ),
            ChainError::InvalidAmount(_) => ClassifiedError::new(
                "invalid_amount",
                Validation,
                Low,
                false,
                "Enter a positive amount.",
                detail,
            ),
            ChainError::InsufficientFunds { .. } => ClassifiedError::new(
                "insufficient_funds",
                Blockchain,
                Medium,
                true,
                "Your balance is too low for this transaction.",
                detail,
            ),
            ChainError::Reverted(_) => ClassifiedError::new(
                "transaction_reverted",
                Blockchain,
                Medium,
                true,
                "The contract rejected the transaction.",
                detail,
            ),
            ChainError::ContractNotDeployed(_) => ClassifiedError::new(
                "contract_not_deployed",
                Blockchain,
                Critical,
                false,
                "The funding contract is unavailable on this network.",
                detail,
            ),
            ChainError::Abi(_) => ClassifiedError::new(
                "abi_error",
                Blockchain,
                High,
                false,
                "The contract returned data this version cannot read.",
                detail,
            ),
            ChainError::Transport(_) => ClassifiedError::new(
                "network_error",
                Network,
                Medium,
                true,
                "Network problem. Check your connection and retry.",
                detail,
            ),
            ChainError::Rpc { code, message } => classify_message(&format!("{code}: {message}")),
            ChainError::Types(e) => e.classify(),
        }
    }
}

impl Classify for StorageError {
    fn classify(&self) -> ClassifiedError {
        let detail = self.to_string();
        match self {
            StorageError::NotFound(_) => ClassifiedError::new(
                "record_not_found",
                Database,
                Medium,
                false,
                "The requested record does not exist.",
                detail,
            ),
            StorageError::AlreadyExists(_) => ClassifiedError::new(
                "duplicate_record",
                Database,
                Low,
                false,
                "This record already exists.",
                detail,
            ),
            StorageError::Conflict { .. } => ClassifiedError::new(
                "concurrent_update",
                Database,
                Medium,
                true,
                "The record changed while you were working. Refresh and retry.",
                detail,
            ),
            StorageError::BackendError(_)
            | StorageError::SerializationError(_)
            | StorageError::IoError(_) => ClassifiedError::new(
                "database_error",
                Database,
                High,
                true,
                "Saving failed. Your funds are safe; please retry.",
                detail,
            ),
        }
    }
}

impl Classify for TypesError {
    fn classify(&self) -> ClassifiedError {
        let (code, message) = match self {
            TypesError::InvalidTransition { .. } => (
                "invalid_transition",
                "This action is not possible in the current state.",
            ),
            TypesError::InvalidAmount(_) | TypesError::AmountOverflow(_) => {
                ("invalid_amount", "Enter a valid ETH amount.")
            }
            TypesError::InvalidPercent(_) => (
                "invalid_percent",
                "Milestone percentages must be between 0 and 100.",
            ),
            _ => ("validation_error", "Some of the provided values are not valid."),
        };
        ClassifiedError::new(code, Validation, Low, false, message, self.to_string())
    }
}

impl Classify for EscrowError {
    fn classify(&self) -> ClassifiedError {
        let detail = self.to_string();
        let code = self.code();
        match self {
            EscrowError::Chain(e) => e.classify(),
            EscrowError::Storage(e) => e.classify(),
            EscrowError::Types(e) => e.classify(),
            EscrowError::ProjectNotFound(_)
            | EscrowError::MilestoneNotFound(_)
            | EscrowError::ReleaseNotFound(_)
            | EscrowError::ContributionNotFound(_) => ClassifiedError::new(
                code,
                Validation,
                Medium,
                false,
                "The requested item could not be found.",
                detail,
            ),
            EscrowError::InvalidAllocation { .. } => ClassifiedError::new(
                code,
                Validation,
                Low,
                false,
                "Milestone percentages must add up to 100%.",
                detail,
            ),
            EscrowError::MilestoneNotApproved { .. } => ClassifiedError::new(
                code,
                Validation,
                Medium,
                false,
                "Funds can only be released for approved milestones.",
                detail,
            ),
            EscrowError::InvalidMilestoneStatus { .. }
            | EscrowError::InvalidReleaseStatus { .. }
            | EscrowError::ReleaseAlreadyRequested(_) => ClassifiedError::new(
                code,
                Validation,
                Medium,
                false,
                "This action is not possible in the current state.",
                detail,
            ),
            EscrowError::ReleaseInProgress(_) => ClassifiedError::new(
                code,
                Validation,
                Low,
                true,
                "This release is already being processed.",
                detail,
            ),
            EscrowError::WithdrawalUnsettled(_) => ClassifiedError::new(
                code,
                Blockchain,
                High,
                false,
                "A withdrawal for this release is awaiting settlement by an administrator.",
                detail,
            ),
            EscrowError::ExceedsLockedFunds { .. } | EscrowError::NoLockedFunds => {
                ClassifiedError::new(
                    code,
                    Blockchain,
                    High,
                    false,
                    "Not enough funds remain in escrow for this release.",
                    detail,
                )
            }
            EscrowError::Unauthorized { .. } => ClassifiedError::new(
                code,
                Permissions,
                High,
                false,
                "You are not allowed to perform this action.",
                detail,
            ),
            EscrowError::InvalidInput(_) => ClassifiedError::new(
                code,
                Validation,
                Low,
                false,
                "Some of the provided values are not valid.",
                detail,
            ),
        }
    }
}

/// Classify a failure at the service boundary and log it by severity
pub fn report<E: Classify>(operation: &str, err: E) -> ClassifiedError {
    let classified = err.classify();
    match classified.severity {
        Severity::High | Severity::Critical => error!(
            operation,
            code = %classified.code,
            category = ?classified.category,
            error = %classified.detail,
            "❌ Operation failed"
        ),
        Severity::Low | Severity::Medium => warn!(
            operation,
            code = %classified.code,
            retryable = classified.retryable,
            error = %classified.detail,
            "Operation failed"
        ),
    }
    classified
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::{MilestoneId, MilestoneStatus, Wei};

    #[test]
    fn test_raw_message_rules() {
        let rejected = classify_message("MetaMask Tx Signature: User denied transaction signature. code 4001");
        assert_eq!(rejected.code, "user_rejected");
        assert_eq!(rejected.category, WalletConnection);
        assert_eq!(rejected.severity, Low);
        assert!(rejected.retryable);

        let funds = classify_message("insufficient funds for gas * price + value");
        assert_eq!((funds.category, funds.severity, funds.retryable), (Blockchain, Medium, true));

        let reverted = classify_message("execution reverted: Only project creator can withdraw");
        assert_eq!(reverted.category, Blockchain);
        assert!(reverted.retryable);

        let dup = classify_message("duplicate key value violates unique constraint (23505)");
        assert_eq!(dup.category, Database);
        assert!(!dup.retryable);
    }

    #[test]
    fn test_fallback_is_unknown_medium_retryable() {
        let unknown = classify_message("the printer is on fire");
        assert_eq!(unknown.code, "unknown_error");
        assert_eq!(unknown.category, Unknown);
        assert_eq!(unknown.severity, Medium);
        assert!(unknown.retryable);
        assert_eq!(unknown.suggested_action(), SuggestedAction::Retry);
    }

    #[test]
    fn test_typed_chain_errors() {
        let insufficient = ChainError::InsufficientFunds {
            needed: Wei::from_eth(2),
            available: Wei::from_eth(1),
        }
        .classify();
        assert_eq!(insufficient.code, "insufficient_funds");
        assert!(insufficient.retryable);

        let missing = ChainError::ContractNotDeployed("0xcc".into()).classify();
        assert_eq!(missing.severity, Critical);
        assert!(!missing.retryable);
        assert_eq!(missing.suggested_action(), SuggestedAction::ContactSupport);

        let rpc = ChainError::Rpc {
            code: -32002,
            message: "Request of type 'wallet_requestPermissions' already pending".into(),
        }
        .classify();
        assert_eq!(rpc.code, "wallet_request_pending");
        assert_eq!(rpc.suggested_action(), SuggestedAction::ReconnectWallet);

        assert_eq!(
            ChainError::Transport("connection reset".into()).classify().category,
            Network
        );
    }

    #[test]
    fn test_escrow_errors_keep_their_code() {
        let err = EscrowError::MilestoneNotApproved {
            milestone: MilestoneId::new(),
            status: MilestoneStatus::InReview,
        }
        .classify();
        assert_eq!(err.code, "milestone_not_approved");
        assert!(!err.retryable);

        let denied = EscrowError::Unauthorized {
            actor: "bob".into(),
            action: "approve release".into(),
        }
        .classify();
        assert_eq!(denied.category, Permissions);
        assert_eq!(denied.severity, High);
        assert_eq!(denied.suggested_action(), SuggestedAction::Reauthenticate);

        let chained = EscrowError::from(ChainError::UserRejected).classify();
        assert_eq!(chained.code, "user_rejected");
    }
}
