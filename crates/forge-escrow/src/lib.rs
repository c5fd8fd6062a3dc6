//! Contribution ledger, transaction monitor and milestone escrow for
//! ProjectForge.
//!
//! Every public operation returns a [`ServiceResult`]: failures come back as
//! a [`ClassifiedError`] with a category, severity and retry hint, never as
//! a panic or a raw backend error.

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod donation;
pub mod error;
pub mod events;
pub mod ledger;
pub mod monitor;
pub mod outcome;
pub mod policy;
pub mod reconciliation;
pub mod services;

pub use classifier::{
    classify_message, report, Classify, ClassifiedError, ErrorCategory, Severity, SuggestedAction,
};
pub use config::MonitorConfig;
pub use coordinator::{escrow_view, released_total, EscrowCoordinator};
pub use donation::{DonationOutcome, DonationService, DEFAULT_CURRENCY};
pub use error::{EscrowError, Result};
pub use events::{EscrowEvent, EventBus};
pub use ledger::{confirmed_totals, ContributionIntent, ContributionLedger, ProjectTotals};
pub use monitor::{PollReport, TransactionMonitor, WatchState};
pub use outcome::{BookkeepingWarning, Completed, ServiceResponse, ServiceResult};
pub use policy::{authorize, is_allowed, Action, Actor, Role, Subject};
pub use reconciliation::{ReconciliationReport, Reconciler};
pub use services::EscrowServices;
