//! Domain types shared by the ProjectForge escrow crates.
//!
//! Money is fixed-point ([`Wei`]), percentages are fixed-point
//! ([`Percent`]), and every lifecycle enum knows its own legal transitions.

pub mod amount;
pub mod contribution;
pub mod error;
pub mod escrow;
pub mod ids;
pub mod milestone;
pub mod project;
pub mod release;

pub use amount::{Percent, Wei, ETH_DECIMALS, PERCENT_SCALE, WEI_PER_ETH};
pub use contribution::{Contribution, ContributionStatus, ContributionSummary, NewContribution};
pub use error::{Result, TypesError};
pub use escrow::{EscrowStatus, ProjectEscrow};
pub use ids::{
    Address, ContributionId, MilestoneId, ProjectId, ProjectKey, ReleaseId, TxHash, UserId,
};
pub use milestone::{
    allocation_is_complete, allocation_total, Milestone, MilestoneStatus, NewMilestone,
    ALLOCATION_TOLERANCE_UNITS,
};
pub use project::ProjectRecord;
pub use release::{EscrowRelease, ReleaseStatus, ReleaseType};
