use crate::amount::Wei;
use crate::ids::ProjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Active,
    Completed,
    Disputed,
    EmergencyRelease,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EscrowStatus::Active => "active",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Disputed => "disputed",
            EscrowStatus::EmergencyRelease => "emergency_release",
        })
    }
}

/// Derived escrow view, computed on demand and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEscrow {
    pub project_id: ProjectId,
    pub total_funds: Wei,
    pub released_funds: Wei,
    pub locked_funds: Wei,
    pub milestone_count: u64,
    pub completed_milestones: u64,
    pub escrow_status: EscrowStatus,
}
