use crate::amount::Wei;
use crate::ids::{MilestoneId, ProjectKey, ReleaseId, TxHash, UserId};
use crate::{Result, TypesError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    Milestone,
    Emergency,
    Final,
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReleaseType::Milestone => "milestone",
            ReleaseType::Emergency => "emergency",
            ReleaseType::Final => "final",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Pending,
    Approved,
    Executed,
    Failed,
}

impl ReleaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReleaseStatus::Executed | ReleaseStatus::Failed)
    }

    pub fn can_transition_to(&self, next: &ReleaseStatus) -> bool {
        use ReleaseStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Failed) | (Approved, Executed) | (Approved, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Pending => "pending",
            ReleaseStatus::Approved => "approved",
            ReleaseStatus::Executed => "executed",
            ReleaseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One withdrawal request against a project's escrowed funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRelease {
    pub id: ReleaseId,
    pub project_id: ProjectKey,
    /// Absent for emergency releases.
    pub milestone_id: Option<MilestoneId>,
    /// Snapshot taken at request time; never recomputed.
    pub amount: Wei,
    pub release_type: ReleaseType,
    pub status: ReleaseStatus,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    /// Written just before the withdrawal is sent. Until the release is
    /// executed or failed, the outcome of that withdrawal is unknown.
    pub withdrawal_started_at: Option<DateTime<Utc>>,
    pub transaction_hash: Option<TxHash>,
    pub executed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl EscrowRelease {
    pub fn new(
        project_id: ProjectKey,
        milestone_id: Option<MilestoneId>,
        amount: Wei,
        release_type: ReleaseType,
        requested_by: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReleaseId::new(),
            project_id,
            milestone_id,
            amount,
            release_type,
            status: ReleaseStatus::Pending,
            requested_by,
            requested_at: now,
            reason: None,
            approved_by: None,
            approved_at: None,
            withdrawal_started_at: None,
            transaction_hash: None,
            executed_at: None,
            failure_reason: None,
        }
    }

    pub fn transition(&mut self, next: ReleaseStatus) -> Result<()> {
        if !self.status.can_transition_to(&next) {
            return Err(TypesError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Counts against the escrow until it fails.
    pub fn is_active(&self) -> bool {
        self.status != ReleaseStatus::Failed
    }

    /// A withdrawal was sent for this release but its result was never recorded
    pub fn is_unsettled(&self) -> bool {
        self.status == ReleaseStatus::Approved && self.withdrawal_started_at.is_some()
    }
}
