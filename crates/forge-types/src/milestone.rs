use crate::amount::{Percent, PERCENT_DECIMALS, PERCENT_SCALE};
use crate::ids::{MilestoneId, ProjectKey};
use crate::{Result, TypesError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Allowed deviation of a milestone set from 100% (0.01 percentage points).
pub const ALLOCATION_TOLERANCE_UNITS: u64 = 10u64.pow(PERCENT_DECIMALS) / 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    Released,
}

impl MilestoneStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MilestoneStatus::Released)
    }

    pub fn can_transition_to(&self, next: &MilestoneStatus) -> bool {
        use MilestoneStatus::*;
        matches!(
            (self, next),
            (Pending, InReview)
                | (Rejected, InReview)
                | (InReview, Approved)
                | (InReview, Rejected)
                | (Approved, Released)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::InReview => "in_review",
            MilestoneStatus::Approved => "approved",
            MilestoneStatus::Rejected => "rejected",
            MilestoneStatus::Released => "released",
        }
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Milestone as submitted by the project owner, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMilestone {
    pub title: String,
    pub description: String,
    pub target_amount: Percent,
    pub due_date: Option<DateTime<Utc>>,
}

impl NewMilestone {
    pub fn new(title: impl Into<String>, target_amount: Percent) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            target_amount,
            due_date: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub project_id: ProjectKey,
    pub title: String,
    pub description: String,
    /// Share of the project's raised funds, 0-100.
    pub target_amount: Percent,
    pub status: MilestoneStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub evidence: Option<String>,
    pub reviewer_comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Milestone {
    pub fn from_new(project_id: ProjectKey, new: NewMilestone, now: DateTime<Utc>) -> Self {
        Self {
            id: MilestoneId::new(),
            project_id,
            title: new.title,
            description: new.description,
            target_amount: new.target_amount,
            status: MilestoneStatus::Pending,
            due_date: new.due_date,
            evidence: None,
            reviewer_comments: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing anything the state machine does not allow.
    pub fn transition(&mut self, next: MilestoneStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(&next) {
            return Err(TypesError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Sum of the target percentages, in [`Percent`] units.
pub fn allocation_total(milestones: &[NewMilestone]) -> u64 {
    milestones
        .iter()
        .map(|m| m.target_amount.units())
        .fold(0u64, |acc, u| acc.saturating_add(u))
}

/// Whether a milestone set sums to 100% within the allowed tolerance.
pub fn allocation_is_complete(milestones: &[NewMilestone]) -> bool {
    allocation_total(milestones).abs_diff(PERCENT_SCALE) <= ALLOCATION_TOLERANCE_UNITS
}
