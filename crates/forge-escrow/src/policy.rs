//! Who may move milestones and releases.
//!
//! Owners drive their own project forward, reviewers judge it, admins can do
//! everything including the escape hatches (emergency release, cancellation,
//! manual reconciliation). Nobody reviews their own work.

use crate::error::{EscrowError, Result};
use forge_types::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Reviewer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId::new(id),
            role,
        }
    }

    pub fn member(id: impl Into<String>) -> Self {
        Self::new(id, Role::Member)
    }

    pub fn reviewer(id: impl Into<String>) -> Self {
        Self::new(id, Role::Reviewer)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    DefineMilestones,
    SubmitEvidence,
    ReviewMilestone,
    RequestRelease,
    ApproveRelease,
    ExecuteRelease,
    EmergencyRelease,
    CancelRelease,
    SettleRelease,
    Reconcile,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::DefineMilestones => "define milestones",
            Action::SubmitEvidence => "submit milestone evidence",
            Action::ReviewMilestone => "review milestone",
            Action::RequestRelease => "request release",
            Action::ApproveRelease => "approve release",
            Action::ExecuteRelease => "execute release",
            Action::EmergencyRelease => "request emergency release",
            Action::CancelRelease => "cancel release",
            Action::SettleRelease => "settle release",
            Action::Reconcile => "reconcile contributions",
        })
    }
}

/// Facts about the target record the decision depends on
#[derive(Debug, Clone, Copy, Default)]
pub struct Subject<'a> {
    pub owner: Option<&'a UserId>,
    pub requester: Option<&'a UserId>,
}

impl<'a> Subject<'a> {
    pub fn owned_by(owner: &'a UserId) -> Self {
        Self {
            owner: Some(owner),
            requester: None,
        }
    }

    pub fn requested_by(mut self, requester: &'a UserId) -> Self {
        self.requester = Some(requester);
        self
    }
}

pub fn is_allowed(actor: &Actor, action: Action, subject: Subject<'_>) -> bool {
    let is_owner = subject.owner == Some(&actor.id);
    let is_requester = subject.requester == Some(&actor.id);
    let can_review = matches!(actor.role, Role::Reviewer | Role::Admin);

    match action {
        Action::DefineMilestones
        | Action::SubmitEvidence
        | Action::RequestRelease
        | Action::ExecuteRelease => is_owner || actor.is_admin(),
        Action::ReviewMilestone => can_review && !is_owner,
        Action::ApproveRelease => can_review && !is_requester && !is_owner,
        Action::EmergencyRelease
        | Action::CancelRelease
        | Action::SettleRelease
        | Action::Reconcile => actor.is_admin(),
    }
}

pub fn authorize(actor: &Actor, action: Action, subject: Subject<'_>) -> Result<()> {
    if is_allowed(actor, action, subject) {
        Ok(())
    } else {
        Err(EscrowError::Unauthorized {
            actor: actor.id.to_string(),
            action: action.to_string(),
        })
    }
}
