//! Milestone and escrow release coordination.
//!
//! Milestones move `pending -> in_review -> approved -> released`, with
//! `rejected` as a detour back to review. Funds leave escrow only through a
//! release that was requested against an approved milestone (or by an admin
//! as an emergency), approved by a second person, and executed on chain.
//! The chain decides: a failed withdrawal fails the release and leaves the
//! milestone approved, a successful one is never rolled back.
//!
//! Each release is marked before its withdrawal is sent. A marked release
//! that is still approved had its result lost, so it counts as released and
//! cannot be executed or cancelled until an admin settles it.

use crate::classifier::{report, Classify};
use crate::error::{EscrowError, Result};
use crate::events::{EscrowEvent, EventBus};
use crate::outcome::{Completed, ServiceResult};
use crate::policy::{authorize, Action, Actor, Subject};
use chrono::{DateTime, Utc};
use forge_chain::ChainClient;
use forge_storage::ForgeStorage;
use forge_types::{
    allocation_is_complete, allocation_total, EscrowRelease, EscrowStatus, Milestone, MilestoneId,
    MilestoneStatus, NewMilestone, ProjectEscrow, ProjectId, ProjectKey, ProjectRecord, ReleaseId,
    ReleaseStatus, ReleaseType, TxHash, Wei,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Sum of executed releases, plus those whose withdrawal outcome is unknown
pub fn released_total(releases: &[EscrowRelease]) -> Wei {
    releases
        .iter()
        .filter(|r| r.status == ReleaseStatus::Executed || r.is_unsettled())
        .map(|r| r.amount)
        .sum()
}

/// Derived escrow view.
///
/// Status precedence: completed, then emergency release, then disputed
/// (some milestone currently rejected), then active.
pub fn escrow_view(
    project_id: &ProjectId,
    total_funds: Wei,
    milestones: &[Milestone],
    releases: &[EscrowRelease],
) -> ProjectEscrow {
    let released_funds = released_total(releases);
    let milestone_count = milestones.len() as u64;
    let completed_milestones = milestones
        .iter()
        .filter(|m| m.status == MilestoneStatus::Released)
        .count() as u64;

    let escrow_status = if milestone_count > 0 && completed_milestones == milestone_count {
        EscrowStatus::Completed
    } else if releases
        .iter()
        .any(|r| r.release_type == ReleaseType::Emergency && r.is_active())
    {
        EscrowStatus::EmergencyRelease
    } else if milestones.iter().any(|m| m.status == MilestoneStatus::Rejected) {
        EscrowStatus::Disputed
    } else {
        EscrowStatus::Active
    };

    ProjectEscrow {
        project_id: project_id.clone(),
        total_funds,
        released_funds,
        locked_funds: total_funds.saturating_sub(released_funds),
        milestone_count,
        completed_milestones,
        escrow_status,
    }
}

fn format_units(units: u64) -> String {
    format!("{}.{:06}%", units / 1_000_000, units % 1_000_000)
}

pub struct EscrowCoordinator {
    storage: Arc<dyn ForgeStorage>,
    chain: Arc<dyn ChainClient>,
    events: Arc<EventBus>,
    in_flight: Mutex<HashSet<ReleaseId>>,
}

impl EscrowCoordinator {
    pub fn new(
        storage: Arc<dyn ForgeStorage>,
        chain: Arc<dyn ChainClient>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            storage,
            chain,
            events,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Define the milestone plan of a project. All rows land or none do.
    pub async fn create_milestones(
        &self,
        project_id: &ProjectId,
        milestones: Vec<NewMilestone>,
        actor: &Actor,
    ) -> ServiceResult<Vec<Milestone>> {
        self.create_milestones_inner(project_id, milestones, actor)
            .await
            .map_err(|e| report("create_milestones", e))
    }

    pub async fn submit_milestone_completion(
        &self,
        milestone_id: &MilestoneId,
        evidence: &str,
        actor: &Actor,
    ) -> ServiceResult<Milestone> {
        self.submit_inner(milestone_id, evidence, actor)
            .await
            .map_err(|e| report("submit_milestone_completion", e))
    }

    pub async fn approve_milestone(
        &self,
        milestone_id: &MilestoneId,
        comments: Option<String>,
        actor: &Actor,
    ) -> ServiceResult<Milestone> {
        self.review_inner(milestone_id, MilestoneStatus::Approved, comments, actor)
            .await
            .map_err(|e| report("approve_milestone", e))
    }

    pub async fn reject_milestone(
        &self,
        milestone_id: &MilestoneId,
        comments: &str,
        actor: &Actor,
    ) -> ServiceResult<Milestone> {
        let result = if comments.trim().is_empty() {
            Err(EscrowError::InvalidInput(
                "rejecting a milestone requires comments".to_string(),
            ))
        } else {
            self.review_inner(
                milestone_id,
                MilestoneStatus::Rejected,
                Some(comments.to_string()),
                actor,
            )
            .await
        };
        result.map_err(|e| report("reject_milestone", e))
    }

    /// Open a release for an approved milestone. The amount is fixed now,
    /// from the raised total on chain, and never recomputed.
    pub async fn request_milestone_release(
        &self,
        project_id: &ProjectId,
        milestone_id: &MilestoneId,
        requested_by: &Actor,
    ) -> ServiceResult<EscrowRelease> {
        self.request_release_inner(project_id, milestone_id, requested_by)
            .await
            .map_err(|e| report("request_milestone_release", e))
    }

    pub async fn approve_release(
        &self,
        release_id: &ReleaseId,
        approver: &Actor,
    ) -> ServiceResult<EscrowRelease> {
        self.approve_release_inner(release_id, approver)
            .await
            .map_err(|e| report("approve_release", e))
    }

    /// Withdraw the funds of an approved release.
    ///
    /// If the withdrawal succeeds but recording it fails, the result is still
    /// a success and carries a bookkeeping warning.
    pub async fn execute_fund_release(
        &self,
        release_id: &ReleaseId,
        executed_by: &Actor,
    ) -> ServiceResult<Completed<EscrowRelease>> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(*release_id) {
                return Err(report(
                    "execute_fund_release",
                    EscrowError::ReleaseInProgress(*release_id),
                ));
            }
        }

        let result = self.execute_inner(release_id, executed_by).await;
        self.in_flight.lock().await.remove(release_id);
        result.map_err(|e| report("execute_fund_release", e))
    }

    /// Admin-only: fail a release that has not been executed
    pub async fn cancel_release(
        &self,
        release_id: &ReleaseId,
        actor: &Actor,
        reason: &str,
    ) -> ServiceResult<EscrowRelease> {
        self.cancel_inner(release_id, actor, reason)
            .await
            .map_err(|e| report("cancel_release", e))
    }

    pub async fn get_project_escrow_status(
        &self,
        project_id: &ProjectId,
    ) -> ServiceResult<ProjectEscrow> {
        self.escrow_status_inner(project_id)
            .await
            .map_err(|e| report("get_project_escrow_status", e))
    }

    /// Admin-only: record the outcome of a withdrawal that was sent but never
    /// recorded. With a transaction hash the release is executed, without one
    /// it is failed. Also finishes the milestone of an executed release whose
    /// milestone update was lost.
    pub async fn settle_release(
        &self,
        release_id: &ReleaseId,
        tx_hash: Option<TxHash>,
        actor: &Actor,
    ) -> ServiceResult<EscrowRelease> {
        self.settle_inner(release_id, tx_hash, actor)
            .await
            .map_err(|e| report("settle_release", e))
    }

    /// Admin escape hatch: release everything still locked, no milestone needed
    pub async fn request_emergency_release(
        &self,
        project_id: &ProjectId,
        reason: &str,
        requested_by: &Actor,
    ) -> ServiceResult<EscrowRelease> {
        self.emergency_inner(project_id, reason, requested_by)
            .await
            .map_err(|e| report("request_emergency_release", e))
    }

    pub async fn project_milestones(&self, project_id: &ProjectId) -> ServiceResult<Vec<Milestone>> {
        self.milestones_inner(project_id)
            .await
            .map_err(|e| report("project_milestones", e))
    }

    pub async fn project_releases(
        &self,
        project_id: &ProjectId,
    ) -> ServiceResult<Vec<EscrowRelease>> {
        self.releases_inner(project_id)
            .await
            .map_err(|e| report("project_releases", e))
    }

    async fn milestones_inner(&self, project_id: &ProjectId) -> Result<Vec<Milestone>> {
        let project = self.project_by_chain_id(project_id).await?;
        Ok(self.storage.list_milestones(&project.id).await?)
    }

    async fn releases_inner(&self, project_id: &ProjectId) -> Result<Vec<EscrowRelease>> {
        let project = self.project_by_chain_id(project_id).await?;
        Ok(self.storage.list_releases(&project.id).await?)
    }

    async fn project_by_chain_id(&self, project_id: &ProjectId) -> Result<ProjectRecord> {
        self.storage
            .find_project(project_id)
            .await?
            .ok_or_else(|| EscrowError::ProjectNotFound(project_id.to_string()))
    }

    async fn project_by_key(&self, key: &ProjectKey) -> Result<ProjectRecord> {
        self.storage
            .get_project(key)
            .await?
            .ok_or_else(|| EscrowError::ProjectNotFound(key.to_string()))
    }

    async fn milestone(&self, id: &MilestoneId) -> Result<Milestone> {
        self.storage
            .get_milestone(id)
            .await?
            .ok_or(EscrowError::MilestoneNotFound(*id))
    }

    async fn release(&self, id: &ReleaseId) -> Result<EscrowRelease> {
        self.storage
            .get_release(id)
            .await?
            .ok_or(EscrowError::ReleaseNotFound(*id))
    }

    /// Raised amount according to the contract
    async fn raised_on_chain(&self, project: &ProjectRecord) -> Result<Wei> {
        let on_chain = self
            .chain
            .get_project(&project.chain_project_id)
            .await?
            .ok_or_else(|| EscrowError::ProjectNotFound(project.chain_project_id.to_string()))?;
        Ok(on_chain.raised_amount)
    }

    async fn create_milestones_inner(
        &self,
        project_id: &ProjectId,
        milestones: Vec<NewMilestone>,
        actor: &Actor,
    ) -> Result<Vec<Milestone>> {
        let project = self.project_by_chain_id(project_id).await?;
        authorize(actor, Action::DefineMilestones, Subject::owned_by(&project.owner_id))?;

        if milestones.is_empty() {
            return Err(EscrowError::InvalidInput(
                "at least one milestone is required".to_string(),
            ));
        }
        if milestones.iter().any(|m| m.title.trim().is_empty()) {
            return Err(EscrowError::InvalidInput("milestone title is required".to_string()));
        }
        if !allocation_is_complete(&milestones) {
            return Err(EscrowError::InvalidAllocation {
                total: format_units(allocation_total(&milestones)),
            });
        }
        if !self.storage.list_milestones(&project.id).await?.is_empty() {
            return Err(EscrowError::InvalidInput(format!(
                "project {} already has milestones",
                project_id
            )));
        }

        let now = Utc::now();
        let rows: Vec<Milestone> = milestones
            .into_iter()
            .map(|m| Milestone::from_new(project.id, m, now))
            .collect();
        self.storage.insert_milestones(&rows).await?;

        for m in &rows {
            self.events.emit(EscrowEvent::MilestoneUpdated {
                milestone_id: m.id,
                status: m.status,
                timestamp: now,
            });
        }
        info!(project = %project_id, count = rows.len(), "🗂️ Milestones created");
        Ok(rows)
    }

    async fn submit_inner(
        &self,
        milestone_id: &MilestoneId,
        evidence: &str,
        actor: &Actor,
    ) -> Result<Milestone> {
        let mut milestone = self.milestone(milestone_id).await?;
        let project = self.project_by_key(&milestone.project_id).await?;
        authorize(actor, Action::SubmitEvidence, Subject::owned_by(&project.owner_id))?;

        if evidence.trim().is_empty() {
            return Err(EscrowError::InvalidInput("evidence is required".to_string()));
        }
        let previous = milestone.status;
        if !matches!(previous, MilestoneStatus::Pending | MilestoneStatus::Rejected) {
            return Err(EscrowError::InvalidMilestoneStatus {
                expected: "pending or rejected".to_string(),
                found: previous,
            });
        }

        milestone.evidence = Some(evidence.to_string());
        milestone.transition(MilestoneStatus::InReview, Utc::now())?;
        self.storage.update_milestone(&milestone, previous).await?;
        self.milestone_changed(&milestone, &project, actor);
        Ok(milestone)
    }

    async fn review_inner(
        &self,
        milestone_id: &MilestoneId,
        decision: MilestoneStatus,
        comments: Option<String>,
        actor: &Actor,
    ) -> Result<Milestone> {
        let mut milestone = self.milestone(milestone_id).await?;
        let project = self.project_by_key(&milestone.project_id).await?;
        authorize(actor, Action::ReviewMilestone, Subject::owned_by(&project.owner_id))?;

        if milestone.status != MilestoneStatus::InReview {
            return Err(EscrowError::InvalidMilestoneStatus {
                expected: MilestoneStatus::InReview.to_string(),
                found: milestone.status,
            });
        }

        if comments.is_some() {
            milestone.reviewer_comments = comments;
        }
        milestone.transition(decision, Utc::now())?;
        self.storage
            .update_milestone(&milestone, MilestoneStatus::InReview)
            .await?;
        self.milestone_changed(&milestone, &project, actor);
        Ok(milestone)
    }

    fn milestone_changed(&self, milestone: &Milestone, project: &ProjectRecord, actor: &Actor) {
        self.events.emit(EscrowEvent::MilestoneUpdated {
            milestone_id: milestone.id,
            status: milestone.status,
            timestamp: milestone.updated_at,
        });
        info!(
            project = %project.chain_project_id,
            milestone = %milestone.id,
            status = %milestone.status,
            actor = %actor.id,
            "📌 Milestone updated"
        );
    }

    async fn request_release_inner(
        &self,
        project_id: &ProjectId,
        milestone_id: &MilestoneId,
        actor: &Actor,
    ) -> Result<EscrowRelease> {
        let project = self.project_by_chain_id(project_id).await?;
        let milestone = self.milestone(milestone_id).await?;
        if milestone.project_id != project.id {
            return Err(EscrowError::InvalidInput(format!(
                "milestone {} does not belong to project {}",
                milestone_id, project_id
            )));
        }
        authorize(actor, Action::RequestRelease, Subject::owned_by(&project.owner_id))?;

        if milestone.status != MilestoneStatus::Approved {
            return Err(EscrowError::MilestoneNotApproved {
                milestone: milestone.id,
                status: milestone.status,
            });
        }

        let releases = self.storage.list_releases(&project.id).await?;
        if releases
            .iter()
            .any(|r| r.milestone_id == Some(milestone.id) && r.is_active())
        {
            return Err(EscrowError::ReleaseAlreadyRequested(format!(
                "milestone {}",
                milestone.id
            )));
        }

        let raised = self.raised_on_chain(&project).await?;
        let locked = raised.saturating_sub(released_total(&releases));
        let amount = raised.percent_of(milestone.target_amount).min(locked);
        if amount.is_zero() {
            return Err(EscrowError::NoLockedFunds);
        }

        let siblings = self.storage.list_milestones(&project.id).await?;
        let release_type = if siblings
            .iter()
            .all(|m| m.id == milestone.id || m.status == MilestoneStatus::Released)
        {
            ReleaseType::Final
        } else {
            ReleaseType::Milestone
        };

        let release = EscrowRelease::new(
            project.id,
            Some(milestone.id),
            amount,
            release_type,
            actor.id.clone(),
            Utc::now(),
        );
        self.storage.insert_release(&release).await?;

        self.events.emit(EscrowEvent::ReleaseRequested {
            release_id: release.id,
            release_type,
            amount,
            timestamp: release.requested_at,
        });
        info!(
            project = %project_id,
            milestone = %milestone.id,
            release = %release.id,
            amount = %amount,
            raised = %raised,
            percent = %milestone.target_amount,
            "💰 Release requested"
        );
        Ok(release)
    }

    async fn approve_release_inner(
        &self,
        release_id: &ReleaseId,
        approver: &Actor,
    ) -> Result<EscrowRelease> {
        let mut release = self.release(release_id).await?;
        let project = self.project_by_key(&release.project_id).await?;
        authorize(
            approver,
            Action::ApproveRelease,
            Subject::owned_by(&project.owner_id).requested_by(&release.requested_by),
        )?;

        if release.status != ReleaseStatus::Pending {
            return Err(EscrowError::InvalidReleaseStatus {
                release: release.id,
                status: release.status,
                expected: ReleaseStatus::Pending.to_string(),
            });
        }

        let now = Utc::now();
        release.transition(ReleaseStatus::Approved)?;
        release.approved_by = Some(approver.id.clone());
        release.approved_at = Some(now);
        self.storage
            .update_release(&release, ReleaseStatus::Pending)
            .await?;

        self.events.emit(EscrowEvent::ReleaseApproved {
            release_id: release.id,
            timestamp: now,
        });
        info!(
            project = %project.chain_project_id,
            release = %release.id,
            approver = %approver.id,
            "👍 Release approved"
        );
        Ok(release)
    }

    async fn execute_inner(
        &self,
        release_id: &ReleaseId,
        actor: &Actor,
    ) -> Result<Completed<EscrowRelease>> {
        let start = Instant::now();
        let release = self.release(release_id).await?;
        if release.status != ReleaseStatus::Approved {
            return Err(EscrowError::InvalidReleaseStatus {
                release: release.id,
                status: release.status,
                expected: ReleaseStatus::Approved.to_string(),
            });
        }
        if release.is_unsettled() {
            return Err(EscrowError::WithdrawalUnsettled(release.id));
        }
        let project = self.project_by_key(&release.project_id).await?;
        authorize(actor, Action::ExecuteRelease, Subject::owned_by(&project.owner_id))?;

        let milestone = match release.milestone_id {
            Some(id) => {
                let milestone = self.milestone(&id).await?;
                if milestone.status != MilestoneStatus::Approved {
                    return Err(EscrowError::MilestoneNotApproved {
                        milestone: milestone.id,
                        status: milestone.status,
                    });
                }
                Some(milestone)
            }
            None => None,
        };

        let raised = self.raised_on_chain(&project).await?;
        let releases = self.storage.list_releases(&project.id).await?;
        let locked = raised.saturating_sub(released_total(&releases));
        if release.amount > locked {
            return Err(EscrowError::ExceedsLockedFunds {
                amount: release.amount,
                locked,
            });
        }

        let mut marked = release;
        marked.withdrawal_started_at = Some(Utc::now());
        self.storage
            .update_release(&marked, ReleaseStatus::Approved)
            .await?;

        let tx_hash = match self.chain.withdraw_funds(&project.chain_project_id).await {
            Ok(hash) => hash,
            Err(e) => {
                self.mark_failed(marked, e.to_string()).await;
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let mut executed = marked;
        executed.transition(ReleaseStatus::Executed)?;
        executed.transaction_hash = Some(tx_hash.clone());
        executed.executed_at = Some(now);

        let mut bookkeeping: Option<EscrowError> = None;
        if let Err(e) = self
            .storage
            .update_release(&executed, ReleaseStatus::Approved)
            .await
        {
            bookkeeping = Some(e.into());
        }
        if let Some(milestone) = milestone {
            if let Err(e) = self.mark_milestone_released(milestone, now).await {
                bookkeeping.get_or_insert(e);
            }
        }

        self.events.emit(EscrowEvent::ReleaseExecuted {
            release_id: executed.id,
            tx_hash: tx_hash.clone(),
            amount: executed.amount,
            timestamp: now,
        });

        if let Some(e) = bookkeeping {
            let classified = e.classify();
            error!(
                project = %project.chain_project_id,
                release = %executed.id,
                tx = %tx_hash,
                error = %classified.detail,
                "❌ Funds withdrawn but escrow records were not updated"
            );
            self.events.emit(EscrowEvent::BookkeepingLagged {
                tx_hash: tx_hash.clone(),
                reason: classified.detail.clone(),
                timestamp: now,
            });
            return Ok(Completed::lagging(executed, tx_hash, classified));
        }

        info!(
            project = %project.chain_project_id,
            release = %executed.id,
            amount = %executed.amount,
            tx = %tx_hash.short(),
            duration_ms = start.elapsed().as_millis() as u64,
            "🏁 Release executed"
        );
        Ok(Completed::clean(executed))
    }

    async fn mark_milestone_released(
        &self,
        mut milestone: Milestone,
        now: DateTime<Utc>,
    ) -> Result<()> {
        milestone.transition(MilestoneStatus::Released, now)?;
        self.storage
            .update_milestone(&milestone, MilestoneStatus::Approved)
            .await?;
        self.events.emit(EscrowEvent::MilestoneUpdated {
            milestone_id: milestone.id,
            status: milestone.status,
            timestamp: now,
        });
        Ok(())
    }

    async fn settle_inner(
        &self,
        release_id: &ReleaseId,
        tx_hash: Option<TxHash>,
        actor: &Actor,
    ) -> Result<EscrowRelease> {
        let release = self.release(release_id).await?;
        let project = self.project_by_key(&release.project_id).await?;
        authorize(actor, Action::SettleRelease, Subject::owned_by(&project.owner_id))?;
        if self.in_flight.lock().await.contains(release_id) {
            return Err(EscrowError::ReleaseInProgress(*release_id));
        }

        let milestone = match release.milestone_id {
            Some(id) => Some(self.milestone(&id).await?),
            None => None,
        };
        let milestone_pending = milestone
            .as_ref()
            .map_or(false, |m| m.status == MilestoneStatus::Approved);
        let now = Utc::now();

        let settled = if release.is_unsettled() {
            let Some(tx_hash) = tx_hash else {
                let reason = format!("withdrawal not found on chain, settled by {}", actor.id);
                self.mark_failed(release, reason).await;
                return self.release(release_id).await;
            };
            let mut executed = release;
            executed.transition(ReleaseStatus::Executed)?;
            executed.transaction_hash = Some(tx_hash.clone());
            executed.executed_at = Some(now);
            self.storage
                .update_release(&executed, ReleaseStatus::Approved)
                .await?;
            self.events.emit(EscrowEvent::ReleaseExecuted {
                release_id: executed.id,
                tx_hash,
                amount: executed.amount,
                timestamp: now,
            });
            executed
        } else if release.status == ReleaseStatus::Executed && milestone_pending {
            release
        } else {
            return Err(EscrowError::InvalidReleaseStatus {
                release: release.id,
                status: release.status,
                expected: "unsettled withdrawal".to_string(),
            });
        };

        if let Some(milestone) = milestone.filter(|_| milestone_pending) {
            self.mark_milestone_released(milestone, now).await?;
        }
        warn!(
            release = %settled.id,
            status = %settled.status,
            actor = %actor.id,
            "🧾 Release settled by admin"
        );
        Ok(settled)
    }

    /// Record a failed withdrawal; the milestone keeps its status
    async fn mark_failed(&self, mut release: EscrowRelease, reason: String) {
        let expected = release.status;
        if let Err(e) = release.transition(ReleaseStatus::Failed) {
            warn!(release = %release.id, error = %e, "Release could not be marked failed");
            return;
        }
        release.failure_reason = Some(reason.clone());
        if let Err(e) = self.storage.update_release(&release, expected).await {
            error!(release = %release.id, error = %e, "Failed to record release failure");
        }
        self.events.emit(EscrowEvent::ReleaseFailed {
            release_id: release.id,
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        warn!(release = %release.id, reason = %reason, "⚠️ Release failed");
    }

    async fn cancel_inner(
        &self,
        release_id: &ReleaseId,
        actor: &Actor,
        reason: &str,
    ) -> Result<EscrowRelease> {
        let mut release = self.release(release_id).await?;
        let project = self.project_by_key(&release.project_id).await?;
        authorize(actor, Action::CancelRelease, Subject::owned_by(&project.owner_id))?;

        if release.status.is_terminal() {
            return Err(EscrowError::InvalidReleaseStatus {
                release: release.id,
                status: release.status,
                expected: "pending or approved".to_string(),
            });
        }
        if release.is_unsettled() {
            return Err(EscrowError::WithdrawalUnsettled(release.id));
        }
        if self.in_flight.lock().await.contains(release_id) {
            return Err(EscrowError::ReleaseInProgress(*release_id));
        }

        let expected = release.status;
        release.transition(ReleaseStatus::Failed)?;
        release.failure_reason = Some(format!("cancelled by {}: {}", actor.id, reason));
        self.storage.update_release(&release, expected).await?;

        self.events.emit(EscrowEvent::ReleaseFailed {
            release_id: release.id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        info!(release = %release.id, actor = %actor.id, reason, "🛑 Release cancelled");
        Ok(release)
    }

    async fn escrow_status_inner(&self, project_id: &ProjectId) -> Result<ProjectEscrow> {
        let project = self.project_by_chain_id(project_id).await?;
        let raised = self.raised_on_chain(&project).await?;
        let milestones = self.storage.list_milestones(&project.id).await?;
        let releases = self.storage.list_releases(&project.id).await?;
        Ok(escrow_view(project_id, raised, &milestones, &releases))
    }

    async fn emergency_inner(
        &self,
        project_id: &ProjectId,
        reason: &str,
        actor: &Actor,
    ) -> Result<EscrowRelease> {
        let project = self.project_by_chain_id(project_id).await?;
        authorize(actor, Action::EmergencyRelease, Subject::owned_by(&project.owner_id))?;
        if reason.trim().is_empty() {
            return Err(EscrowError::InvalidInput(
                "emergency release requires a reason".to_string(),
            ));
        }

        let releases = self.storage.list_releases(&project.id).await?;
        if releases.iter().any(|r| {
            r.release_type == ReleaseType::Emergency
                && matches!(r.status, ReleaseStatus::Pending | ReleaseStatus::Approved)
        }) {
            return Err(EscrowError::ReleaseAlreadyRequested(
                "emergency release".to_string(),
            ));
        }

        let raised = self.raised_on_chain(&project).await?;
        let locked = raised.saturating_sub(released_total(&releases));
        if locked.is_zero() {
            return Err(EscrowError::NoLockedFunds);
        }

        let mut release = EscrowRelease::new(
            project.id,
            None,
            locked,
            ReleaseType::Emergency,
            actor.id.clone(),
            Utc::now(),
        );
        release.reason = Some(reason.to_string());
        self.storage.insert_release(&release).await?;

        self.events.emit(EscrowEvent::ReleaseRequested {
            release_id: release.id,
            release_type: ReleaseType::Emergency,
            amount: locked,
            timestamp: release.requested_at,
        });
        warn!(
            project = %project_id,
            release = %release.id,
            amount = %locked,
            actor = %actor.id,
            reason,
            "🚨 Emergency release requested"
        );
        Ok(release)
    }
}
