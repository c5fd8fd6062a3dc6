//! Contribution ledger.
//!
//! One row per donation transaction, keyed by its hash. Project totals are
//! never incremented: every status change resums the confirmed rows, so
//! retries and replays cannot make the numbers drift.

use crate::classifier::report;
use crate::error::{EscrowError, Result};
use crate::events::{EscrowEvent, EventBus};
use crate::outcome::ServiceResult;
use chrono::Utc;
use forge_storage::{ForgeStorage, StorageError};
use forge_types::{
    Contribution, ContributionStatus, ContributionSummary, NewContribution, ProjectId, ProjectKey,
    ProjectRecord, TxHash, TypesError, UserId, Wei,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Everything known about a donation right after the chain accepted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionIntent {
    pub project_id: ProjectId,
    pub contributor_id: UserId,
    pub amount: Wei,
    pub currency: String,
    pub tx_hash: TxHash,
    pub message: Option<String>,
    pub anonymous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTotals {
    pub current_funding: Wei,
    pub total_backers: u64,
}

/// Totals over confirmed rows, counting each contributor once
pub fn confirmed_totals(contributions: &[Contribution]) -> ProjectTotals {
    let confirmed = contributions
        .iter()
        .filter(|c| c.status == ContributionStatus::Confirmed);
    let current_funding = confirmed.clone().map(|c| c.amount).sum();
    let backers: HashSet<&UserId> = confirmed.map(|c| &c.contributor_id).collect();
    ProjectTotals {
        current_funding,
        total_backers: backers.len() as u64,
    }
}

pub struct ContributionLedger {
    storage: Arc<dyn ForgeStorage>,
    events: Arc<EventBus>,
    /// Donations the chain accepted but storage did not take, by hash
    unrecorded: Mutex<HashMap<TxHash, ContributionIntent>>,
}

impl ContributionLedger {
    pub fn new(storage: Arc<dyn ForgeStorage>, events: Arc<EventBus>) -> Self {
        Self {
            storage,
            events,
            unrecorded: Mutex::new(HashMap::new()),
        }
    }

    /// Keep a donation whose row could not be written so reconciliation can
    /// record it later. Recording it by any path clears it.
    pub async fn hold_unrecorded(&self, intent: ContributionIntent) {
        warn!(
            project = %intent.project_id,
            tx = %intent.tx_hash,
            amount = %intent.amount,
            "Holding unrecorded contribution for reconciliation"
        );
        self.unrecorded
            .lock()
            .await
            .insert(intent.tx_hash.clone(), intent);
    }

    pub async fn unrecorded(&self) -> Vec<ContributionIntent> {
        self.unrecorded.lock().await.values().cloned().collect()
    }

    /// Insert a pending row; a known hash returns the existing row instead
    pub async fn save_contribution(&self, data: NewContribution) -> ServiceResult<Contribution> {
        self.save(data)
            .await
            .map_err(|e| report("save_contribution", e))
    }

    /// Move a contribution to `confirmed` or `failed` and recompute totals.
    ///
    /// Replaying the status a row already has is a no-op; any other change of
    /// a resolved row is refused.
    pub async fn update_contribution_status(
        &self,
        tx_hash: &TxHash,
        status: ContributionStatus,
        block_number: Option<u64>,
        gas_used: Option<u64>,
    ) -> ServiceResult<Contribution> {
        self.apply_status(tx_hash, status, block_number, gas_used)
            .await
            .map_err(|e| report("update_contribution_status", e))
    }

    pub async fn get_project_contributions(
        &self,
        project_id: &ProjectId,
    ) -> ServiceResult<ContributionSummary> {
        self.summary(project_id)
            .await
            .map_err(|e| report("get_project_contributions", e))
    }

    /// Record a freshly submitted donation without waiting for the chain
    pub async fn process_contribution(
        &self,
        intent: ContributionIntent,
    ) -> ServiceResult<Contribution> {
        self.process(intent)
            .await
            .map_err(|e| report("process_contribution", e))
    }

    pub async fn pending_contributions(&self) -> ServiceResult<Vec<Contribution>> {
        self.storage
            .list_contributions_by_status(ContributionStatus::Pending)
            .await
            .map_err(|e| report("pending_contributions", e))
    }

    pub async fn contribution(&self, tx_hash: &TxHash) -> ServiceResult<Option<Contribution>> {
        self.storage
            .get_contribution(tx_hash)
            .await
            .map_err(|e| report("contribution", e))
    }

    /// Resum confirmed rows and store the result on the project
    pub async fn recompute_totals(&self, project: &ProjectKey) -> ServiceResult<ProjectTotals> {
        self.recompute(project)
            .await
            .map_err(|e| report("recompute_totals", e))
    }

    async fn save(&self, data: NewContribution) -> Result<Contribution> {
        let contribution = Contribution::from_new(data, Utc::now());
        match self.storage.insert_contribution(&contribution).await {
            Ok(()) => {
                debug!(
                    tx = %contribution.blockchain_tx_hash.short(),
                    amount = %contribution.amount,
                    "Contribution row inserted"
                );
                Ok(contribution)
            }
            Err(StorageError::AlreadyExists(_)) => {
                let hash = contribution.blockchain_tx_hash;
                debug!(tx = %hash.short(), "Known transaction hash, returning existing row");
                self.storage
                    .get_contribution(&hash)
                    .await?
                    .ok_or(EscrowError::ContributionNotFound(hash))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_project(&self, project_id: &ProjectId) -> Result<ProjectRecord> {
        self.storage
            .find_project(project_id)
            .await?
            .ok_or_else(|| EscrowError::ProjectNotFound(project_id.to_string()))
    }

    async fn process(&self, intent: ContributionIntent) -> Result<Contribution> {
        let start = Instant::now();
        let project = self.find_project(&intent.project_id).await?;

        let contribution = self
            .save(NewContribution {
                project_id: project.id,
                contributor_id: intent.contributor_id,
                amount: intent.amount,
                currency: intent.currency,
                blockchain_tx_hash: intent.tx_hash,
                contribution_message: intent.message,
                is_anonymous: intent.anonymous,
            })
            .await?;
        self.unrecorded
            .lock()
            .await
            .remove(&contribution.blockchain_tx_hash);

        // Pending rows do not move the totals; a failed resum here is repaired
        // by the next status change.
        if let Err(e) = self.recompute(&project.id).await {
            warn!(project = %intent.project_id, error = %e, "Totals recomputation failed");
        }

        self.events.emit(EscrowEvent::ContributionRecorded {
            project_id: intent.project_id.clone(),
            tx_hash: contribution.blockchain_tx_hash.clone(),
            amount: contribution.amount,
            timestamp: Utc::now(),
        });
        info!(
            project = %intent.project_id,
            contributor = %contribution.contributor_id,
            amount = %contribution.amount,
            tx = %contribution.blockchain_tx_hash.short(),
            duration_ms = start.elapsed().as_millis() as u64,
            "📥 Contribution recorded"
        );
        Ok(contribution)
    }

    async fn apply_status(
        &self,
        tx_hash: &TxHash,
        status: ContributionStatus,
        block_number: Option<u64>,
        gas_used: Option<u64>,
    ) -> Result<Contribution> {
        if !status.is_terminal() {
            return Err(EscrowError::InvalidInput(format!(
                "contributions can only be resolved to confirmed or failed, not {}",
                status
            )));
        }

        let mut contribution = self
            .storage
            .get_contribution(tx_hash)
            .await?
            .ok_or_else(|| EscrowError::ContributionNotFound(tx_hash.clone()))?;

        let mut changed = contribution.resolve(status, block_number, gas_used, Utc::now())?;
        if changed {
            match self
                .storage
                .update_contribution(&contribution, ContributionStatus::Pending)
                .await
            {
                Ok(()) => {}
                Err(StorageError::Conflict { .. }) => {
                    // Another writer resolved it first
                    let current = self
                        .storage
                        .get_contribution(tx_hash)
                        .await?
                        .ok_or_else(|| EscrowError::ContributionNotFound(tx_hash.clone()))?;
                    if current.status != status {
                        return Err(TypesError::InvalidTransition {
                            from: current.status.to_string(),
                            to: status.to_string(),
                        }
                        .into());
                    }
                    contribution = current;
                    changed = false;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let totals = self.recompute(&contribution.project_id).await?;

        if changed {
            self.events.emit(EscrowEvent::ContributionResolved {
                tx_hash: tx_hash.clone(),
                status,
                timestamp: Utc::now(),
            });
            info!(
                tx = %tx_hash.short(),
                status = %status,
                block = ?contribution.block_number,
                current_funding = %totals.current_funding,
                total_backers = totals.total_backers,
                "✅ Contribution resolved"
            );
        } else {
            debug!(tx = %tx_hash.short(), status = %status, "Contribution status replayed");
        }
        Ok(contribution)
    }

    async fn recompute(&self, project: &ProjectKey) -> Result<ProjectTotals> {
        let contributions = self.storage.list_contributions(project).await?;
        let totals = confirmed_totals(&contributions);
        self.storage
            .update_project_totals(project, totals.current_funding, totals.total_backers)
            .await?;
        Ok(totals)
    }

    async fn summary(&self, project_id: &ProjectId) -> Result<ContributionSummary> {
        let project = self.find_project(project_id).await?;
        let contributions = self.storage.list_contributions(&project.id).await?;
        let totals = confirmed_totals(&contributions);
        Ok(ContributionSummary {
            contributions,
            total_amount: totals.current_funding,
            total_contributors: totals.total_backers,
        })
    }
}
