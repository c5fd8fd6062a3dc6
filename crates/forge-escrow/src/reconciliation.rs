//! Catch-up for contributions the monitor gave up on, and for donations the
//! chain accepted while the ledger was unavailable.

use crate::classifier::{report, Classify};
use crate::error::EscrowError;
use crate::ledger::{ContributionIntent, ContributionLedger};
use crate::monitor::TransactionMonitor;
use crate::outcome::ServiceResult;
use crate::policy::{authorize, Action, Actor, Subject};
use chrono::{Duration, Utc};
use forge_chain::ChainClient;
use forge_types::{Contribution, ContributionStatus, TxHash};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub examined: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub still_pending: usize,
    /// Left alone because the monitor is still on them
    pub skipped_watched: usize,
    /// Held donations written to the ledger and handed to the monitor
    pub recovered: usize,
    pub errors: usize,
}

pub struct Reconciler {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<ContributionLedger>,
    monitor: Arc<TransactionMonitor>,
}

impl Reconciler {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<ContributionLedger>,
        monitor: Arc<TransactionMonitor>,
    ) -> Self {
        Self {
            chain,
            ledger,
            monitor,
        }
    }

    /// Fetch the receipt once for every unwatched pending contribution older
    /// than `min_age` and apply what it says, then record any held donations
    /// and start watching them.
    pub async fn reconcile_pending(&self, min_age: Duration) -> ServiceResult<ReconciliationReport> {
        let cutoff = Utc::now() - min_age;
        let pending = self.ledger.pending_contributions().await?;
        let mut report = ReconciliationReport::default();

        for intent in self.ledger.unrecorded().await {
            let hash = intent.tx_hash.clone();
            match self.ledger.process_contribution(intent).await {
                Ok(_) => {
                    self.monitor.start_monitoring(hash, None).await;
                    report.recovered += 1;
                }
                Err(e) => {
                    warn!(tx = %hash.short(), code = %e.code, "Held contribution still cannot be recorded");
                    report.errors += 1;
                }
            }
        }

        for contribution in pending.into_iter().filter(|c| c.created_at <= cutoff) {
            let hash = contribution.blockchain_tx_hash;
            if self.monitor.is_watching(&hash).await {
                report.skipped_watched += 1;
                continue;
            }
            report.examined += 1;

            let receipt = match self.chain.get_transaction_receipt(&hash).await {
                Ok(Some(receipt)) => receipt,
                Ok(None) => {
                    report.still_pending += 1;
                    continue;
                }
                Err(e) => {
                    let classified = e.classify();
                    warn!(tx = %hash.short(), code = %classified.code, "Receipt lookup failed during reconciliation");
                    report.errors += 1;
                    continue;
                }
            };

            let status = if receipt.status {
                ContributionStatus::Confirmed
            } else {
                ContributionStatus::Failed
            };
            match self
                .ledger
                .update_contribution_status(
                    &hash,
                    status,
                    Some(receipt.block_number),
                    Some(receipt.gas_used),
                )
                .await
            {
                Ok(_) if receipt.status => report.confirmed += 1,
                Ok(_) => report.failed += 1,
                Err(_) => report.errors += 1,
            }
        }

        info!(
            examined = report.examined,
            confirmed = report.confirmed,
            failed = report.failed,
            still_pending = report.still_pending,
            skipped_watched = report.skipped_watched,
            recovered = report.recovered,
            errors = report.errors,
            "🧾 Reconciliation pass complete"
        );
        Ok(report)
    }

    /// Admin-only: write the row for a donation the chain has but the ledger
    /// lost (for instance held in a process that has since restarted), then
    /// watch it like any new donation.
    pub async fn record_missing_contribution(
        &self,
        intent: ContributionIntent,
        actor: &Actor,
    ) -> ServiceResult<Contribution> {
        authorize(actor, Action::Reconcile, Subject::default())
            .map_err(|e| report("record_missing_contribution", e))?;
        if intent.amount.is_zero() {
            return Err(report(
                "record_missing_contribution",
                EscrowError::InvalidInput("contribution amount must be positive".to_string()),
            ));
        }

        let hash = intent.tx_hash.clone();
        let contribution = self.ledger.process_contribution(intent).await?;
        let monitored = if contribution.status == ContributionStatus::Pending {
            self.monitor.start_monitoring(hash.clone(), None).await
        } else {
            false
        };
        warn!(
            tx = %hash.short(),
            status = %contribution.status,
            monitored,
            actor = %actor.id,
            "✍️ Missing contribution recorded manually"
        );
        Ok(contribution)
    }

    /// Admin-only forced resolution of a stuck contribution. Any watch on the
    /// hash is stopped first so the monitor cannot race the write.
    pub async fn resolve_manually(
        &self,
        tx_hash: &TxHash,
        status: ContributionStatus,
        actor: &Actor,
    ) -> ServiceResult<Contribution> {
        authorize(actor, Action::Reconcile, Subject::default())
            .map_err(|e| report("resolve_manually", e))?;
        if self.ledger.contribution(tx_hash).await?.is_none() {
            return Err(report(
                "resolve_manually",
                EscrowError::ContributionNotFound(tx_hash.clone()),
            ));
        }

        self.monitor.stop_monitoring(tx_hash).await;
        let contribution = self
            .ledger
            .update_contribution_status(tx_hash, status, None, None)
            .await?;
        warn!(
            tx = %tx_hash.short(),
            status = %status,
            actor = %actor.id,
            "✍️ Contribution resolved manually"
        );
        Ok(contribution)
    }
}
