//! Donation flow: chain first, then the ledger, then the monitor.

use crate::classifier::report;
use crate::error::EscrowError;
use crate::events::{EscrowEvent, EventBus};
use crate::ledger::{ContributionIntent, ContributionLedger};
use crate::monitor::TransactionMonitor;
use crate::outcome::{Completed, ServiceResult};
use chrono::Utc;
use forge_chain::ChainClient;
use forge_types::{Contribution, ProjectId, TxHash, UserId, Wei};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

pub const DEFAULT_CURRENCY: &str = "ETH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationOutcome {
    pub tx_hash: TxHash,
    pub amount: Wei,
    /// `None` when the chain accepted the donation but the row was not written
    pub contribution: Option<Contribution>,
    pub monitored: bool,
}

pub struct DonationService {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<ContributionLedger>,
    monitor: Arc<TransactionMonitor>,
    events: Arc<EventBus>,
}

impl DonationService {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<ContributionLedger>,
        monitor: Arc<TransactionMonitor>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            chain,
            ledger,
            monitor,
            events,
        }
    }

    /// Donate `amount_eth` (decimal ETH) to a project.
    ///
    /// The returned contribution is `pending`; the monitor resolves it once
    /// the receipt shows up.
    pub async fn donate(
        &self,
        project_id: &ProjectId,
        contributor: &UserId,
        amount_eth: &str,
        message: Option<String>,
        anonymous: bool,
    ) -> ServiceResult<Completed<DonationOutcome>> {
        let start = Instant::now();
        let amount = Wei::parse_eth(amount_eth).map_err(|e| report("donate", e))?;
        if amount.is_zero() {
            return Err(report(
                "donate",
                EscrowError::InvalidInput("donation amount must be positive".to_string()),
            ));
        }

        let tx_hash = self
            .chain
            .donate(project_id, amount, message.as_deref().unwrap_or_default())
            .await
            .map_err(|e| report("donate", e))?;

        let intent = ContributionIntent {
            project_id: project_id.clone(),
            contributor_id: contributor.clone(),
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            tx_hash: tx_hash.clone(),
            message,
            anonymous,
        };

        match self.ledger.process_contribution(intent.clone()).await {
            Ok(contribution) => {
                let monitored = self.monitor.start_monitoring(tx_hash.clone(), None).await;
                info!(
                    project = %project_id,
                    amount = %amount,
                    tx = %tx_hash.short(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "💸 Donation submitted"
                );
                Ok(Completed::clean(DonationOutcome {
                    tx_hash,
                    amount,
                    contribution: Some(contribution),
                    monitored,
                }))
            }
            Err(classified) => {
                error!(
                    project = %project_id,
                    amount = %amount,
                    tx = %tx_hash,
                    code = %classified.code,
                    error = %classified.detail,
                    "❌ Donation accepted on chain but not recorded; held for reconciliation"
                );
                self.ledger.hold_unrecorded(intent).await;
                self.events.emit(EscrowEvent::BookkeepingLagged {
                    tx_hash: tx_hash.clone(),
                    reason: classified.detail.clone(),
                    timestamp: Utc::now(),
                });
                Ok(Completed::lagging(
                    DonationOutcome {
                        tx_hash: tx_hash.clone(),
                        amount,
                        contribution: None,
                        monitored: false,
                    },
                    tx_hash,
                    classified,
                ))
            }
        }
    }
}
