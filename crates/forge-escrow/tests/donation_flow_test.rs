mod common;

use async_trait::async_trait;
use common::{eth, fast_monitor, Harness};
use forge_chain::{ChainClient, ContractCall, OnChainProject, TransactionReceipt};
use forge_escrow::{
    ContributionIntent, ErrorCategory, EscrowServices, ServiceResponse, ServiceResult, Severity,
    TransactionMonitor, DEFAULT_CURRENCY,
};
use forge_types::{ContributionStatus, ProjectId, TxHash, UserId, Wei};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

async fn donate(h: &Harness, project: &ProjectId, donor: &str, amount: &str) -> TxHash {
    let done = h
        .services
        .donations
        .donate(project, &UserId::new(donor), amount, None, false)
        .await
        .unwrap();
    assert!(done.is_clean());
    done.value.tx_hash
}

#[tokio::test]
async fn test_half_eth_donation_confirmed_by_monitor() {
    let h = Harness::new().await;
    let project = h.project("solar-roof", 10).await;

    let done = h
        .services
        .donations
        .donate(&project, &UserId::new("bob"), "0.5", Some("good luck".into()), false)
        .await
        .unwrap();
    assert!(done.is_clean());
    assert!(done.value.monitored);
    let row = done.value.contribution.clone().unwrap();
    assert_eq!(row.status, ContributionStatus::Pending);
    assert_eq!(row.amount, eth("0.5"));
    assert_eq!(row.contribution_message.as_deref(), Some("good luck"));

    // Pending rows do not count
    assert_eq!(h.record(&project).await.current_funding, Wei::ZERO);

    let report = h.services.monitor.poll_once().await;
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.still_watching, 0);

    let row = h.contribution(&done.value.tx_hash).await;
    assert_eq!(row.status, ContributionStatus::Confirmed);
    assert!(row.block_number.is_some());
    assert!(row.confirmed_at.is_some());

    let record = h.record(&project).await;
    assert_eq!(record.current_funding, eth("0.5"));
    assert_eq!(record.total_backers, 1);
    assert_eq!(
        h.sim.project("solar-roof").await.unwrap().raised_amount,
        eth("0.5")
    );
}

#[tokio::test]
async fn test_backers_counted_once_across_donations() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;

    donate(&h, &project, "bob", "1").await;
    donate(&h, &project, "bob", "0.25").await;
    donate(&h, &project, "carol", "2").await;
    assert_eq!(h.services.monitor.poll_once().await.confirmed, 3);

    let summary = h
        .services
        .ledger
        .get_project_contributions(&project)
        .await
        .unwrap();
    assert_eq!(summary.contributions.len(), 3);
    assert_eq!(summary.total_amount, eth("3.25"));
    assert_eq!(summary.total_contributors, 2);

    let record = h.record(&project).await;
    assert_eq!(record.current_funding, eth("3.25"));
    assert_eq!(record.total_backers, 2);
}

#[tokio::test]
async fn test_repeated_confirmation_is_idempotent() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "1.5").await;
    h.services.monitor.poll_once().await;

    let first = h.contribution(&hash).await;
    let again = h
        .services
        .ledger
        .update_contribution_status(&hash, ContributionStatus::Confirmed, first.block_number, first.gas_used)
        .await
        .unwrap();
    assert_eq!(again.status, ContributionStatus::Confirmed);
    assert_eq!(again.confirmed_at, first.confirmed_at);
    assert_eq!(h.record(&project).await.current_funding, eth("1.5"));

    let err = h
        .services
        .ledger
        .update_contribution_status(&hash, ContributionStatus::Failed, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_transition");
    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Confirmed);
}

#[tokio::test]
async fn test_reverted_donation_receipt_marks_failed() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "1").await;
    h.sim.fail_receipt(&hash).await;

    let report = h.services.monitor.poll_once().await;
    assert_eq!(report.failed, 1);
    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Failed);
    assert_eq!(h.record(&project).await.current_funding, Wei::ZERO);
}

#[tokio::test]
async fn test_monitor_exhaustion_leaves_contribution_pending() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "1").await;
    h.sim.withhold_receipt(&hash).await;

    for _ in 0..4 {
        let report = h.services.monitor.poll_once().await;
        assert_eq!(report.timed_out, 0);
        assert_eq!(report.still_watching, 1);
    }
    let report = h.services.monitor.poll_once().await;
    assert_eq!(report.timed_out, 1);
    assert!(!h.services.monitor.is_watching(&hash).await);

    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Pending);
    assert_eq!(h.record(&project).await.current_funding, Wei::ZERO);
}

#[tokio::test]
async fn test_retryable_lookup_errors_consume_attempts() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "1").await;

    h.sim.fail_lookups(2).await;
    assert_eq!(h.services.monitor.poll_once().await.still_watching, 1);
    assert_eq!(h.services.monitor.poll_once().await.still_watching, 1);
    assert_eq!(h.services.monitor.poll_once().await.confirmed, 1);
    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Confirmed);
}

#[tokio::test]
async fn test_resume_uses_restart_budget() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "1").await;
    h.sim.withhold_receipt(&hash).await;

    // A fresh set of services over the same chain and storage
    let restarted = Harness::assemble(h.sim.clone(), h.chain.clone(), h.storage.clone(), fast_monitor());
    let resumed = restarted
        .services
        .monitor
        .start_monitoring_pending_transactions()
        .await
        .unwrap();
    assert_eq!(resumed, 1);

    // Already watched hashes are skipped
    assert_eq!(
        restarted
            .services
            .monitor
            .start_monitoring_pending_transactions()
            .await
            .unwrap(),
        0
    );

    restarted.services.monitor.poll_once().await;
    restarted.services.monitor.poll_once().await;
    assert_eq!(restarted.services.monitor.poll_once().await.timed_out, 1);
    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Pending);
}

#[tokio::test]
async fn test_ledger_failure_after_donation_is_a_bookkeeping_warning() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    h.storage.fail_contribution_writes(true);

    let done = h
        .services
        .donations
        .donate(&project, &UserId::new("bob"), "0.5", None, false)
        .await
        .unwrap();
    assert!(!done.is_clean());
    assert!(done.value.contribution.is_none());
    assert!(!done.value.monitored);

    let warning = done.bookkeeping.clone().unwrap();
    assert_eq!(warning.tx_hash, done.value.tx_hash);
    assert_eq!(warning.error.code, "database_error");
    assert_eq!(warning.error.category, ErrorCategory::Database);

    // The chain keeps the donation
    assert_eq!(h.sim.project("p1").await.unwrap().raised_amount, eth("0.5"));
    assert_eq!(h.services.monitor.active_watches().await, 0);

    let response = ServiceResponse::from_completed(Ok(done));
    assert!(response.success);
    assert!(response.warning.is_some());
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_failed_prechecks_reach_caller_classified() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;

    h.sim.set_project_active("p1", false).await;
    let err = h
        .services
        .donations
        .donate(&project, &UserId::new("bob"), "1", None, false)
        .await
        .unwrap_err();
    assert_eq!(err.code, "project_inactive");
    assert!(!err.retryable);

    let err = h
        .services
        .donations
        .donate(&project, &UserId::new("bob"), "abc", None, false)
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_amount");

    let err = h
        .services
        .donations
        .donate(&project, &UserId::new("bob"), "0", None, false)
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_input");

    // Only the createProject transaction reached the chain
    assert_eq!(h.sim.events().await.len(), 1);
    assert!(h
        .services
        .ledger
        .pending_contributions()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_wallet_rejection_is_low_severity_and_retryable() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    h.sim.reject_next_transaction().await;

    let err = h
        .services
        .donations
        .donate(&project, &UserId::new("bob"), "1", None, false)
        .await
        .unwrap_err();
    assert_eq!(err.code, "user_rejected");
    assert_eq!(err.severity, Severity::Low);
    assert!(err.retryable);

    let result: ServiceResult<()> = Err(err);
    let response = ServiceResponse::from(result);
    assert!(!response.success);
    assert!(response.data.is_none());
}

#[tokio::test]
async fn test_reconcile_picks_up_abandoned_contribution() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "2").await;
    h.sim.withhold_receipt(&hash).await;
    for _ in 0..5 {
        h.services.monitor.poll_once().await;
    }
    assert!(!h.services.monitor.is_watching(&hash).await);

    let report = h
        .services
        .reconciler
        .reconcile_pending(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.still_pending, 1);

    h.sim.release_receipt(&hash).await;
    let report = h
        .services
        .reconciler
        .reconcile_pending(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(h.record(&project).await.current_funding, eth("2"));

    // Too young to be touched
    let fresh = donate(&h, &project, "carol", "1").await;
    h.services.monitor.stop_monitoring(&fresh).await;
    let report = h
        .services
        .reconciler
        .reconcile_pending(chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_reconcile_skips_watched_contributions() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "1").await;

    let report = h
        .services
        .reconciler
        .reconcile_pending(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(report.skipped_watched, 1);
    assert_eq!(report.examined, 0);
    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Pending);
}

#[tokio::test]
async fn test_manual_resolution_is_admin_only() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "1").await;

    let err = h
        .services
        .reconciler
        .resolve_manually(&hash, ContributionStatus::Failed, &h.owner)
        .await
        .unwrap_err();
    assert_eq!(err.code, "unauthorized");
    assert!(h.services.monitor.is_watching(&hash).await);

    let row = h
        .services
        .reconciler
        .resolve_manually(&hash, ContributionStatus::Failed, &h.admin)
        .await
        .unwrap();
    assert_eq!(row.status, ContributionStatus::Failed);
    assert!(!h.services.monitor.is_watching(&hash).await);

    let missing = TxHash::from_bytes([7; 32]);
    let err = h
        .services
        .reconciler
        .resolve_manually(&missing, ContributionStatus::Confirmed, &h.admin)
        .await
        .unwrap_err();
    assert_eq!(err.code, "contribution_not_found");
}

#[tokio::test]
async fn test_receipt_survives_failed_ledger_write() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "0.5").await;

    h.storage.fail_contribution_writes(true);
    let report = h.services.monitor.poll_once().await;
    assert_eq!(report.polled, 1);
    assert_eq!(report.confirmed, 0);
    assert_eq!(report.still_watching, 1);
    assert!(h.services.monitor.is_watching(&hash).await);
    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Pending);

    h.storage.fail_contribution_writes(false);
    let report = h.services.monitor.poll_once().await;
    assert_eq!(report.confirmed, 1);
    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Confirmed);
    assert_eq!(h.record(&project).await.current_funding, eth("0.5"));
}

#[tokio::test]
async fn test_persistent_ledger_failure_times_out_watch() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let hash = donate(&h, &project, "bob", "1").await;

    h.storage.fail_contribution_writes(true);
    let mut timed_out = 0;
    for _ in 0..5 {
        timed_out += h.services.monitor.poll_once().await.timed_out;
    }
    assert_eq!(timed_out, 1);
    assert!(!h.services.monitor.is_watching(&hash).await);

    // Reconciliation applies the receipt once storage is back
    h.storage.fail_contribution_writes(false);
    let report = h
        .services
        .reconciler
        .reconcile_pending(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Confirmed);
}

#[tokio::test]
async fn test_reconcile_records_donation_the_ledger_missed() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;

    h.storage.fail_contribution_writes(true);
    let done = h
        .services
        .donations
        .donate(&project, &UserId::new("bob"), "0.5", None, false)
        .await
        .unwrap();
    assert!(!done.is_clean());
    let hash = done.value.tx_hash.clone();
    assert_eq!(h.services.ledger.unrecorded().await.len(), 1);

    // Still down: held, counted as an error
    let report = h
        .services
        .reconciler
        .reconcile_pending(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(report.recovered, 0);
    assert_eq!(report.errors, 1);

    h.storage.fail_contribution_writes(false);
    let report = h
        .services
        .reconciler
        .reconcile_pending(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(report.recovered, 1);
    assert!(h.services.ledger.unrecorded().await.is_empty());
    assert!(h.services.monitor.is_watching(&hash).await);

    let row = h.contribution(&hash).await;
    assert_eq!(row.status, ContributionStatus::Pending);
    assert_eq!(row.amount, eth("0.5"));
    assert_eq!(row.contributor_id, UserId::new("bob"));

    assert_eq!(h.services.monitor.poll_once().await.confirmed, 1);
    assert_eq!(h.record(&project).await.current_funding, eth("0.5"));
}

#[tokio::test]
async fn test_admin_records_missing_contribution_after_restart() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;

    h.storage.fail_contribution_writes(true);
    let done = h
        .services
        .donations
        .donate(&project, &UserId::new("bob"), "2", None, false)
        .await
        .unwrap();
    let hash = done.value.tx_hash.clone();
    h.storage.fail_contribution_writes(false);

    // A restarted process has lost the held intent
    let restarted = Harness::assemble(h.sim.clone(), h.chain.clone(), h.storage.clone(), fast_monitor());
    assert!(restarted.services.ledger.unrecorded().await.is_empty());
    let report = restarted
        .services
        .reconciler
        .reconcile_pending(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(report.recovered, 0);

    let intent = ContributionIntent {
        project_id: project.clone(),
        contributor_id: UserId::new("bob"),
        amount: eth("2"),
        currency: DEFAULT_CURRENCY.to_string(),
        tx_hash: hash.clone(),
        message: None,
        anonymous: false,
    };
    let err = restarted
        .services
        .reconciler
        .record_missing_contribution(intent.clone(), &restarted.owner)
        .await
        .unwrap_err();
    assert_eq!(err.code, "unauthorized");

    let row = restarted
        .services
        .reconciler
        .record_missing_contribution(intent.clone(), &restarted.admin)
        .await
        .unwrap();
    assert_eq!(row.status, ContributionStatus::Pending);
    assert!(restarted.services.monitor.is_watching(&hash).await);

    // Recording twice returns the same row
    let again = restarted
        .services
        .reconciler
        .record_missing_contribution(intent, &restarted.admin)
        .await
        .unwrap();
    assert_eq!(again.id, row.id);

    assert_eq!(restarted.services.monitor.poll_once().await.confirmed, 1);
    assert_eq!(restarted.record(&project).await.current_funding, eth("2"));
}

/// Chain client whose receipt lookups block until released
struct GatedChain {
    inner: Arc<dyn ChainClient>,
    armed: AtomicBool,
    entered: Notify,
    gate: Notify,
}

#[async_trait]
impl ChainClient for GatedChain {
    async fn create_project(
        &self,
        project_id: &ProjectId,
        target: Wei,
        deadline: u64,
    ) -> forge_chain::Result<TxHash> {
        self.inner.create_project(project_id, target, deadline).await
    }

    async fn donate(
        &self,
        project_id: &ProjectId,
        amount: Wei,
        message: &str,
    ) -> forge_chain::Result<TxHash> {
        self.inner.donate(project_id, amount, message).await
    }

    async fn withdraw_funds(&self, project_id: &ProjectId) -> forge_chain::Result<TxHash> {
        self.inner.withdraw_funds(project_id).await
    }

    async fn get_project(
        &self,
        project_id: &ProjectId,
    ) -> forge_chain::Result<Option<OnChainProject>> {
        self.inner.get_project(project_id).await
    }

    async fn get_transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> forge_chain::Result<Option<TransactionReceipt>> {
        if self.armed.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        self.inner.get_transaction_receipt(hash).await
    }

    async fn estimate_gas(&self, call: &ContractCall) -> forge_chain::Result<u64> {
        self.inner.estimate_gas(call).await
    }
}

#[tokio::test]
async fn test_stop_during_in_flight_lookup_prevents_write() {
    let h = Harness::new().await;
    let gated = Arc::new(GatedChain {
        inner: h.chain.clone(),
        armed: AtomicBool::new(false),
        entered: Notify::new(),
        gate: Notify::new(),
    });
    let services = EscrowServices::new(h.storage.clone(), gated.clone(), fast_monitor());
    let project = h.project("p1", 10).await;

    let done = services
        .donations
        .donate(&project, &UserId::new("bob"), "1", None, false)
        .await
        .unwrap();
    let hash = done.value.tx_hash;

    gated.armed.store(true, Ordering::SeqCst);
    let monitor: Arc<TransactionMonitor> = services.monitor.clone();
    let poll = tokio::spawn(async move { monitor.poll_once().await });

    gated.entered.notified().await;
    assert!(services.monitor.stop_monitoring(&hash).await);
    gated.gate.notify_one();

    let report = poll.await.unwrap();
    assert_eq!(report.confirmed, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.contribution(&hash).await.status, ContributionStatus::Pending);
    assert_eq!(h.record(&project).await.current_funding, Wei::ZERO);
}

#[tokio::test]
async fn test_scheduler_loop_resolves_and_shuts_down() {
    let h = Harness::new().await;
    let project = h.project("p1", 10).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.services.monitor.spawn(shutdown_rx);

    let hash = donate(&h, &project, "bob", "0.5").await;

    let confirmed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if h.contribution(&hash).await.status == ContributionStatus::Confirmed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(confirmed.is_ok());

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
