//! Transaction monitor.
//!
//! A single scheduler loop owns every watch and polls receipts in batches on
//! each tick. A watch ends exactly once: confirmed, failed, timed out or
//! cancelled. Before a receipt is written to the ledger the watch is claimed
//! (removed under the lock, generation checked), so a `stop_monitoring` that
//! lands while a lookup is in flight wins and nothing is written. If the
//! ledger write fails with a retryable error the claimed watch goes back in,
//! charged one attempt, and the receipt is applied on a later round.

use crate::classifier::Classify;
use crate::config::MonitorConfig;
use crate::events::{EscrowEvent, EventBus};
use crate::ledger::ContributionLedger;
use crate::outcome::ServiceResult;
use chrono::Utc;
use forge_chain::{ChainClient, TransactionReceipt};
use forge_types::{ContributionStatus, TxHash};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Watching,
    Confirmed,
    Failed,
    TimedOut,
    Cancelled,
    /// Lookup failed in a way retrying cannot fix
    Abandoned,
}

struct Watch {
    generation: u64,
    attempts: u32,
    max_attempts: u32,
}

/// Outcome counts of one polling round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub polled: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub abandoned: usize,
    pub skipped: usize,
    pub still_watching: usize,
}

pub struct TransactionMonitor {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<ContributionLedger>,
    events: Arc<EventBus>,
    config: MonitorConfig,
    watches: Mutex<HashMap<TxHash, Watch>>,
    next_generation: AtomicU64,
}

impl TransactionMonitor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<ContributionLedger>,
        events: Arc<EventBus>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            chain,
            ledger,
            events,
            config,
            watches: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Begin watching `tx_hash`. Returns `false` if it is already watched.
    ///
    /// `max_attempts` defaults to the configured budget (60).
    pub async fn start_monitoring(&self, tx_hash: TxHash, max_attempts: Option<u32>) -> bool {
        let max_attempts = max_attempts.unwrap_or(self.config.max_attempts).max(1);
        {
            let mut watches = self.watches.lock().await;
            if watches.contains_key(&tx_hash) {
                return false;
            }
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            watches.insert(
                tx_hash.clone(),
                Watch {
                    generation,
                    attempts: 0,
                    max_attempts,
                },
            );
        }

        debug!(tx = %tx_hash.short(), max_attempts, "Watching transaction");
        self.events.emit(EscrowEvent::MonitoringStarted {
            tx_hash,
            max_attempts,
        });
        true
    }

    /// Cancel a watch. A lookup already in flight for it will not write.
    pub async fn stop_monitoring(&self, tx_hash: &TxHash) -> bool {
        let removed = self.watches.lock().await.remove(tx_hash).is_some();
        if removed {
            debug!(tx = %tx_hash.short(), "Stopped watching transaction");
            self.events.emit(EscrowEvent::MonitoringStopped {
                tx_hash: tx_hash.clone(),
            });
        }
        removed
    }

    /// Resume watches for every pending contribution, with the shorter
    /// restart budget. Safe to call at any time; watched hashes are skipped.
    pub async fn start_monitoring_pending_transactions(&self) -> ServiceResult<usize> {
        let pending = self.ledger.pending_contributions().await?;
        let mut resumed = 0;
        for contribution in pending {
            if self
                .start_monitoring(
                    contribution.blockchain_tx_hash,
                    Some(self.config.resume_max_attempts),
                )
                .await
            {
                resumed += 1;
            }
        }
        if resumed > 0 {
            info!(
                resumed,
                max_attempts = self.config.resume_max_attempts,
                "🔄 Resumed monitoring of pending contributions"
            );
        }
        Ok(resumed)
    }

    pub async fn is_watching(&self, tx_hash: &TxHash) -> bool {
        self.watches.lock().await.contains_key(tx_hash)
    }

    pub async fn active_watches(&self) -> usize {
        self.watches.lock().await.len()
    }

    /// Poll every open watch once, `batch_size` lookups at a time
    pub async fn poll_once(&self) -> PollReport {
        let due: Vec<(TxHash, u64)> = self
            .watches
            .lock()
            .await
            .iter()
            .map(|(hash, watch)| (hash.clone(), watch.generation))
            .collect();

        let mut report = PollReport::default();
        for batch in due.chunks(self.config.batch_size.max(1)) {
            let lookups = batch.iter().map(|(hash, generation)| async move {
                let result = self.chain.get_transaction_receipt(hash).await;
                (hash, *generation, result)
            });

            for (hash, generation, result) in join_all(lookups).await {
                report.polled += 1;
                let state = match result {
                    Ok(Some(receipt)) => self.resolve(hash, generation, receipt).await,
                    Ok(None) => self.record_miss(hash, generation).await,
                    Err(e) => {
                        let classified = e.classify();
                        if classified.retryable {
                            debug!(tx = %hash.short(), code = %classified.code, "Receipt lookup failed, will retry");
                            self.record_miss(hash, generation).await
                        } else if self.claim(hash, generation).await.is_some() {
                            error!(
                                tx = %hash.short(),
                                code = %classified.code,
                                error = %classified.detail,
                                "❌ Receipt lookup failed permanently; contribution left pending"
                            );
                            WatchState::Abandoned
                        } else {
                            WatchState::Cancelled
                        }
                    }
                };

                match state {
                    WatchState::Confirmed => report.confirmed += 1,
                    WatchState::Failed => report.failed += 1,
                    WatchState::TimedOut => report.timed_out += 1,
                    WatchState::Abandoned => report.abandoned += 1,
                    WatchState::Cancelled => report.skipped += 1,
                    WatchState::Watching => {}
                }
            }
        }

        report.still_watching = self.active_watches().await;
        report
    }

    /// Remove the watch if it is still the one this poll started from
    async fn claim(&self, tx_hash: &TxHash, generation: u64) -> Option<Watch> {
        let mut watches = self.watches.lock().await;
        match watches.get(tx_hash) {
            Some(watch) if watch.generation == generation => watches.remove(tx_hash),
            _ => None,
        }
    }

    /// Put a claimed watch back after a write that can be retried. A watch
    /// started for the same hash in the meantime takes precedence.
    async fn requeue(&self, tx_hash: &TxHash, mut watch: Watch) -> WatchState {
        watch.attempts += 1;
        let attempts = watch.attempts;
        {
            let mut watches = self.watches.lock().await;
            if watches.contains_key(tx_hash) {
                return WatchState::Watching;
            }
            if attempts < watch.max_attempts {
                watches.insert(tx_hash.clone(), watch);
                return WatchState::Watching;
            }
        }
        self.timed_out(tx_hash, attempts)
    }

    async fn resolve(
        &self,
        tx_hash: &TxHash,
        generation: u64,
        receipt: TransactionReceipt,
    ) -> WatchState {
        let Some(watch) = self.claim(tx_hash, generation).await else {
            debug!(tx = %tx_hash.short(), "Receipt arrived for a cancelled watch, ignoring");
            return WatchState::Cancelled;
        };

        let status = if receipt.status {
            ContributionStatus::Confirmed
        } else {
            ContributionStatus::Failed
        };
        match self
            .ledger
            .update_contribution_status(
                tx_hash,
                status,
                Some(receipt.block_number),
                Some(receipt.gas_used),
            )
            .await
        {
            Ok(_) if receipt.status => WatchState::Confirmed,
            Ok(_) => WatchState::Failed,
            Err(e) if e.retryable => {
                warn!(
                    tx = %tx_hash.short(),
                    status = %status,
                    code = %e.code,
                    "Receipt observed but ledger update failed, will retry"
                );
                self.requeue(tx_hash, watch).await
            }
            Err(e) => {
                error!(
                    tx = %tx_hash.short(),
                    status = %status,
                    code = %e.code,
                    "❌ Receipt observed but ledger refused it; contribution left pending"
                );
                WatchState::Abandoned
            }
        }
    }

    async fn record_miss(&self, tx_hash: &TxHash, generation: u64) -> WatchState {
        let mut watches = self.watches.lock().await;
        let Some(watch) = watches.get_mut(tx_hash) else {
            return WatchState::Cancelled;
        };
        if watch.generation != generation {
            return WatchState::Watching;
        }

        watch.attempts += 1;
        if watch.attempts < watch.max_attempts {
            return WatchState::Watching;
        }

        let attempts = watch.attempts;
        watches.remove(tx_hash);
        drop(watches);
        self.timed_out(tx_hash, attempts)
    }

    fn timed_out(&self, tx_hash: &TxHash, attempts: u32) -> WatchState {
        warn!(
            tx = %tx_hash.short(),
            attempts,
            "⏱️ Monitoring gave up without a receipt; contribution left pending"
        );
        self.events.emit(EscrowEvent::MonitoringTimedOut {
            tx_hash: tx_hash.clone(),
            attempts,
            timestamp: Utc::now(),
        });
        WatchState::TimedOut
    }

    /// Poll on the configured interval until `shutdown` flips to `true`
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            batch_size = self.config.batch_size,
            "👀 Transaction monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.active_watches().await == 0 {
                        continue;
                    }
                    let report = self.poll_once().await;
                    debug!(
                        polled = report.polled,
                        confirmed = report.confirmed,
                        failed = report.failed,
                        timed_out = report.timed_out,
                        still_watching = report.still_watching,
                        "Monitor round complete"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let open_watches = self.active_watches().await;
        info!(open_watches, "Transaction monitor stopped");
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}
