use forge_escrow::EscrowEvent;
use forge_types::ReleaseType;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Escrow counters, fed from the event bus
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Contributions
    pub contributions_recorded: IntCounter,
    pub contributions_confirmed: IntCounter,
    pub contributions_failed: IntCounter,
    pub monitoring_timeouts: IntCounter,
    pub active_watches: IntGauge,

    // Milestones and releases
    pub milestone_transitions: IntCounterVec,
    pub releases_requested: IntCounterVec,
    pub releases_executed: IntCounter,
    pub releases_failed: IntCounter,

    /// Chain succeeded but the database did not follow
    pub bookkeeping_lag: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let contributions_recorded = IntCounter::new(
            "forge_contributions_recorded_total",
            "Contributions recorded as pending",
        )?;
        let contributions_confirmed = IntCounter::new(
            "forge_contributions_confirmed_total",
            "Contributions confirmed on chain",
        )?;
        let contributions_failed = IntCounter::new(
            "forge_contributions_failed_total",
            "Contributions whose transaction reverted",
        )?;
        let monitoring_timeouts = IntCounter::new(
            "forge_monitoring_timeouts_total",
            "Watches that ran out of attempts",
        )?;
        let active_watches =
            IntGauge::new("forge_active_watches", "Transactions currently being watched")?;

        let milestone_transitions = IntCounterVec::new(
            Opts::new(
                "forge_milestone_transitions_total",
                "Milestone status changes by target status",
            ),
            &["status"],
        )?;
        let releases_requested = IntCounterVec::new(
            Opts::new("forge_releases_requested_total", "Escrow releases requested"),
            &["release_type"],
        )?;
        let releases_executed =
            IntCounter::new("forge_releases_executed_total", "Escrow releases executed")?;
        let releases_failed =
            IntCounter::new("forge_releases_failed_total", "Escrow releases failed")?;
        let bookkeeping_lag = IntCounter::new(
            "forge_bookkeeping_lag_total",
            "Chain operations whose database update failed",
        )?;

        registry.register(Box::new(contributions_recorded.clone()))?;
        registry.register(Box::new(contributions_confirmed.clone()))?;
        registry.register(Box::new(contributions_failed.clone()))?;
        registry.register(Box::new(monitoring_timeouts.clone()))?;
        registry.register(Box::new(active_watches.clone()))?;
        registry.register(Box::new(milestone_transitions.clone()))?;
        registry.register(Box::new(releases_requested.clone()))?;
        registry.register(Box::new(releases_executed.clone()))?;
        registry.register(Box::new(releases_failed.clone()))?;
        registry.register(Box::new(bookkeeping_lag.clone()))?;

        Ok(Self {
            registry,
            contributions_recorded,
            contributions_confirmed,
            contributions_failed,
            monitoring_timeouts,
            active_watches,
            milestone_transitions,
            releases_requested,
            releases_executed,
            releases_failed,
            bookkeeping_lag,
        })
    }

    pub fn observe(&self, event: &EscrowEvent) {
        match event {
            EscrowEvent::ContributionRecorded { .. } => self.contributions_recorded.inc(),
            EscrowEvent::ContributionResolved { status, .. } => {
                if *status == forge_types::ContributionStatus::Confirmed {
                    self.contributions_confirmed.inc();
                } else {
                    self.contributions_failed.inc();
                }
            }
            EscrowEvent::MonitoringTimedOut { .. } => self.monitoring_timeouts.inc(),
            EscrowEvent::MilestoneUpdated { status, .. } => self
                .milestone_transitions
                .with_label_values(&[status.as_str()])
                .inc(),
            EscrowEvent::ReleaseRequested { release_type, .. } => self
                .releases_requested
                .with_label_values(&[release_type_label(*release_type)])
                .inc(),
            EscrowEvent::ReleaseExecuted { .. } => self.releases_executed.inc(),
            EscrowEvent::ReleaseFailed { .. } => self.releases_failed.inc(),
            EscrowEvent::BookkeepingLagged { .. } => self.bookkeeping_lag.inc(),
            EscrowEvent::MonitoringStarted { .. }
            | EscrowEvent::MonitoringStopped { .. }
            | EscrowEvent::ReleaseApproved { .. } => {}
        }
    }

    /// Prometheus text exposition
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| format!("# failed to encode metrics: {}\n", e))
    }
}

fn release_type_label(release_type: ReleaseType) -> &'static str {
    match release_type {
        ReleaseType::Milestone => "milestone",
        ReleaseType::Emergency => "emergency",
        ReleaseType::Final => "final",
    }
}
