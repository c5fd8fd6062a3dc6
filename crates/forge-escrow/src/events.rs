//! Escrow event bus.
//!
//! Services publish state changes here; the node turns them into metrics and
//! any other subscriber (notifications, audit) can listen without polling.

use chrono::{DateTime, Utc};
use forge_types::{
    ContributionStatus, MilestoneId, MilestoneStatus, ProjectId, ReleaseId, ReleaseType, TxHash,
    Wei,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EscrowEvent {
    ContributionRecorded {
        project_id: ProjectId,
        tx_hash: TxHash,
        amount: Wei,
        timestamp: DateTime<Utc>,
    },
    ContributionResolved {
        tx_hash: TxHash,
        status: ContributionStatus,
        timestamp: DateTime<Utc>,
    },
    MonitoringStarted {
        tx_hash: TxHash,
        max_attempts: u32,
    },
    MonitoringTimedOut {
        tx_hash: TxHash,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    MonitoringStopped {
        tx_hash: TxHash,
    },
    MilestoneUpdated {
        milestone_id: MilestoneId,
        status: MilestoneStatus,
        timestamp: DateTime<Utc>,
    },
    ReleaseRequested {
        release_id: ReleaseId,
        release_type: ReleaseType,
        amount: Wei,
        timestamp: DateTime<Utc>,
    },
    ReleaseApproved {
        release_id: ReleaseId,
        timestamp: DateTime<Utc>,
    },
    ReleaseExecuted {
        release_id: ReleaseId,
        tx_hash: TxHash,
        amount: Wei,
        timestamp: DateTime<Utc>,
    },
    ReleaseFailed {
        release_id: ReleaseId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    BookkeepingLagged {
        tx_hash: TxHash,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl EscrowEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EscrowEvent::ContributionRecorded { .. } => "contribution_recorded",
            EscrowEvent::ContributionResolved { .. } => "contribution_resolved",
            EscrowEvent::MonitoringStarted { .. } => "monitoring_started",
            EscrowEvent::MonitoringTimedOut { .. } => "monitoring_timed_out",
            EscrowEvent::MonitoringStopped { .. } => "monitoring_stopped",
            EscrowEvent::MilestoneUpdated { .. } => "milestone_updated",
            EscrowEvent::ReleaseRequested { .. } => "release_requested",
            EscrowEvent::ReleaseApproved { .. } => "release_approved",
            EscrowEvent::ReleaseExecuted { .. } => "release_executed",
            EscrowEvent::ReleaseFailed { .. } => "release_failed",
            EscrowEvent::BookkeepingLagged { .. } => "bookkeeping_lagged",
        }
    }
}

pub struct EventBus {
    sender: broadcast::Sender<EscrowEvent>,
    emitted: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. With no subscribers the event is dropped.
    pub fn emit(&self, event: EscrowEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(subscribers) => debug!(event_type, subscribers, "Event emitted"),
            Err(_) => debug!(event_type, "Event emitted with no subscribers"),
        }
    }

    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let hash = TxHash::from_bytes([1u8; 32]);

        bus.emit(EscrowEvent::MonitoringStopped {
            tx_hash: hash.clone(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            EscrowEvent::MonitoringStopped { tx_hash: hash }
        );
        assert_eq!(bus.emitted_count(), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(EscrowEvent::ReleaseApproved {
            release_id: ReleaseId::new(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.emitted_count(), 1);
    }
}
