use crate::config::MonitorConfig;
use crate::coordinator::EscrowCoordinator;
use crate::donation::DonationService;
use crate::events::EventBus;
use crate::ledger::ContributionLedger;
use crate::monitor::TransactionMonitor;
use crate::reconciliation::Reconciler;
use forge_chain::ChainClient;
use forge_storage::ForgeStorage;
use std::sync::Arc;

/// Every escrow service wired to one storage backend, one chain client and
/// one event bus.
pub struct EscrowServices {
    pub events: Arc<EventBus>,
    pub ledger: Arc<ContributionLedger>,
    pub monitor: Arc<TransactionMonitor>,
    pub coordinator: Arc<EscrowCoordinator>,
    pub donations: Arc<DonationService>,
    pub reconciler: Arc<Reconciler>,
}

impl EscrowServices {
    pub fn new(
        storage: Arc<dyn ForgeStorage>,
        chain: Arc<dyn ChainClient>,
        config: MonitorConfig,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let ledger = Arc::new(ContributionLedger::new(storage.clone(), events.clone()));
        let monitor = Arc::new(TransactionMonitor::new(
            chain.clone(),
            ledger.clone(),
            events.clone(),
            config,
        ));
        let coordinator = Arc::new(EscrowCoordinator::new(
            storage,
            chain.clone(),
            events.clone(),
        ));
        let donations = Arc::new(DonationService::new(
            chain.clone(),
            ledger.clone(),
            monitor.clone(),
            events.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(chain, ledger.clone(), monitor.clone()));

        Self {
            events,
            ledger,
            monitor,
            coordinator,
            donations,
            reconciler,
        }
    }
}
