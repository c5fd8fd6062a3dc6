#![allow(dead_code)]

use async_trait::async_trait;
use forge_chain::{ChainClient, FundingContract, SimulatedChain, DEFAULT_CHAIN_ID};
use forge_escrow::{Actor, EscrowServices, MonitorConfig};
use forge_storage::{ForgeStorage, MemoryStorage, Result, StorageError, StorageStats};
use forge_types::{
    Address, Contribution, ContributionStatus, EscrowRelease, Milestone, MilestoneId,
    MilestoneStatus, ProjectId, ProjectKey, ProjectRecord, ReleaseId, ReleaseStatus, TxHash,
    UserId, Wei,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const NOW: u64 = 1_700_000_000;
pub const DAY: u64 = 86_400;

pub fn fast_monitor() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(10),
        max_attempts: 5,
        resume_max_attempts: 3,
        batch_size: 4,
    }
}

pub fn eth(s: &str) -> Wei {
    Wei::parse_eth(s).unwrap()
}

/// Memory storage that can be told to fail selected writes
#[derive(Default)]
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    fail_contribution_writes: AtomicBool,
    fail_release_updates: AtomicBool,
    allowed_release_updates: AtomicUsize,
}

impl FlakyStorage {
    pub fn fail_contribution_writes(&self, fail: bool) {
        self.fail_contribution_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_release_updates(&self, fail: bool) {
        self.allowed_release_updates.store(0, Ordering::SeqCst);
        self.fail_release_updates.store(fail, Ordering::SeqCst);
    }

    /// Let the next `allowed` release updates through, then fail the rest
    pub fn fail_release_updates_after(&self, allowed: usize) {
        self.allowed_release_updates.store(allowed, Ordering::SeqCst);
        self.fail_release_updates.store(true, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::BackendError("connection pool exhausted".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ForgeStorage for FlakyStorage {
    async fn put_project(&self, project: &ProjectRecord) -> Result<()> {
        self.inner.put_project(project).await
    }

    async fn get_project(&self, id: &ProjectKey) -> Result<Option<ProjectRecord>> {
        self.inner.get_project(id).await
    }

    async fn find_project(&self, chain_id: &ProjectId) -> Result<Option<ProjectRecord>> {
        self.inner.find_project(chain_id).await
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        self.inner.list_projects().await
    }

    async fn update_project_totals(
        &self,
        id: &ProjectKey,
        current_funding: Wei,
        total_backers: u64,
    ) -> Result<()> {
        self.inner
            .update_project_totals(id, current_funding, total_backers)
            .await
    }

    async fn insert_milestones(&self, milestones: &[Milestone]) -> Result<()> {
        self.inner.insert_milestones(milestones).await
    }

    async fn get_milestone(&self, id: &MilestoneId) -> Result<Option<Milestone>> {
        self.inner.get_milestone(id).await
    }

    async fn update_milestone(
        &self,
        milestone: &Milestone,
        expected: MilestoneStatus,
    ) -> Result<()> {
        self.inner.update_milestone(milestone, expected).await
    }

    async fn list_milestones(&self, project: &ProjectKey) -> Result<Vec<Milestone>> {
        self.inner.list_milestones(project).await
    }

    async fn insert_release(&self, release: &EscrowRelease) -> Result<()> {
        self.inner.insert_release(release).await
    }

    async fn get_release(&self, id: &ReleaseId) -> Result<Option<EscrowRelease>> {
        self.inner.get_release(id).await
    }

    async fn update_release(&self, release: &EscrowRelease, expected: ReleaseStatus) -> Result<()> {
        let allowed = self
            .allowed_release_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            Self::check(&self.fail_release_updates)?;
        }
        self.inner.update_release(release, expected).await
    }

    async fn list_releases(&self, project: &ProjectKey) -> Result<Vec<EscrowRelease>> {
        self.inner.list_releases(project).await
    }

    async fn insert_contribution(&self, contribution: &Contribution) -> Result<()> {
        Self::check(&self.fail_contribution_writes)?;
        self.inner.insert_contribution(contribution).await
    }

    async fn get_contribution(&self, tx_hash: &TxHash) -> Result<Option<Contribution>> {
        self.inner.get_contribution(tx_hash).await
    }

    async fn update_contribution(
        &self,
        contribution: &Contribution,
        expected: ContributionStatus,
    ) -> Result<()> {
        Self::check(&self.fail_contribution_writes)?;
        self.inner.update_contribution(contribution, expected).await
    }

    async fn list_contributions(&self, project: &ProjectKey) -> Result<Vec<Contribution>> {
        self.inner.list_contributions(project).await
    }

    async fn list_contributions_by_status(
        &self,
        status: ContributionStatus,
    ) -> Result<Vec<Contribution>> {
        self.inner.list_contributions_by_status(status).await
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        self.inner.get_stats().await
    }
}

pub struct Harness {
    pub sim: Arc<SimulatedChain>,
    pub chain: Arc<dyn ChainClient>,
    pub storage: Arc<FlakyStorage>,
    pub services: EscrowServices,
    pub owner: Actor,
    pub reviewer: Actor,
    pub admin: Actor,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(fast_monitor(), 0).await
    }

    pub async fn with_config(config: MonitorConfig, confirmation_polls: u32) -> Self {
        let sim = Arc::new(
            SimulatedChain::new(Address::from_bytes([0xcc; 20]), Address::from_bytes([0x01; 20]))
                .with_confirmation_polls(confirmation_polls),
        );
        sim.set_time(NOW).await;
        sim.fund(sim.account(), Wei::from_eth(1_000)).await;

        let contract = FundingContract::new(sim.clone(), sim.contract(), Some(DEFAULT_CHAIN_ID));
        contract.connect().await.unwrap();
        let chain: Arc<dyn ChainClient> = Arc::new(contract);
        Self::assemble(sim, chain, Arc::new(FlakyStorage::default()), config)
    }

    /// Services over an existing chain and storage, as after a restart
    pub fn assemble(
        sim: Arc<SimulatedChain>,
        chain: Arc<dyn ChainClient>,
        storage: Arc<FlakyStorage>,
        config: MonitorConfig,
    ) -> Self {
        let services = EscrowServices::new(storage.clone(), chain.clone(), config);
        Self {
            sim,
            chain,
            storage,
            services,
            owner: Actor::member("alice"),
            reviewer: Actor::reviewer("rita"),
            admin: Actor::admin("root"),
        }
    }

    /// Create the project on chain and register it, owned by `alice`
    pub async fn project(&self, id: &str, target_eth: u64) -> ProjectId {
        let project_id = ProjectId::from(id);
        self.chain
            .create_project(&project_id, Wei::from_eth(target_eth), NOW + 30 * DAY)
            .await
            .unwrap();
        self.storage
            .put_project(&ProjectRecord::new(
                project_id.clone(),
                UserId::new("alice"),
                format!("Project {id}"),
            ))
            .await
            .unwrap();
        project_id
    }

    pub async fn record(&self, id: &ProjectId) -> ProjectRecord {
        self.storage.find_project(id).await.unwrap().unwrap()
    }

    pub async fn contribution(&self, hash: &TxHash) -> Contribution {
        self.storage.get_contribution(hash).await.unwrap().unwrap()
    }
}
