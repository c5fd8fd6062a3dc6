use async_trait::async_trait;
use forge_types::{
    Contribution, ContributionStatus, EscrowRelease, Milestone, MilestoneId, MilestoneStatus,
    ProjectId, ProjectKey, ProjectRecord, ReleaseId, ReleaseStatus, TxHash, Wei,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Write conflict on {record}: expected status {expected}, found {found}")]
    Conflict {
        record: String,
        expected: String,
        found: String,
    },

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Persistence interface for the escrow core.
///
/// Record sets: `projects`, `project_milestones`, `escrow_releases` and
/// `contributions`. Lookups are by key or equality filter; lists come back
/// ordered by creation time (oldest first). Updates that move a record
/// through its lifecycle carry the status they expect to overwrite and fail
/// with [`StorageError::Conflict`] when another writer got there first.
#[async_trait]
pub trait ForgeStorage: Send + Sync {
    /// Insert or replace a project record
    async fn put_project(&self, project: &ProjectRecord) -> Result<()>;

    async fn get_project(&self, id: &ProjectKey) -> Result<Option<ProjectRecord>>;

    /// Resolve a project by the identifier used on-chain
    async fn find_project(&self, chain_id: &ProjectId) -> Result<Option<ProjectRecord>>;

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>>;

    /// Overwrite the derived funding totals of a project
    async fn update_project_totals(
        &self,
        id: &ProjectKey,
        current_funding: Wei,
        total_backers: u64,
    ) -> Result<()>;

    /// Insert a milestone set atomically: either every row lands or none does
    async fn insert_milestones(&self, milestones: &[Milestone]) -> Result<()>;

    async fn get_milestone(&self, id: &MilestoneId) -> Result<Option<Milestone>>;

    async fn update_milestone(&self, milestone: &Milestone, expected: MilestoneStatus)
        -> Result<()>;

    async fn list_milestones(&self, project: &ProjectKey) -> Result<Vec<Milestone>>;

    async fn insert_release(&self, release: &EscrowRelease) -> Result<()>;

    async fn get_release(&self, id: &ReleaseId) -> Result<Option<EscrowRelease>>;

    async fn update_release(&self, release: &EscrowRelease, expected: ReleaseStatus)
        -> Result<()>;

    async fn list_releases(&self, project: &ProjectKey) -> Result<Vec<EscrowRelease>>;

    /// Insert a contribution; a known transaction hash yields `AlreadyExists`
    async fn insert_contribution(&self, contribution: &Contribution) -> Result<()>;

    async fn get_contribution(&self, tx_hash: &TxHash) -> Result<Option<Contribution>>;

    async fn update_contribution(
        &self,
        contribution: &Contribution,
        expected: ContributionStatus,
    ) -> Result<()>;

    async fn list_contributions(&self, project: &ProjectKey) -> Result<Vec<Contribution>>;

    async fn list_contributions_by_status(
        &self,
        status: ContributionStatus,
    ) -> Result<Vec<Contribution>>;

    /// Get storage statistics
    async fn get_stats(&self) -> Result<StorageStats>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub project_count: usize,
    pub milestone_count: usize,
    pub release_count: usize,
    pub contribution_count: usize,
    pub pending_contributions: usize,
}
