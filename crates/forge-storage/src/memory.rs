use crate::backend::{ForgeStorage, Result, StorageError, StorageStats};
use async_trait::async_trait;
use chrono::Utc;
use forge_types::{
    Contribution, ContributionStatus, EscrowRelease, Milestone, MilestoneId, MilestoneStatus,
    ProjectId, ProjectKey, ProjectRecord, ReleaseId, ReleaseStatus, TxHash, Wei,
};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Full contents of a [`MemoryStorage`], used for snapshots.
#[derive(Debug, Clone, Default)]
pub struct MemoryContents {
    pub projects: Vec<ProjectRecord>,
    pub milestones: Vec<Milestone>,
    pub releases: Vec<EscrowRelease>,
    pub contributions: Vec<Contribution>,
}

/// Rows keyed by id that remember the order they were first inserted in.
///
/// Lists sort by timestamp with a stable sort, so rows written in one batch
/// with the same timestamp (a milestone plan) come back in batch order.
struct Table<K, V> {
    rows: HashMap<K, V>,
    order: Vec<K>,
}

impl<K: Eq + Hash + Clone, V> Table<K, V> {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn from_rows(rows: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut table = Self::new();
        for (key, value) in rows {
            table.insert(key, value);
        }
        table
    }

    fn contains_key(&self, key: &K) -> bool {
        self.rows.contains_key(key)
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.rows.get(key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.rows.get_mut(key)
    }

    /// Insert or replace; a replaced row keeps its position
    fn insert(&mut self, key: K, value: V) {
        if self.rows.insert(key.clone(), value).is_none() {
            self.order.push(key);
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.order.iter().filter_map(|key| self.rows.get(key))
    }
}

/// In-memory storage backend for tests, simulation and single-process runs
pub struct MemoryStorage {
    projects: Arc<RwLock<Table<ProjectKey, ProjectRecord>>>,
    milestones: Arc<RwLock<Table<MilestoneId, Milestone>>>,
    releases: Arc<RwLock<Table<ReleaseId, EscrowRelease>>>,
    contributions: Arc<RwLock<Table<TxHash, Contribution>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            projects: Arc::new(RwLock::new(Table::new())),
            milestones: Arc::new(RwLock::new(Table::new())),
            releases: Arc::new(RwLock::new(Table::new())),
            contributions: Arc::new(RwLock::new(Table::new())),
        }
    }

    /// Everything held, oldest first; equal timestamps keep insertion order
    pub async fn export(&self) -> MemoryContents {
        let mut contents = MemoryContents {
            projects: self.projects.read().await.values().cloned().collect(),
            milestones: self.milestones.read().await.values().cloned().collect(),
            releases: self.releases.read().await.values().cloned().collect(),
            contributions: self.contributions.read().await.values().cloned().collect(),
        };
        contents.projects.sort_by_key(|p| p.created_at);
        contents.milestones.sort_by_key(|m| m.created_at);
        contents.releases.sort_by_key(|r| r.requested_at);
        contents.contributions.sort_by_key(|c| c.created_at);
        contents
    }

    /// Replace everything held with `contents`
    pub async fn import(&self, contents: MemoryContents) {
        let mut projects = self.projects.write().await;
        let mut milestones = self.milestones.write().await;
        let mut releases = self.releases.write().await;
        let mut contributions = self.contributions.write().await;

        *projects = Table::from_rows(contents.projects.into_iter().map(|p| (p.id, p)));
        *milestones = Table::from_rows(contents.milestones.into_iter().map(|m| (m.id, m)));
        *releases = Table::from_rows(contents.releases.into_iter().map(|r| (r.id, r)));
        *contributions = Table::from_rows(
            contents
                .contributions
                .into_iter()
                .map(|c| (c.blockchain_tx_hash.clone(), c)),
        );

        debug!(
            projects = projects.len(),
            milestones = milestones.len(),
            releases = releases.len(),
            contributions = contributions.len(),
            "Memory storage imported"
        );
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn conflict(record: String, expected: impl ToString, found: impl ToString) -> StorageError {
    StorageError::Conflict {
        record,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

#[async_trait]
impl ForgeStorage for MemoryStorage {
    async fn put_project(&self, project: &ProjectRecord) -> Result<()> {
        let mut projects = self.projects.write().await;
        let duplicate_chain_id = projects
            .values()
            .any(|p| p.chain_project_id == project.chain_project_id && p.id != project.id);
        if duplicate_chain_id {
            return Err(StorageError::AlreadyExists(format!(
                "project {}",
                project.chain_project_id
            )));
        }
        projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: &ProjectKey) -> Result<Option<ProjectRecord>> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn find_project(&self, chain_id: &ProjectId) -> Result<Option<ProjectRecord>> {
        let projects = self.projects.read().await;
        let found = projects
            .values()
            .find(|p| &p.chain_project_id == chain_id)
            .cloned();
        Ok(found)
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        let mut list: Vec<_> = self.projects.read().await.values().cloned().collect();
        list.sort_by_key(|p| p.created_at);
        Ok(list)
    }

    async fn update_project_totals(
        &self,
        id: &ProjectKey,
        current_funding: Wei,
        total_backers: u64,
    ) -> Result<()> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("project {}", id)))?;
        project.current_funding = current_funding;
        project.total_backers = total_backers;
        project.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_milestones(&self, new: &[Milestone]) -> Result<()> {
        let projects = self.projects.read().await;
        let mut milestones = self.milestones.write().await;

        // Validate the whole batch before touching the map
        for milestone in new {
            if !projects.contains_key(&milestone.project_id) {
                return Err(StorageError::NotFound(format!(
                    "project {}",
                    milestone.project_id
                )));
            }
            if milestones.contains_key(&milestone.id) {
                return Err(StorageError::AlreadyExists(format!(
                    "milestone {}",
                    milestone.id
                )));
            }
        }

        for milestone in new {
            milestones.insert(milestone.id, milestone.clone());
        }
        Ok(())
    }

    async fn get_milestone(&self, id: &MilestoneId) -> Result<Option<Milestone>> {
        Ok(self.milestones.read().await.get(id).cloned())
    }

    async fn update_milestone(
        &self,
        milestone: &Milestone,
        expected: MilestoneStatus,
    ) -> Result<()> {
        let mut milestones = self.milestones.write().await;
        let stored = milestones
            .get_mut(&milestone.id)
            .ok_or_else(|| StorageError::NotFound(format!("milestone {}", milestone.id)))?;
        if stored.status != expected {
            return Err(conflict(
                format!("milestone {}", milestone.id),
                expected,
                stored.status,
            ));
        }
        *stored = milestone.clone();
        Ok(())
    }

    async fn list_milestones(&self, project: &ProjectKey) -> Result<Vec<Milestone>> {
        let mut list: Vec<_> = self
            .milestones
            .read()
            .await
            .values()
            .filter(|m| &m.project_id == project)
            .cloned()
            .collect();
        list.sort_by_key(|m| m.created_at);
        Ok(list)
    }

    async fn insert_release(&self, release: &EscrowRelease) -> Result<()> {
        let mut releases = self.releases.write().await;
        if releases.contains_key(&release.id) {
            return Err(StorageError::AlreadyExists(format!("release {}", release.id)));
        }
        releases.insert(release.id, release.clone());
        Ok(())
    }

    async fn get_release(&self, id: &ReleaseId) -> Result<Option<EscrowRelease>> {
        Ok(self.releases.read().await.get(id).cloned())
    }

    async fn update_release(&self, release: &EscrowRelease, expected: ReleaseStatus) -> Result<()> {
        let mut releases = self.releases.write().await;
        let stored = releases
            .get_mut(&release.id)
            .ok_or_else(|| StorageError::NotFound(format!("release {}", release.id)))?;
        if stored.status != expected {
            return Err(conflict(
                format!("release {}", release.id),
                expected,
                stored.status,
            ));
        }
        *stored = release.clone();
        Ok(())
    }

    async fn list_releases(&self, project: &ProjectKey) -> Result<Vec<EscrowRelease>> {
        let mut list: Vec<_> = self
            .releases
            .read()
            .await
            .values()
            .filter(|r| &r.project_id == project)
            .cloned()
            .collect();
        list.sort_by_key(|r| r.requested_at);
        Ok(list)
    }

    async fn insert_contribution(&self, contribution: &Contribution) -> Result<()> {
        let mut contributions = self.contributions.write().await;
        if contributions.contains_key(&contribution.blockchain_tx_hash) {
            return Err(StorageError::AlreadyExists(format!(
                "contribution {}",
                contribution.blockchain_tx_hash
            )));
        }
        contributions.insert(contribution.blockchain_tx_hash.clone(), contribution.clone());
        Ok(())
    }

    async fn get_contribution(&self, tx_hash: &TxHash) -> Result<Option<Contribution>> {
        Ok(self.contributions.read().await.get(tx_hash).cloned())
    }

    async fn update_contribution(
        &self,
        contribution: &Contribution,
        expected: ContributionStatus,
    ) -> Result<()> {
        let mut contributions = self.contributions.write().await;
        let stored = contributions
            .get_mut(&contribution.blockchain_tx_hash)
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "contribution {}",
                    contribution.blockchain_tx_hash
                ))
            })?;
        if stored.status != expected {
            return Err(conflict(
                format!("contribution {}", contribution.blockchain_tx_hash),
                expected,
                stored.status,
            ));
        }
        *stored = contribution.clone();
        Ok(())
    }

    async fn list_contributions(&self, project: &ProjectKey) -> Result<Vec<Contribution>> {
        let mut list: Vec<_> = self
            .contributions
            .read()
            .await
            .values()
            .filter(|c| &c.project_id == project)
            .cloned()
            .collect();
        list.sort_by_key(|c| c.created_at);
        Ok(list)
    }

    async fn list_contributions_by_status(
        &self,
        status: ContributionStatus,
    ) -> Result<Vec<Contribution>> {
        let mut list: Vec<_> = self
            .contributions
            .read()
            .await
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        list.sort_by_key(|c| c.created_at);
        Ok(list)
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let project_count = self.projects.read().await.len();
        let milestone_count = self.milestones.read().await.len();
        let release_count = self.releases.read().await.len();
        let contributions = self.contributions.read().await;
        Ok(StorageStats {
            project_count,
            milestone_count,
            release_count,
            contribution_count: contributions.len(),
            pending_contributions: contributions
                .values()
                .filter(|c| c.status == ContributionStatus::Pending)
                .count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::{NewContribution, NewMilestone, Percent, UserId};

    fn project() -> ProjectRecord {
        ProjectRecord::new(ProjectId::new("proj-1"), UserId::new("owner"), "Solar kiosk")
    }

    fn contribution(project: &ProjectRecord, byte: u8) -> Contribution {
        Contribution::from_new(
            NewContribution {
                project_id: project.id,
                contributor_id: UserId::new("backer"),
                amount: Wei::from_eth(1),
                currency: "ETH".to_string(),
                blockchain_tx_hash: TxHash::from_bytes([byte; 32]),
                contribution_message: None,
                is_anonymous: false,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_duplicate_tx_hash_rejected() {
        let storage = MemoryStorage::new();
        let p = project();
        storage.put_project(&p).await.unwrap();

        let c = contribution(&p, 1);
        storage.insert_contribution(&c).await.unwrap();
        let err = storage.insert_contribution(&c).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(storage.list_contributions(&p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_conflicts_on_stale_status() {
        let storage = MemoryStorage::new();
        let p = project();
        storage.put_project(&p).await.unwrap();
        let mut c = contribution(&p, 2);
        storage.insert_contribution(&c).await.unwrap();

        c.resolve(ContributionStatus::Confirmed, Some(1), None, Utc::now())
            .unwrap();
        storage
            .update_contribution(&c, ContributionStatus::Pending)
            .await
            .unwrap();

        let err = storage
            .update_contribution(&c, ContributionStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_milestone_batch_is_all_or_nothing() {
        let storage = MemoryStorage::new();
        let p = project();
        storage.put_project(&p).await.unwrap();

        let now = Utc::now();
        let good = Milestone::from_new(p.id, NewMilestone::new("a", Percent::whole(50).unwrap()), now);
        let orphan = Milestone::from_new(
            ProjectKey::new(),
            NewMilestone::new("b", Percent::whole(50).unwrap()),
            now,
        );

        assert!(storage.insert_milestones(&[good, orphan]).await.is_err());
        assert!(storage.list_milestones(&p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_timestamp_rows_keep_insertion_order() {
        let storage = MemoryStorage::new();
        let p = project();
        storage.put_project(&p).await.unwrap();

        let now = Utc::now();
        let plan: Vec<Milestone> = (1..=8)
            .map(|i| {
                Milestone::from_new(
                    p.id,
                    NewMilestone::new(format!("m{i}"), Percent::whole(10).unwrap()),
                    now,
                )
            })
            .collect();
        storage.insert_milestones(&plan).await.unwrap();

        let titles: Vec<String> = storage
            .list_milestones(&p.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        let expected: Vec<String> = (1..=8).map(|i| format!("m{i}")).collect();
        assert_eq!(titles, expected);

        // Updating a row does not move it
        let mut second = plan[1].clone();
        second.transition(MilestoneStatus::InReview, now).unwrap();
        storage
            .update_milestone(&second, MilestoneStatus::Pending)
            .await
            .unwrap();
        let listed = storage.list_milestones(&p.id).await.unwrap();
        assert_eq!(listed[1].id, second.id);

        let exported = storage.export().await;
        let restored = MemoryStorage::new();
        restored.import(exported).await;
        let restored_ids: Vec<MilestoneId> = restored
            .list_milestones(&p.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        let original_ids: Vec<MilestoneId> = listed.into_iter().map(|m| m.id).collect();
        assert_eq!(restored_ids, original_ids);
    }

    #[tokio::test]
    async fn test_same_timestamp_contributions_keep_insertion_order() {
        let storage = MemoryStorage::new();
        let p = project();
        storage.put_project(&p).await.unwrap();

        let now = Utc::now();
        for byte in [9u8, 3, 7, 1, 5] {
            let mut c = contribution(&p, byte);
            c.created_at = now;
            storage.insert_contribution(&c).await.unwrap();
        }
        let hashes: Vec<TxHash> = storage
            .list_contributions(&p.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.blockchain_tx_hash)
            .collect();
        let expected: Vec<TxHash> = [9u8, 3, 7, 1, 5]
            .iter()
            .map(|b| TxHash::from_bytes([*b; 32]))
            .collect();
        assert_eq!(hashes, expected);
    }

    #[tokio::test]
    async fn test_project_lookup_by_chain_id() {
        let storage = MemoryStorage::new();
        let p = project();
        storage.put_project(&p).await.unwrap();

        let found = storage.find_project(&ProjectId::new("proj-1")).await.unwrap();
        assert_eq!(found.map(|f| f.id), Some(p.id));

        let clash = ProjectRecord::new(ProjectId::new("proj-1"), UserId::new("other"), "Copy");
        assert!(storage.put_project(&clash).await.is_err());
    }
}
