use crate::backend::{Result, StorageError};
use crate::memory::{MemoryContents, MemoryStorage};
use forge_types::{Contribution, EscrowRelease, Milestone, ProjectRecord};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub project_count: usize,
    pub milestone_count: usize,
    pub release_count: usize,
    pub contribution_count: usize,
    pub hash: Vec<u8>,
}

/// Point-in-time copy of a [`MemoryStorage`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub projects: Vec<ProjectRecord>,
    pub milestones: Vec<Milestone>,
    pub releases: Vec<EscrowRelease>,
    pub contributions: Vec<Contribution>,
}

impl Snapshot {
    /// Create a new snapshot from current state
    pub async fn create(storage: &MemoryStorage) -> Result<Self> {
        let contents = storage.export().await;
        let hash = Self::calculate_hash(&contents)?;

        let metadata = SnapshotMetadata {
            version: SNAPSHOT_VERSION,
            created_at: chrono::Utc::now(),
            project_count: contents.projects.len(),
            milestone_count: contents.milestones.len(),
            release_count: contents.releases.len(),
            contribution_count: contents.contributions.len(),
            hash,
        };

        Ok(Self {
            metadata,
            projects: contents.projects,
            milestones: contents.milestones,
            releases: contents.releases,
            contributions: contents.contributions,
        })
    }

    /// Replace the storage contents with this snapshot
    pub async fn restore_into(&self, storage: &MemoryStorage) -> Result<()> {
        if !self.verify() {
            return Err(StorageError::BackendError(
                "Snapshot verification failed".into(),
            ));
        }
        storage.import(self.contents()).await;
        Ok(())
    }

    fn contents(&self) -> MemoryContents {
        MemoryContents {
            projects: self.projects.clone(),
            milestones: self.milestones.clone(),
            releases: self.releases.clone(),
            contributions: self.contributions.clone(),
        }
    }

    /// SHA-256 over the serialized record sets
    fn calculate_hash(contents: &MemoryContents) -> Result<Vec<u8>> {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(encode(&contents.projects)?);
        hasher.update(encode(&contents.milestones)?);
        hasher.update(encode(&contents.releases)?);
        hasher.update(encode(&contents.contributions)?);
        Ok(hasher.finalize().to_vec())
    }

    /// Verify snapshot integrity
    pub fn verify(&self) -> bool {
        if self.metadata.version != SNAPSHOT_VERSION {
            return false;
        }
        match Self::calculate_hash(&self.contents()) {
            Ok(hash) => hash == self.metadata.hash,
            Err(_) => false,
        }
    }

    /// Save snapshot to file, replacing any previous one atomically
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let data = encode(self)?;

        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await?;

        info!(
            path = %path.display(),
            projects = self.metadata.project_count,
            contributions = self.metadata.contribution_count,
            bytes = data.len(),
            "💾 Snapshot saved"
        );
        Ok(())
    }

    /// Load snapshot from file
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path).await?;

        let snapshot: Self = bincode::deserialize(&data)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        if !snapshot.verify() {
            return Err(StorageError::BackendError(
                "Snapshot verification failed".into(),
            ));
        }

        Ok(snapshot)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}
