use crate::amount::Wei;
use crate::ids::{ProjectId, ProjectKey, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database projection of a project. Funding totals are derived from
/// confirmed contributions and rewritten on every recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectKey,
    pub chain_project_id: ProjectId,
    pub owner_id: UserId,
    pub title: String,
    pub current_funding: Wei,
    pub total_backers: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRecord {
    pub fn new(chain_project_id: ProjectId, owner_id: UserId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectKey::new(),
            chain_project_id,
            owner_id,
            title: title.into(),
            current_funding: Wei::ZERO,
            total_backers: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
