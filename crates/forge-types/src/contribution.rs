use crate::amount::Wei;
use crate::ids::{ContributionId, ProjectKey, TxHash, UserId};
use crate::{Result, TypesError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl ContributionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContributionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionStatus::Pending => "pending",
            ContributionStatus::Confirmed => "confirmed",
            ContributionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ContributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for recording a donation that has been submitted to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContribution {
    pub project_id: ProjectKey,
    pub contributor_id: UserId,
    pub amount: Wei,
    pub currency: String,
    pub blockchain_tx_hash: TxHash,
    pub contribution_message: Option<String>,
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: ContributionId,
    pub project_id: ProjectKey,
    pub contributor_id: UserId,
    pub amount: Wei,
    pub currency: String,
    pub blockchain_tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub status: ContributionStatus,
    pub contribution_message: Option<String>,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Contribution {
    pub fn from_new(new: NewContribution, now: DateTime<Utc>) -> Self {
        Self {
            id: ContributionId::new(),
            project_id: new.project_id,
            contributor_id: new.contributor_id,
            amount: new.amount,
            currency: new.currency,
            blockchain_tx_hash: new.blockchain_tx_hash,
            block_number: None,
            gas_used: None,
            status: ContributionStatus::Pending,
            contribution_message: new.contribution_message,
            is_anonymous: new.is_anonymous,
            created_at: now,
            confirmed_at: None,
        }
    }

    /// Apply a terminal status.
    ///
    /// Returns `Ok(false)` when the row already carries `status` (replay),
    /// `Ok(true)` when it changed, and an error for any backwards or
    /// conflicting move.
    pub fn resolve(
        &mut self,
        status: ContributionStatus,
        block_number: Option<u64>,
        gas_used: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.status == status {
            return Ok(false);
        }
        if self.status.is_terminal() || !status.is_terminal() {
            return Err(TypesError::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.block_number = block_number.or(self.block_number);
        self.gas_used = gas_used.or(self.gas_used);
        if status == ContributionStatus::Confirmed {
            self.confirmed_at = Some(now);
        }
        Ok(true)
    }
}

/// Aggregate view of a project's contributions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionSummary {
    pub contributions: Vec<Contribution>,
    /// Sum of confirmed contributions only.
    pub total_amount: Wei,
    /// Distinct contributors with at least one confirmed contribution.
    pub total_contributors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Contribution {
        Contribution::from_new(
            NewContribution {
                project_id: ProjectKey::new(),
                contributor_id: UserId::new("backer"),
                amount: Wei::parse_eth("0.5").unwrap(),
                currency: "ETH".to_string(),
                blockchain_tx_hash: TxHash::from_bytes([7u8; 32]),
                contribution_message: None,
                is_anonymous: false,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_resolve_is_monotonic() {
        let mut c = sample();
        let now = Utc::now();
        assert!(c.resolve(ContributionStatus::Confirmed, Some(10), Some(21000), now).unwrap());
        assert_eq!(c.confirmed_at, Some(now));
        assert_eq!(c.block_number, Some(10));

        // replay is a no-op
        assert!(!c.resolve(ContributionStatus::Confirmed, Some(11), None, now).unwrap());
        assert_eq!(c.block_number, Some(10));

        assert!(c.resolve(ContributionStatus::Failed, None, None, now).is_err());
        assert!(c.resolve(ContributionStatus::Pending, None, None, now).is_err());
    }
}
