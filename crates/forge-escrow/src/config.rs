use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transaction monitor tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between polling rounds
    pub poll_interval: Duration,
    /// Polls per watch before giving up
    pub max_attempts: u32,
    /// Budget for watches resumed at startup
    pub resume_max_attempts: u32,
    /// Receipts fetched concurrently within one round
    pub batch_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            max_attempts: 60,
            resume_max_attempts: 40,
            batch_size: 16,
        }
    }
}

impl MonitorConfig {
    /// Longest a watch can stay open before it times out
    pub fn timeout(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}
