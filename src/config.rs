// ABOUTME: Service configuration - bucket sizing, refill cadence, reward amounts.
// ABOUTME: Loadable from JSON; every field has a default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a [`TaskManagerService`](crate::service::TaskManagerService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Maximum tokens held by a user's rate bucket.
    pub bucket_capacity: u64,

    /// Tokens added to every bucket on each refill tick.
    pub refill_amount: u64,

    /// Period between refill ticks, in milliseconds.
    pub refill_interval_ms: u64,

    /// Rewards credited to a task owner when the task completes.
    pub reward_per_task: u64,

    /// Rewards credited to a worker the first time it completes a chunk.
    pub reward_per_chunk: u64,

    /// When set, admin operations must present this token.
    pub admin_token: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: 10,
            refill_amount: 1,
            refill_interval_ms: 60_000,
            reward_per_task: 1,
            reward_per_chunk: 1,
            admin_token: None,
        }
    }
}

impl ServiceConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Reject settings the rate limiter cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bucket_capacity must be positive".to_string(),
            ));
        }
        if self.refill_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "refill_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    /// Set the bucket capacity.
    pub fn bucket_capacity(mut self, capacity: u64) -> Self {
        self.bucket_capacity = capacity;
        self
    }

    /// Set the tokens added per refill tick.
    pub fn refill_amount(mut self, amount: u64) -> Self {
        self.refill_amount = amount;
        self
    }

    /// Set the refill period.
    pub fn refill_interval_ms(mut self, ms: u64) -> Self {
        self.refill_interval_ms = ms;
        self
    }

    /// Set the reward credited per completed task.
    pub fn reward_per_task(mut self, reward: u64) -> Self {
        self.reward_per_task = reward;
        self
    }

    /// Set the reward credited per completed chunk.
    pub fn reward_per_chunk(mut self, reward: u64) -> Self {
        self.reward_per_chunk = reward;
        self
    }

    /// Require an admin token for model management.
    pub fn admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }
}
