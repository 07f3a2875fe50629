//! Runtime options of a volume store

use serde::{Deserialize, Serialize};

/// What a fan-out does with tile jobs that fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Wait for every job, then fail the operation with every failed tile listed
    #[default]
    Propagate,
    /// Log failed tiles and return what succeeded; unread samples stay zero
    BestEffort,
}

/// How reads treat tile files that were never written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTiles {
    /// An absent tile reads as all zeros
    #[default]
    Zero,
    /// An absent tile is an I/O failure
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub failure_policy: FailurePolicy,
    pub missing_tiles: MissingTiles,

    /// Worker threads per configured directory; `None` uses the platform's available parallelism
    pub workers_per_directory: Option<usize>,
}

impl StoreConfig {
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_missing_tiles(mut self, missing: MissingTiles) -> Self {
        self.missing_tiles = missing;
        self
    }

    pub fn with_workers_per_directory(mut self, workers: usize) -> Self {
        self.workers_per_directory = Some(workers);
        self
    }
}
