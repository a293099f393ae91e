//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when a reading lands next to an already finalized checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LateDataPolicy {
    /// Finalized checkpoints never change. Very late data is not reflected in
    /// cached history.
    #[default]
    Freeze,

    /// Recompute affected checkpoints whatever their age.
    Revise,
}

/// Configuration for [`MeterEngine`](crate::MeterEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global switch for the checkpoint cache. Per-source settings still apply.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default)]
    pub late_data_policy: LateDataPolicy,

    /// Deadline applied to contexts created by [`MeterEngine::context`](crate::MeterEngine::context).
    #[serde(default)]
    pub query_timeout_secs: Option<u64>,

    /// Upper bound on checkpoint boundaries touched by a single ingestion.
    #[serde(default = "default_max_boundaries")]
    pub max_boundaries_per_ingest: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            late_data_policy: LateDataPolicy::Freeze,
            query_timeout_secs: None,
            max_boundaries_per_ingest: default_max_boundaries(),
        }
    }
}

impl EngineConfig {
    /// Configuration with the checkpoint cache switched off.
    pub fn uncached() -> Self {
        Self {
            cache_enabled: false,
            ..Default::default()
        }
    }

    pub fn with_late_data_policy(mut self, policy: LateDataPolicy) -> Self {
        self.late_data_policy = policy;
        self
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_boundaries() -> usize {
    10_000
}
