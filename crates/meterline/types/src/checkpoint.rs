//! Cached cumulative-counter values at aligned boundaries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Reading, SourceId, WattHours};

/// Whether a checkpoint may still change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointStatus {
    /// Inside the window; refreshed when nearby data arrives.
    Provisional,

    /// Older than the window; frozen.
    Finalized,
}

/// Energy counter value of a leaf source at a checkpoint boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source: SourceId,

    /// Boundary instant, aligned to the source's checkpoint interval.
    pub timestamp: DateTime<Utc>,

    pub cumulative_energy: WattHours,

    /// When the value was last computed from raw readings.
    pub computed_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Status relative to `now`: finalized once `now - timestamp > window`.
    pub fn status(&self, now: DateTime<Utc>, window: Duration) -> CheckpointStatus {
        if now - self.timestamp > window {
            CheckpointStatus::Finalized
        } else {
            CheckpointStatus::Provisional
        }
    }

    /// The checkpoint viewed as an energy-only reading at its boundary.
    pub fn as_reading(&self) -> Reading {
        Reading::new(self.source.clone(), self.timestamp).with_energy(self.cumulative_energy)
    }
}
