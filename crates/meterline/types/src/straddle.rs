//! Bracketing reading pairs and linear interpolation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::{Reading, ReadingField};

/// The pair of readings bracketing `target` for one field.
///
/// `before.timestamp <= target <= after.timestamp`. On an exact hit both
/// sides hold the same reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Straddle {
    pub field: ReadingField,
    pub before: Reading,
    pub after: Reading,
    pub target: DateTime<Utc>,
}

impl Straddle {
    /// Build a straddle, checking the ordering invariant.
    pub fn new(
        field: ReadingField,
        before: Reading,
        after: Reading,
        target: DateTime<Utc>,
    ) -> EngineResult<Self> {
        if before.timestamp > target || after.timestamp < target {
            return Err(EngineError::OutOfRange {
                source_id: before.source.clone(),
                at: target,
            });
        }
        Ok(Self {
            field,
            before,
            after,
            target,
        })
    }

    /// Degenerate straddle for a reading sitting exactly on the target.
    pub fn exact(field: ReadingField, reading: Reading) -> Self {
        let target = reading.timestamp;
        Self {
            field,
            before: reading.clone(),
            after: reading,
            target,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.before.timestamp == self.after.timestamp
    }

    /// Linearly interpolate the straddled field at `target`.
    ///
    /// Treating a cumulative counter as piecewise-linear between samples is an
    /// approximation, not a statement about the physical load.
    pub fn interpolate(&self) -> EngineResult<f64> {
        let before = self.endpoint_value(&self.before)?;
        if self.is_exact() || self.target == self.before.timestamp {
            return Ok(before);
        }

        let after = self.endpoint_value(&self.after)?;
        if self.target == self.after.timestamp {
            return Ok(after);
        }

        Ok(lerp(
            self.before.timestamp,
            before,
            self.after.timestamp,
            after,
            self.target,
        ))
    }

    fn endpoint_value(&self, reading: &Reading) -> EngineResult<f64> {
        reading.value(self.field).ok_or_else(|| EngineError::NoData {
            source_id: reading.source.clone(),
            field: self.field,
        })
    }
}

/// Value at `t` on the line through `(t0, v0)` and `(t1, v1)`.
pub(crate) fn lerp(
    t0: DateTime<Utc>,
    v0: f64,
    t1: DateTime<Utc>,
    v1: f64,
    t: DateTime<Utc>,
) -> f64 {
    let span = (t1 - t0).num_milliseconds() as f64;
    if span == 0.0 {
        return v0;
    }
    let offset = (t - t0).num_milliseconds() as f64;
    v0 + (v1 - v0) * offset / span
}
