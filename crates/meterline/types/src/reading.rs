//! Meter readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SourceId, WattHours, Watts};

/// Which value of a reading a query is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingField {
    /// Instantaneous power, an arbitrary real value.
    Power,

    /// Energy-to-date counter, treated as non-decreasing.
    CumulativeEnergy,
}

impl std::fmt::Display for ReadingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadingField::Power => write!(f, "power"),
            ReadingField::CumulativeEnergy => write!(f, "cumulative_energy"),
        }
    }
}

/// One timestamped sample from a leaf source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub source: SourceId,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<Watts>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_energy: Option<WattHours>,
}

impl Reading {
    pub fn new(source: impl Into<SourceId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            timestamp,
            power: None,
            cumulative_energy: None,
        }
    }

    pub fn with_power(mut self, watts: Watts) -> Self {
        self.power = Some(watts);
        self
    }

    pub fn with_energy(mut self, watt_hours: WattHours) -> Self {
        self.cumulative_energy = Some(watt_hours);
        self
    }

    /// The value this reading carries for `field`, if any.
    pub fn value(&self, field: ReadingField) -> Option<f64> {
        match field {
            ReadingField::Power => self.power,
            ReadingField::CumulativeEnergy => self.cumulative_energy,
        }
    }

    pub fn has(&self, field: ReadingField) -> bool {
        self.value(field).is_some()
    }
}
