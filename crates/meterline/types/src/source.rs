//! Source definitions: leaf meters and virtual aggregates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::LbsPerMwh;

/// Identifier of a source (meter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which way energy flows through a source.
///
/// Values stored in readings are non-negative in both cases; the direction
/// only tells a reader whether they mean consumption or generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Consumption,
    Generation,
}

/// Checkpoint cache settings for a leaf source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Spacing between checkpoint boundaries.
    pub checkpoint_interval_secs: u64,

    /// Recency threshold below which cached values are never trusted.
    pub window_secs: u64,
}

impl CacheSettings {
    pub fn new(checkpoint_interval_secs: u64, window_secs: u64) -> Self {
        Self {
            checkpoint_interval_secs,
            window_secs,
        }
    }

    /// Boundary spacing; saturates at [`Duration::MAX`] for settings that
    /// [`Source::validate`] would reject.
    pub fn checkpoint_interval(&self) -> Duration {
        seconds(self.checkpoint_interval_secs).unwrap_or(Duration::MAX)
    }

    pub fn window(&self) -> Duration {
        seconds(self.window_secs).unwrap_or(Duration::MAX)
    }

    fn is_representable(&self) -> bool {
        seconds(self.checkpoint_interval_secs).is_some() && seconds(self.window_secs).is_some()
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// Leaf or virtual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceKind {
    /// A real meter holding its own readings.
    Leaf {
        /// Pounds of CO2 emitted per MWh drawn through this meter.
        carbon_intensity: LbsPerMwh,
    },

    /// A meter defined as the sum of other sources, in declared order.
    Virtual { children: Vec<SourceId> },
}

/// A meter known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,

    #[serde(flatten)]
    pub kind: SourceKind,

    #[serde(default)]
    pub direction: Direction,

    /// Anchor for checkpoint boundary alignment.
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,

    /// Leaf-only cache settings; `None` disables checkpointing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSettings>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Source {
    /// Create an uncached leaf source anchored at the Unix epoch.
    pub fn leaf(id: impl Into<SourceId>, carbon_intensity: LbsPerMwh) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Leaf { carbon_intensity },
            direction: Direction::Consumption,
            created_at: epoch(),
            cache: None,
        }
    }

    /// Create a virtual source over `children`, in order.
    pub fn virtual_of<I, S>(id: impl Into<SourceId>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SourceId>,
    {
        Self {
            id: id.into(),
            kind: SourceKind::Virtual {
                children: children.into_iter().map(Into::into).collect(),
            },
            direction: Direction::Consumption,
            created_at: epoch(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, settings: CacheSettings) -> Self {
        self.cache = Some(settings);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, SourceKind::Leaf { .. })
    }

    /// Declared children; empty for a leaf.
    pub fn children(&self) -> &[SourceId] {
        match &self.kind {
            SourceKind::Leaf { .. } => &[],
            SourceKind::Virtual { children } => children,
        }
    }

    /// Carbon intensity for a leaf, `None` for a virtual source.
    pub fn carbon_intensity(&self) -> Option<LbsPerMwh> {
        match self.kind {
            SourceKind::Leaf { carbon_intensity } => Some(carbon_intensity),
            SourceKind::Virtual { .. } => None,
        }
    }

    /// Check the structural rules a source must satisfy before registration.
    ///
    /// Cycles spanning several sources are only detectable at resolution time.
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.as_str().is_empty() {
            return Err(self.invalid("source id must not be empty"));
        }

        match &self.kind {
            SourceKind::Leaf { carbon_intensity } => {
                if !carbon_intensity.is_finite() || *carbon_intensity < 0.0 {
                    return Err(self.invalid(format!(
                        "carbon intensity must be finite and non-negative, got {}",
                        carbon_intensity
                    )));
                }
                if let Some(cache) = &self.cache {
                    if cache.checkpoint_interval_secs == 0 || cache.window_secs == 0 {
                        return Err(
                            self.invalid("checkpoint interval and window must be positive")
                        );
                    }
                    if !cache.is_representable() {
                        return Err(self.invalid(format!(
                            "checkpoint interval and window must not exceed {} seconds",
                            Duration::MAX.num_seconds()
                        )));
                    }
                }
            }
            SourceKind::Virtual { children } => {
                if children.is_empty() {
                    return Err(self.invalid("virtual source needs at least one child"));
                }
                if children.contains(&self.id) {
                    return Err(EngineError::CycleDetected {
                        path: vec![self.id.clone(), self.id.clone()],
                    });
                }
                if self.cache.is_some() {
                    return Err(self.invalid("cache settings apply to leaf sources only"));
                }
            }
        }

        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> EngineError {
        EngineError::InvalidSource {
            source_id: self.id.clone(),
            reason: reason.into(),
        }
    }
}
