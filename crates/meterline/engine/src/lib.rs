//! Interpolation, aggregation and checkpoint caching for energy meter queries.
//!
//! [`MeterEngine`] answers three questions about any source, leaf or virtual:
//! - power at an instant, interpolated between the bracketing readings
//! - energy over an interval, from cumulative counter differences
//! - carbon over an interval, computed per leaf with the leaf's intensity
//!
//! Counter lookups for leaves with cache settings go through the
//! [`CheckpointCache`], which turns full-history scans into scans since the
//! last aligned boundary. Every query carries a [`QueryContext`] for
//! cooperative cancellation and deadlines.
//!
//! ```ignore
//! let engine = MeterEngine::new(EngineConfig::default(), catalog, store);
//! engine.ingest(reading).await?;
//! let wh = engine.energy(&engine.context(), &id, start, end).await?;
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod context;
mod engine;
pub mod graph;
pub mod straddle;

pub use checkpoint::{CacheStats, CheckpointCache, CounterRead};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, LateDataPolicy};
pub use context::QueryContext;
pub use engine::{IntervalEnergy, MeterEngine, MAX_PROFILE_BUCKETS};
pub use graph::{FlatLeaf, SourceGraph};
pub use straddle::StraddleList;

pub use meterline_types::{EngineError, EngineResult, ErrorKind};
