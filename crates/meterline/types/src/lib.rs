//! Shared data types for the meterline energy query engine.
//!
//! This crate defines the vocabulary every other meterline crate speaks:
//! - [`Reading`]: one timestamped sample of instantaneous power and/or a
//!   cumulative energy counter
//! - [`Source`]: a real (leaf) meter or a virtual meter summing other sources
//! - [`Straddle`]: the pair of readings bracketing a query instant
//! - [`Checkpoint`]: a cached cumulative-counter value at an aligned boundary
//! - [`EngineError`]: the classified error kinds surfaced to callers
//!
//! Quantities are plain `f64` aliases. Timestamps are `DateTime<Utc>`.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod checkpoint;
mod error;
mod reading;
mod source;
mod straddle;

pub use checkpoint::{Checkpoint, CheckpointStatus};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use reading::{Reading, ReadingField};
pub use source::{CacheSettings, Direction, Source, SourceId, SourceKind};
pub use straddle::Straddle;

/// Instantaneous power.
pub type Watts = f64;

/// Energy, as carried by cumulative counters.
pub type WattHours = f64;

/// Carbon mass emitted.
pub type PoundsCo2 = f64;

/// Carbon intensity of a leaf source: pounds of CO2 per megawatt-hour.
pub type LbsPerMwh = f64;
