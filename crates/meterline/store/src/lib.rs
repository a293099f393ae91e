//! Storage contracts consumed by the meterline engine.
//!
//! The engine needs very little from persistence:
//! - a per-source, time-ordered reading store with insert-if-absent,
//!   nearest-before/nearest-after lookups and bounded range scans
//! - a catalog resolving source ids to [`Source`] definitions
//!
//! Relational or embedded backends implement these traits outside this
//! workspace. The in-memory adapters here are deterministic and test-friendly.
//!
//! [`Source`]: meterline_types::Source

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryReadingStore, InMemorySourceCatalog};
pub use traits::{ReadingStore, ReadingWindow, SourceCatalog};
