use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meterline_types::{Reading, ReadingField, Source, SourceId};

use crate::StoreResult;

/// Time bounds for a range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingWindow {
    pub start: Bound<DateTime<Utc>>,
    pub end: Bound<DateTime<Utc>>,
}

impl ReadingWindow {
    /// `[start, end]`
    pub fn inclusive(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Included(start),
            end: Bound::Included(end),
        }
    }

    /// `(start, end]`
    pub fn after_until(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Excluded(start),
            end: Bound::Included(end),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let after_start = match self.start {
            Bound::Included(s) => t >= s,
            Bound::Excluded(s) => t > s,
            Bound::Unbounded => true,
        };
        let before_end = match self.end {
            Bound::Included(e) => t <= e,
            Bound::Excluded(e) => t < e,
            Bound::Unbounded => true,
        };
        after_start && before_end
    }

    /// Whether no instant can satisfy both bounds.
    pub fn is_empty(&self) -> bool {
        match (self.start, self.end) {
            (Bound::Included(s), Bound::Included(e)) => s > e,
            (Bound::Included(s), Bound::Excluded(e))
            | (Bound::Excluded(s), Bound::Included(e))
            | (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
            _ => false,
        }
    }
}

/// Append-only, per-source, time-ordered reading storage.
///
/// Implementations must be safe for concurrent readers and one writer per
/// source. Field-filtered lookups skip readings that do not carry the field.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Insert a reading; fails with `DuplicateTimestamp` if one exists at the
    /// same instant for the same source.
    async fn insert(&self, reading: Reading) -> StoreResult<()>;

    /// Latest reading at or before `t` carrying `field`.
    async fn nearest_before(
        &self,
        source: &SourceId,
        t: DateTime<Utc>,
        field: ReadingField,
    ) -> StoreResult<Option<Reading>>;

    /// Earliest reading at or after `t` carrying `field`.
    async fn nearest_after(
        &self,
        source: &SourceId,
        t: DateTime<Utc>,
        field: ReadingField,
    ) -> StoreResult<Option<Reading>>;

    /// Readings inside `window` carrying `field`, oldest first.
    async fn range(
        &self,
        source: &SourceId,
        window: ReadingWindow,
        field: ReadingField,
    ) -> StoreResult<Vec<Reading>>;

    async fn earliest_timestamp(&self, source: &SourceId) -> StoreResult<Option<DateTime<Utc>>>;

    async fn latest_timestamp(&self, source: &SourceId) -> StoreResult<Option<DateTime<Utc>>>;

    /// Bulk-delete every reading of a source. Returns how many were removed.
    async fn remove_source(&self, source: &SourceId) -> StoreResult<usize>;
}

/// Source definitions, as loaded by an administration path.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn get(&self, id: &SourceId) -> StoreResult<Option<Source>>;

    /// Insert or replace a source after structural validation.
    async fn upsert(&self, source: Source) -> StoreResult<()>;

    async fn remove(&self, id: &SourceId) -> StoreResult<Option<Source>>;

    /// All sources, ordered by id.
    async fn list(&self) -> StoreResult<Vec<Source>>;

    async fn exists(&self, id: &SourceId) -> StoreResult<bool> {
        Ok(self.get(id).await?.is_some())
    }
}
