//! In-memory reference implementations of the storage contracts.
//!
//! Readings live in one `BTreeMap` per source, so lookups are logarithmic.
//! Suitable for development, tests and the `meterctl` fixture runner.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meterline_types::{Reading, ReadingField, Source, SourceId};
use tracing::debug;

use crate::traits::{ReadingStore, ReadingWindow, SourceCatalog};
use crate::{StoreError, StoreResult};

/// In-memory reading store.
#[derive(Default)]
pub struct InMemoryReadingStore {
    series: DashMap<SourceId, BTreeMap<DateTime<Utc>, Reading>>,
}

impl InMemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of readings held for `source`.
    pub fn len(&self, source: &SourceId) -> usize {
        self.series.get(source).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, source: &SourceId) -> bool {
        self.len(source) == 0
    }
}

#[async_trait]
impl ReadingStore for InMemoryReadingStore {
    async fn insert(&self, reading: Reading) -> StoreResult<()> {
        let mut series = self.series.entry(reading.source.clone()).or_default();
        if series.contains_key(&reading.timestamp) {
            return Err(StoreError::DuplicateTimestamp {
                source_id: reading.source,
                timestamp: reading.timestamp,
            });
        }
        series.insert(reading.timestamp, reading);
        Ok(())
    }

    async fn nearest_before(
        &self,
        source: &SourceId,
        t: DateTime<Utc>,
        field: ReadingField,
    ) -> StoreResult<Option<Reading>> {
        Ok(self.series.get(source).and_then(|series| {
            series
                .range(..=t)
                .rev()
                .map(|(_, r)| r)
                .find(|r| r.has(field))
                .cloned()
        }))
    }

    async fn nearest_after(
        &self,
        source: &SourceId,
        t: DateTime<Utc>,
        field: ReadingField,
    ) -> StoreResult<Option<Reading>> {
        Ok(self.series.get(source).and_then(|series| {
            series
                .range(t..)
                .map(|(_, r)| r)
                .find(|r| r.has(field))
                .cloned()
        }))
    }

    async fn range(
        &self,
        source: &SourceId,
        window: ReadingWindow,
        field: ReadingField,
    ) -> StoreResult<Vec<Reading>> {
        // BTreeMap::range panics on inverted or empty-exclusive bounds.
        if window.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .series
            .get(source)
            .map(|series| {
                series
                    .range((window.start, window.end))
                    .map(|(_, r)| r)
                    .filter(|r| r.has(field))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn earliest_timestamp(&self, source: &SourceId) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .series
            .get(source)
            .and_then(|series| series.keys().next().copied()))
    }

    async fn latest_timestamp(&self, source: &SourceId) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .series
            .get(source)
            .and_then(|series| series.keys().next_back().copied()))
    }

    async fn remove_source(&self, source: &SourceId) -> StoreResult<usize> {
        let removed = self
            .series
            .remove(source)
            .map(|(_, series)| series.len())
            .unwrap_or(0);
        debug!(source = %source, removed, "Removed readings");
        Ok(removed)
    }
}

/// In-memory source catalog.
#[derive(Default)]
pub struct InMemorySourceCatalog {
    sources: DashMap<SourceId, Source>,
}

impl InMemorySourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from definitions, validating each one.
    pub fn with_sources(sources: impl IntoIterator<Item = Source>) -> StoreResult<Self> {
        let catalog = Self::new();
        for source in sources {
            source.validate().map_err(StoreError::Rejected)?;
            catalog.sources.insert(source.id.clone(), source);
        }
        Ok(catalog)
    }
}

#[async_trait]
impl SourceCatalog for InMemorySourceCatalog {
    async fn get(&self, id: &SourceId) -> StoreResult<Option<Source>> {
        Ok(self.sources.get(id).map(|s| s.clone()))
    }

    async fn upsert(&self, source: Source) -> StoreResult<()> {
        source.validate().map_err(StoreError::Rejected)?;
        self.sources.insert(source.id.clone(), source);
        Ok(())
    }

    async fn remove(&self, id: &SourceId) -> StoreResult<Option<Source>> {
        Ok(self.sources.remove(id).map(|(_, s)| s))
    }

    async fn list(&self) -> StoreResult<Vec<Source>> {
        let mut sources = self
            .sources
            .iter()
            .map(|s| s.value().clone())
            .collect::<Vec<_>>();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }
}
