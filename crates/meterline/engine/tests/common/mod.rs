//! Shared fixtures for engine integration and property tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use meterline_engine::{EngineConfig, ManualClock, MeterEngine};
use meterline_store::{
    InMemoryReadingStore, InMemorySourceCatalog, ReadingStore, ReadingWindow, StoreError,
    StoreResult,
};
use meterline_types::{CacheSettings, Reading, ReadingField, Source, SourceId};

/// `2024-01-01T00:00:00Z` plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

/// A "now" far enough ahead that every test reading is outside the window.
pub fn far_future() -> DateTime<Utc> {
    at(60 * 24 * 30)
}

/// 10 minute checkpoints with a 60 minute window.
pub fn ten_minute_cache() -> CacheSettings {
    CacheSettings::new(600, 3600)
}

pub fn cached_leaf(id: &str, intensity: f64) -> Source {
    Source::leaf(id, intensity)
        .with_created_at(at(0))
        .with_cache(ten_minute_cache())
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

pub struct Harness {
    pub engine: Arc<MeterEngine>,
    pub store: Arc<FaultyStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub async fn new(config: EngineConfig, sources: Vec<Source>, now: DateTime<Utc>) -> Self {
        let catalog = Arc::new(InMemorySourceCatalog::with_sources(sources).unwrap());
        let store = Arc::new(FaultyStore::default());
        let clock = Arc::new(ManualClock::new(now));
        let engine = MeterEngine::new(config, catalog, store.clone()).with_clock(clock.clone());
        Self {
            engine: Arc::new(engine),
            store,
            clock,
        }
    }

    /// Ingest `(minute, energy)` pairs for `source` through the engine.
    pub async fn energy_series(&self, source: &str, points: &[(i64, f64)]) {
        for &(minute, energy) in points {
            self.engine
                .ingest(Reading::new(source, at(minute)).with_energy(energy))
                .await
                .unwrap();
        }
    }

    /// Ingest `(minute, watts)` pairs for `source` through the engine.
    pub async fn power_series(&self, source: &str, points: &[(i64, f64)]) {
        for &(minute, watts) in points {
            self.engine
                .ingest(Reading::new(source, at(minute)).with_power(watts))
                .await
                .unwrap();
        }
    }
}

/// In-memory store that can be told to fail range scans or stall one source.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryReadingStore,
    fail_ranges: AtomicBool,
    stalled: parking_lot::Mutex<Option<(SourceId, std::time::Duration)>>,
}

impl FaultyStore {
    pub fn fail_ranges(&self, fail: bool) {
        self.fail_ranges.store(fail, Ordering::SeqCst);
    }

    pub fn stall(&self, source: &str, delay: std::time::Duration) {
        *self.stalled.lock() = Some((SourceId::new(source), delay));
    }

    /// Write directly to the backing store, bypassing checkpoint maintenance.
    pub async fn insert_raw(&self, reading: Reading) {
        self.inner.insert(reading).await.unwrap();
    }

    async fn maybe_stall(&self, source: &SourceId) {
        let delay = self
            .stalled
            .lock()
            .as_ref()
            .filter(|(id, _)| id == source)
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ReadingStore for FaultyStore {
    async fn insert(&self, reading: Reading) -> StoreResult<()> {
        self.inner.insert(reading).await
    }

    async fn nearest_before(
        &self,
        source: &SourceId,
        t: DateTime<Utc>,
        field: ReadingField,
    ) -> StoreResult<Option<Reading>> {
        self.maybe_stall(source).await;
        self.inner.nearest_before(source, t, field).await
    }

    async fn nearest_after(
        &self,
        source: &SourceId,
        t: DateTime<Utc>,
        field: ReadingField,
    ) -> StoreResult<Option<Reading>> {
        self.maybe_stall(source).await;
        self.inner.nearest_after(source, t, field).await
    }

    async fn range(
        &self,
        source: &SourceId,
        window: ReadingWindow,
        field: ReadingField,
    ) -> StoreResult<Vec<Reading>> {
        if self.fail_ranges.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("range scan unavailable".to_string()));
        }
        self.maybe_stall(source).await;
        self.inner.range(source, window, field).await
    }

    async fn earliest_timestamp(&self, source: &SourceId) -> StoreResult<Option<DateTime<Utc>>> {
        self.inner.earliest_timestamp(source).await
    }

    async fn latest_timestamp(&self, source: &SourceId) -> StoreResult<Option<DateTime<Utc>>> {
        self.inner.latest_timestamp(source).await
    }

    async fn remove_source(&self, source: &SourceId) -> StoreResult<usize> {
        self.inner.remove_source(source).await
    }
}
