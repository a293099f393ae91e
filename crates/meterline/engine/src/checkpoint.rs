//! Checkpoint cache for cumulative energy counters.
//!
//! For leaf sources with [`CacheSettings`], the cache keeps the counter value
//! at boundaries aligned to the source's checkpoint interval (anchored at its
//! `created_at`). A counter lookup older than the window starts from the
//! checkpoint at or before it and only scans readings after that boundary.
//!
//! Discipline:
//! - Lookups inside the window always go to raw readings.
//! - A boundary is only cached once the reading after it is older than the
//!   window, so late data inside the window can never land in a cached gap.
//! - Mutations happen under the per-source lock and touch only the boundaries
//!   they change. A batch is applied under one short write lock, so readers
//!   never see half of it.
//! - Checkpoints discovered during a read are returned as pending and only
//!   committed once the whole query succeeded.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use meterline_store::{ReadingStore, ReadingWindow};
use meterline_types::{
    CacheSettings, Checkpoint, CheckpointStatus, EngineError, EngineResult, Reading, ReadingField,
    Source, SourceId, Straddle, WattHours,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::config::{EngineConfig, LateDataPolicy};
use crate::straddle;

type Series = BTreeMap<DateTime<Utc>, Checkpoint>;

/// Counters describing how the cache has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered from a checkpoint.
    pub hits: u64,

    /// Lookups served from raw readings because no checkpoint applied.
    pub cold_reads: u64,

    /// Lookups inside the window, which never consult the cache.
    pub window_bypasses: u64,

    pub created: u64,
    pub refreshed: u64,

    /// Finalized checkpoints left untouched by late data.
    pub frozen_skips: u64,

    /// Checkpoints refused because they would break counter monotonicity.
    pub rejected: u64,

    /// Cache paths abandoned because storage failed.
    pub fallbacks: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    cold_reads: AtomicU64,
    window_bypasses: AtomicU64,
    created: AtomicU64,
    refreshed: AtomicU64,
    frozen_skips: AtomicU64,
    rejected: AtomicU64,
    fallbacks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Result of a counter lookup.
#[derive(Debug, Clone)]
pub struct CounterRead {
    pub value: WattHours,

    /// Checkpoint worth caching, discovered on the cold path.
    pub pending: Option<Checkpoint>,
}

/// Per-engine checkpoint cache.
pub struct CheckpointCache {
    series: DashMap<SourceId, Arc<RwLock<Series>>>,
    locks: DashMap<SourceId, Arc<Mutex<()>>>,
    enabled: bool,
    policy: LateDataPolicy,
    max_boundaries_per_ingest: usize,
    counters: Counters,
}

impl CheckpointCache {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            series: DashMap::new(),
            locks: DashMap::new(),
            enabled: config.cache_enabled,
            policy: config.late_data_policy,
            max_boundaries_per_ingest: config.max_boundaries_per_ingest,
            counters: Counters::default(),
        }
    }

    /// Effective cache settings for `source`, if it is a cached leaf.
    pub fn settings_for(&self, source: &Source) -> Option<CacheSettings> {
        if !self.enabled || !source.is_leaf() {
            return None;
        }
        source.cache
    }

    /// The writer lock for one source.
    pub fn lock_for(&self, id: &SourceId) -> Arc<Mutex<()>> {
        self.locks.entry(id.clone()).or_default().clone()
    }

    fn series_for(&self, id: &SourceId) -> Option<Arc<RwLock<Series>>> {
        self.series.get(id).map(|s| Arc::clone(s.value()))
    }

    fn series_entry(&self, id: &SourceId) -> Arc<RwLock<Series>> {
        self.series.entry(id.clone()).or_default().clone()
    }

    pub fn get(&self, id: &SourceId, boundary: DateTime<Utc>) -> Option<Checkpoint> {
        self.series_for(id)?.read().get(&boundary).cloned()
    }

    /// All checkpoints for a source, oldest first.
    pub fn checkpoints(&self, id: &SourceId) -> Vec<Checkpoint> {
        match self.series_for(id) {
            Some(series) => {
                let series = series.read();
                series.values().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Drop every checkpoint of a deleted source.
    ///
    /// Waits for the source's writer to finish. The writer lock itself is only
    /// forgotten when no other task holds or awaits it.
    pub async fn evict(&self, id: &SourceId) -> usize {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut evicted = 0;
        if let Some((_, series)) = self.series.remove(id) {
            evicted = series.read().len();
        }
        self.locks.remove_if(id, |_, held| Arc::strong_count(held) <= 2);
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            cold_reads: c.cold_reads.load(Ordering::Relaxed),
            window_bypasses: c.window_bypasses.load(Ordering::Relaxed),
            created: c.created.load(Ordering::Relaxed),
            refreshed: c.refreshed.load(Ordering::Relaxed),
            frozen_skips: c.frozen_skips.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Cumulative energy of leaf `source` at `t`.
    pub async fn counter_at(
        &self,
        store: &dyn ReadingStore,
        source: &Source,
        t: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<CounterRead> {
        let id = &source.id;

        let Some(settings) = self.settings_for(source) else {
            bump(&self.counters.cold_reads);
            return cold(store, id, t).await;
        };

        if now - t <= settings.window() {
            bump(&self.counters.window_bypasses);
            trace!(source = %id, %t, "Inside cache window, reading raw data");
            return cold(store, id, t).await;
        }

        let Some(boundary) =
            boundary_at_or_before(source.created_at, settings.checkpoint_interval(), t)
        else {
            bump(&self.counters.cold_reads);
            return cold(store, id, t).await;
        };

        if let Some(checkpoint) = self.get(id, boundary) {
            match from_checkpoint(store, &checkpoint, t).await {
                Ok(value) => {
                    bump(&self.counters.hits);
                    return Ok(CounterRead {
                        value,
                        pending: None,
                    });
                }
                Err(EngineError::Storage(reason)) => {
                    bump(&self.counters.fallbacks);
                    warn!(source = %id, %boundary, %reason, "Checkpoint read failed, using raw readings");
                }
                Err(err) => return Err(err),
            }
        }

        bump(&self.counters.cold_reads);
        let mut read = cold(store, id, t).await?;

        read.pending = match straddle::resolve(store, id, boundary, ReadingField::CumulativeEnergy)
            .await
        {
            // The gap around the boundary may still receive readings.
            Ok(bracket) if now - bracket.after.timestamp <= settings.window() => None,
            Ok(bracket) => bracket
                .interpolate()
                .ok()
                .map(|value| new_checkpoint(id, boundary, value, now)),
            Err(err) => {
                debug!(source = %id, %boundary, error = %err, "Boundary not coverable yet");
                None
            }
        };

        Ok(read)
    }

    /// Store checkpoints found by a successful query, unless already present.
    pub async fn commit(&self, pending: Vec<Checkpoint>) -> usize {
        let mut written = 0;
        for checkpoint in pending {
            let lock = self.lock_for(&checkpoint.source);
            let _guard = lock.lock().await;

            let entry = self.series_entry(&checkpoint.source);
            let mut series = entry.write();
            if series.contains_key(&checkpoint.timestamp) {
                continue;
            }
            if !fits_monotonic(&series, &checkpoint) {
                bump(&self.counters.rejected);
                warn!(
                    source = %checkpoint.source,
                    boundary = %checkpoint.timestamp,
                    value = checkpoint.cumulative_energy,
                    "Checkpoint would break counter monotonicity, not cached"
                );
                continue;
            }

            series.insert(checkpoint.timestamp, checkpoint);
            bump(&self.counters.created);
            written += 1;
        }
        written
    }

    /// Append a reading and maintain the checkpoints it affects.
    ///
    /// Returns the number of checkpoints written. Checkpoint maintenance never
    /// fails the ingestion; only the store insert can.
    pub async fn ingest(
        &self,
        store: &dyn ReadingStore,
        source: &Source,
        reading: Reading,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let lock = self.lock_for(&source.id);
        let _guard = lock.lock().await;

        store.insert(reading.clone()).await?;

        let Some(settings) = self.settings_for(source) else {
            return Ok(0);
        };
        if reading.cumulative_energy.is_none() {
            return Ok(0);
        }
        if now - reading.timestamp <= settings.window() {
            trace!(source = %source.id, timestamp = %reading.timestamp, "Reading inside cache window");
            return Ok(0);
        }

        match self.maintain(store, source, settings, &reading, now).await {
            Ok(written) => Ok(written),
            Err(err) => {
                bump(&self.counters.fallbacks);
                warn!(source = %source.id, error = %err, "Checkpoint maintenance failed, cache unchanged");
                Ok(0)
            }
        }
    }

    /// Recompute boundaries between the new reading's neighbours.
    ///
    /// Caller holds the source lock.
    async fn maintain(
        &self,
        store: &dyn ReadingStore,
        source: &Source,
        settings: CacheSettings,
        reading: &Reading,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let id = &source.id;
        let field = ReadingField::CumulativeEnergy;
        let epsilon = Duration::nanoseconds(1);

        let prev = match reading.timestamp.checked_sub_signed(epsilon) {
            Some(t) => store.nearest_before(id, t, field).await?,
            None => None,
        };
        let next = match reading.timestamp.checked_add_signed(epsilon) {
            Some(t) => store.nearest_after(id, t, field).await?,
            None => None,
        };

        let start = prev
            .as_ref()
            .map_or(Bound::Included(reading.timestamp), |p| {
                Bound::Excluded(p.timestamp)
            });
        // Boundaries past the new reading are bracketed by `next`, and only
        // settle once `next` has left the window.
        let end = match &next {
            Some(n) if now - n.timestamp > settings.window() => Bound::Excluded(n.timestamp),
            _ => Bound::Included(reading.timestamp),
        };

        let boundaries = boundaries_in(
            source.created_at,
            settings.checkpoint_interval(),
            start,
            end,
            self.max_boundaries_per_ingest,
        );
        if boundaries.is_empty() {
            return Ok(0);
        }

        let entry = self.series_entry(id);
        let (candidates, mut view) = {
            let series = entry.read();
            let mut candidates = Vec::with_capacity(boundaries.len());
            for boundary in boundaries {
                let existing = series
                    .get(&boundary)
                    .map(|cp| cp.status(now, settings.window()));
                if existing == Some(CheckpointStatus::Finalized)
                    && self.policy == LateDataPolicy::Freeze
                {
                    bump(&self.counters.frozen_skips);
                    continue;
                }
                let value = value_between(prev.as_ref(), reading, next.as_ref(), boundary)?;
                candidates.push((new_checkpoint(id, boundary, value, now), existing.is_some()));
            }
            let view = neighbourhood(&series, &candidates);
            (candidates, view)
        };
        if candidates.is_empty() {
            return Ok(0);
        }

        // Validate against the series as it will be, not against the values
        // being replaced.
        let mut accepted = Vec::with_capacity(candidates.len());
        let mut dropped = Vec::new();
        for (checkpoint, existed) in candidates {
            if !fits_monotonic(&view, &checkpoint) {
                bump(&self.counters.rejected);
                warn!(
                    source = %id,
                    boundary = %checkpoint.timestamp,
                    value = checkpoint.cumulative_energy,
                    "Checkpoint would break counter monotonicity, not cached"
                );
                if existed {
                    dropped.push(checkpoint.timestamp);
                }
                continue;
            }

            if existed {
                bump(&self.counters.refreshed);
            } else {
                bump(&self.counters.created);
            }
            view.insert(checkpoint.timestamp, checkpoint.clone());
            accepted.push(checkpoint);
        }

        let written = accepted.len();
        if written > 0 || !dropped.is_empty() {
            let mut series = entry.write();
            for boundary in &dropped {
                series.remove(boundary);
            }
            for checkpoint in accepted {
                series.insert(checkpoint.timestamp, checkpoint);
            }
            debug!(source = %id, written, dropped = dropped.len(), "Checkpoints updated");
        }
        Ok(written)
    }
}

async fn cold(
    store: &dyn ReadingStore,
    id: &SourceId,
    t: DateTime<Utc>,
) -> EngineResult<CounterRead> {
    let value = straddle::interpolate_at(store, id, t, ReadingField::CumulativeEnergy).await?;
    Ok(CounterRead {
        value,
        pending: None,
    })
}

/// Interpolate from a checkpoint, scanning only readings in `(boundary, t]`.
async fn from_checkpoint(
    store: &dyn ReadingStore,
    checkpoint: &Checkpoint,
    t: DateTime<Utc>,
) -> EngineResult<WattHours> {
    if t == checkpoint.timestamp {
        return Ok(checkpoint.cumulative_energy);
    }

    let field = ReadingField::CumulativeEnergy;
    let id = &checkpoint.source;
    let recent = store
        .range(id, ReadingWindow::after_until(checkpoint.timestamp, t), field)
        .await?;

    let before = recent
        .last()
        .cloned()
        .unwrap_or_else(|| checkpoint.as_reading());
    if before.timestamp == t {
        return Straddle::exact(field, before).interpolate();
    }

    let after = store
        .nearest_after(id, t, field)
        .await?
        .ok_or_else(|| EngineError::OutOfRange {
            source_id: id.clone(),
            at: t,
        })?;
    Straddle::new(field, before, after, t)?.interpolate()
}

fn new_checkpoint(
    id: &SourceId,
    boundary: DateTime<Utc>,
    value: WattHours,
    now: DateTime<Utc>,
) -> Checkpoint {
    Checkpoint {
        source: id.clone(),
        timestamp: boundary,
        cumulative_energy: value,
        computed_at: now,
    }
}

/// Counter value at `boundary` given the neighbours of a freshly inserted reading.
fn value_between(
    prev: Option<&Reading>,
    reading: &Reading,
    next: Option<&Reading>,
    boundary: DateTime<Utc>,
) -> EngineResult<WattHours> {
    let field = ReadingField::CumulativeEnergy;
    let out_of_range = || EngineError::OutOfRange {
        source_id: reading.source.clone(),
        at: boundary,
    };

    if boundary == reading.timestamp {
        Straddle::exact(field, reading.clone()).interpolate()
    } else if boundary < reading.timestamp {
        let prev = prev.ok_or_else(out_of_range)?;
        Straddle::new(field, prev.clone(), reading.clone(), boundary)?.interpolate()
    } else {
        let next = next.ok_or_else(out_of_range)?;
        Straddle::new(field, reading.clone(), next.clone(), boundary)?.interpolate()
    }
}

/// The part of `series` that candidates are validated against: checkpoints
/// kept inside the candidates' span plus the nearest one on either side.
fn neighbourhood(series: &Series, candidates: &[(Checkpoint, bool)]) -> Series {
    let (Some((first, _)), Some((last, _))) = (candidates.first(), candidates.last()) else {
        return Series::new();
    };
    let (first, last) = (first.timestamp, last.timestamp);
    let replaced = candidates
        .iter()
        .map(|(cp, _)| cp.timestamp)
        .collect::<BTreeSet<_>>();

    let mut view = Series::new();
    let outer = series
        .range(..first)
        .next_back()
        .into_iter()
        .chain(series.range((Bound::Excluded(last), Bound::Unbounded)).next());
    let kept = series
        .range(first..=last)
        .filter(|(boundary, _)| !replaced.contains(*boundary));
    for (boundary, checkpoint) in outer.chain(kept) {
        view.insert(*boundary, checkpoint.clone());
    }
    view
}

/// Whether `checkpoint` keeps the series non-decreasing in energy.
fn fits_monotonic(series: &Series, checkpoint: &Checkpoint) -> bool {
    let at = checkpoint.timestamp;
    let below = series.range(..at).next_back().map(|(_, cp)| cp);
    let above = series
        .range((Bound::Excluded(at), Bound::Unbounded))
        .next()
        .map(|(_, cp)| cp);

    below.map_or(true, |cp| cp.cumulative_energy <= checkpoint.cumulative_energy)
        && above.map_or(true, |cp| cp.cumulative_energy >= checkpoint.cumulative_energy)
}

/// Latest boundary at or before `t`, or `None` before the anchor.
pub fn boundary_at_or_before(
    anchor: DateTime<Utc>,
    interval: Duration,
    t: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let interval_ms = interval.num_milliseconds();
    if t < anchor || interval_ms <= 0 {
        return None;
    }
    let offset = (t - anchor).num_milliseconds();
    Some(anchor + Duration::milliseconds(offset - offset.rem_euclid(interval_ms)))
}

/// Earliest boundary at or after `t`.
fn boundary_at_or_after(
    anchor: DateTime<Utc>,
    interval: Duration,
    t: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if t <= anchor {
        return Some(anchor);
    }
    let floor = boundary_at_or_before(anchor, interval, t)?;
    if floor == t {
        Some(floor)
    } else {
        floor.checked_add_signed(interval)
    }
}

/// Boundaries inside `(start, end)` bounds, at most `cap` of them.
fn boundaries_in(
    anchor: DateTime<Utc>,
    interval: Duration,
    start: Bound<DateTime<Utc>>,
    end: Bound<DateTime<Utc>>,
    cap: usize,
) -> Vec<DateTime<Utc>> {
    let first = match start {
        Bound::Included(s) => boundary_at_or_after(anchor, interval, s),
        Bound::Excluded(s) => boundary_at_or_after(anchor, interval, s).and_then(|b| {
            if b == s {
                b.checked_add_signed(interval)
            } else {
                Some(b)
            }
        }),
        Bound::Unbounded => Some(anchor),
    };
    let Some(mut boundary) = first else {
        return Vec::new();
    };

    let window = ReadingWindow { start, end };
    let mut out = Vec::new();
    while out.len() < cap && window.contains(boundary) {
        out.push(boundary);
        match boundary.checked_add_signed(interval) {
            Some(next) => boundary = next,
            None => break,
        }
    }
    out
}
