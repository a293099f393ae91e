//! Meter Engine - query facade over the store, the source graph and the
//! checkpoint cache.
//!
//! Leaf quantities come from straddle interpolation (power) or counter
//! differences (energy). Virtual quantities are sums over the flattened leaves
//! in traversal order. Carbon is computed per leaf with the leaf's own
//! intensity before summing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use meterline_store::{ReadingStore, SourceCatalog};
use meterline_types::{
    Checkpoint, EngineError, EngineResult, PoundsCo2, Reading, ReadingField, Source, SourceId,
    WattHours, Watts,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::checkpoint::{CacheStats, CheckpointCache};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::context::QueryContext;
use crate::graph::{FlatLeaf, SourceGraph};
use crate::straddle;

/// Upper bound on buckets a single profile query may produce.
pub const MAX_PROFILE_BUCKETS: usize = 100_000;

const WATT_HOURS_PER_MWH: f64 = 1e6;
const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Energy over one bucket of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalEnergy {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub energy: WattHours,
}

/// Energy, power and carbon queries over leaf and virtual sources.
pub struct MeterEngine {
    config: EngineConfig,
    graph: SourceGraph,
    store: Arc<dyn ReadingStore>,
    cache: CheckpointCache,
    clock: Arc<dyn Clock>,
}

impl MeterEngine {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn SourceCatalog>,
        store: Arc<dyn ReadingStore>,
    ) -> Self {
        let cache = CheckpointCache::new(&config);
        Self {
            config,
            graph: SourceGraph::new(catalog),
            store,
            cache,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock used for window and finalization decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn SourceCatalog> {
        self.graph.catalog()
    }

    pub fn store(&self) -> &Arc<dyn ReadingStore> {
        &self.store
    }

    /// A fresh query context carrying the configured timeout, if any.
    pub fn context(&self) -> QueryContext {
        match self.config.query_timeout() {
            Some(timeout) => QueryContext::new().with_timeout(timeout),
            None => QueryContext::new(),
        }
    }

    /// Instantaneous power of `id` at `t`.
    #[instrument(skip(self, ctx), fields(source = %id))]
    pub async fn power(
        &self,
        ctx: &QueryContext,
        id: &SourceId,
        t: DateTime<Utc>,
    ) -> EngineResult<Watts> {
        let leaves = ctx.run(self.graph.flatten(id)).await?;

        let mut total = 0.0;
        for flat in &leaves {
            total += ctx
                .run(straddle::interpolate_at(
                    self.store.as_ref(),
                    &flat.leaf.id,
                    t,
                    ReadingField::Power,
                ))
                .await?;
        }
        Ok(total)
    }

    /// Energy consumed (or generated) by `id` over `[start, end]`.
    #[instrument(skip(self, ctx), fields(source = %id))]
    pub async fn energy(
        &self,
        ctx: &QueryContext,
        id: &SourceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<WattHours> {
        check_interval(start, end)?;
        let now = self.clock.now();
        let leaves = ctx.run(self.graph.flatten(id)).await?;
        if start == end {
            return Ok(0.0);
        }

        let mut pending = Vec::new();
        let mut total = 0.0;
        for flat in &leaves {
            total += self
                .leaf_energy(ctx, &flat.leaf, start, end, now, &mut pending)
                .await?;
        }

        self.commit(pending).await;
        Ok(total)
    }

    /// Carbon emitted by `id` over `[start, end]`, summed per leaf.
    #[instrument(skip(self, ctx), fields(source = %id))]
    pub async fn carbon(
        &self,
        ctx: &QueryContext,
        id: &SourceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<PoundsCo2> {
        check_interval(start, end)?;
        let now = self.clock.now();
        let leaves = ctx.run(self.graph.flatten(id)).await?;
        if start == end {
            return Ok(0.0);
        }

        let mut pending = Vec::new();
        let mut total = 0.0;
        for flat in &leaves {
            let intensity = flat
                .leaf
                .carbon_intensity()
                .ok_or_else(|| EngineError::InvalidSource {
                    source_id: flat.leaf.id.clone(),
                    reason: "leaf has no carbon intensity".to_string(),
                })?;
            let energy = self
                .leaf_energy(ctx, &flat.leaf, start, end, now, &mut pending)
                .await?;
            total += energy / WATT_HOURS_PER_MWH * intensity;
        }

        self.commit(pending).await;
        Ok(total)
    }

    /// Mean power of `id` over `[start, end]`.
    pub async fn average_power(
        &self,
        ctx: &QueryContext,
        id: &SourceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Watts> {
        check_interval(start, end)?;
        if start == end {
            return Err(EngineError::BadInterval(
                "average power needs a non-empty interval".to_string(),
            ));
        }

        let energy = self.energy(ctx, id, start, end).await?;
        let hours = (end - start).num_milliseconds() as f64 / MILLIS_PER_HOUR;
        Ok(energy / hours)
    }

    /// Energy of `id` in consecutive `step` buckets from `start`; the last
    /// bucket is truncated at `end`.
    ///
    /// Reads raw readings with one range scan per leaf rather than the
    /// checkpoint cache.
    #[instrument(skip(self, ctx), fields(source = %id))]
    pub async fn energy_profile(
        &self,
        ctx: &QueryContext,
        id: &SourceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> EngineResult<Vec<IntervalEnergy>> {
        check_interval(start, end)?;
        if step < Duration::milliseconds(1) {
            return Err(EngineError::BadInterval(
                "profile step must be at least one millisecond".to_string(),
            ));
        }
        let leaves = ctx.run(self.graph.flatten(id)).await?;
        if start == end {
            return Ok(Vec::new());
        }

        let edges = bucket_edges(start, end, step)?;
        let mut buckets = edges
            .windows(2)
            .map(|pair| IntervalEnergy {
                start: pair[0],
                end: pair[1],
                energy: 0.0,
            })
            .collect::<Vec<_>>();

        for flat in &leaves {
            let list = ctx
                .run(straddle::resolve_list(
                    self.store.as_ref(),
                    &flat.leaf.id,
                    &edges,
                    ReadingField::CumulativeEnergy,
                ))
                .await?;
            let counters = list.values()?;
            for (bucket, pair) in buckets.iter_mut().zip(counters.windows(2)) {
                bucket.energy += pair[1] - pair[0];
            }
        }

        debug!(buckets = buckets.len(), leaves = leaves.len(), "Profile computed");
        Ok(buckets)
    }

    /// Cumulative energy counter of leaf `id` at `t`.
    pub async fn counter_at(
        &self,
        ctx: &QueryContext,
        id: &SourceId,
        t: DateTime<Utc>,
    ) -> EngineResult<WattHours> {
        let now = self.clock.now();
        let source = ctx.run(self.graph.resolve(id)).await?;
        if !source.is_leaf() {
            return Err(EngineError::InvalidSource {
                source_id: source.id,
                reason: "counters are only kept for leaf sources".to_string(),
            });
        }

        let read = ctx
            .run(self.cache.counter_at(self.store.as_ref(), &source, t, now))
            .await?;
        self.commit(read.pending.into_iter().collect()).await;
        Ok(read.value)
    }

    /// Store a reading and maintain the checkpoints it affects.
    #[instrument(skip(self, reading), fields(source = %reading.source, timestamp = %reading.timestamp))]
    pub async fn ingest(&self, reading: Reading) -> EngineResult<()> {
        let source = self.graph.resolve(&reading.source).await?;
        if !source.is_leaf() {
            return Err(EngineError::InvalidSource {
                source_id: source.id,
                reason: "readings can only be recorded for leaf sources".to_string(),
            });
        }

        let now = self.clock.now();
        let written = self
            .cache
            .ingest(self.store.as_ref(), &source, reading, now)
            .await?;
        if written > 0 {
            debug!(written, "Checkpoints maintained on ingest");
        }
        Ok(())
    }

    /// Leaves contributing to `id`, in summation order.
    pub async fn flatten(&self, id: &SourceId) -> EngineResult<Vec<FlatLeaf>> {
        self.graph.flatten(id).await
    }

    /// Forget every cached checkpoint of a source.
    pub async fn evict_source(&self, id: &SourceId) -> usize {
        let evicted = self.cache.evict(id).await;
        debug!(source = %id, evicted, "Evicted checkpoints");
        evicted
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Cached checkpoints of a leaf, oldest first.
    pub fn checkpoints(&self, id: &SourceId) -> Vec<Checkpoint> {
        self.cache.checkpoints(id)
    }

    async fn leaf_energy(
        &self,
        ctx: &QueryContext,
        leaf: &Source,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
        pending: &mut Vec<Checkpoint>,
    ) -> EngineResult<WattHours> {
        let store = self.store.as_ref();
        let from = ctx.run(self.cache.counter_at(store, leaf, start, now)).await?;
        let to = ctx.run(self.cache.counter_at(store, leaf, end, now)).await?;

        pending.extend(from.pending);
        pending.extend(to.pending);
        Ok(to.value - from.value)
    }

    async fn commit(&self, pending: Vec<Checkpoint>) {
        if pending.is_empty() {
            return;
        }
        let written = self.cache.commit(pending).await;
        if written > 0 {
            info!(written, "Checkpoints created from query");
        }
    }
}

fn check_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> EngineResult<()> {
    if start > end {
        return Err(EngineError::BadInterval(format!(
            "start {} is after end {}",
            start, end
        )));
    }
    Ok(())
}

fn bucket_edges(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
) -> EngineResult<Vec<DateTime<Utc>>> {
    let step_ms = step.num_milliseconds();
    let span_ms = (end - start).num_milliseconds();
    let buckets = span_ms / step_ms + i64::from(span_ms % step_ms != 0);
    if buckets > MAX_PROFILE_BUCKETS as i64 {
        return Err(EngineError::BadInterval(format!(
            "profile would produce {} buckets (limit {})",
            buckets, MAX_PROFILE_BUCKETS
        )));
    }

    let mut edges = vec![start];
    let mut edge = start;
    while edge < end {
        // A step reaching past the representable range just ends at `end`.
        edge = edge.checked_add_signed(step).map_or(end, |next| next.min(end));
        edges.push(edge);
    }
    Ok(edges)
}
