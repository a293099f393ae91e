//! Concurrent ingestion and queries against one engine.

use meterline_engine::{EngineConfig, LateDataPolicy};
use meterline_types::{Reading, SourceId};

use crate::common::{assert_close, at, cached_leaf, far_future, Harness};

fn monotone_series() -> Vec<(i64, f64)> {
    (0..=240)
        .step_by(4)
        .map(|minute| (minute, (minute * 12 + minute * minute / 9) as f64))
        .collect()
}

/// Deterministic shuffle so writers race on overlapping gaps.
fn scrambled(points: &[(i64, f64)]) -> Vec<(i64, f64)> {
    let n = points.len();
    (0..n).map(|i| points[(i * 37) % n]).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn out_of_order_writers_leave_a_consistent_cache() {
    let config = EngineConfig::default().with_late_data_policy(LateDataPolicy::Revise);
    let cached = Harness::new(config, vec![cached_leaf("M", 1.0)], far_future()).await;
    let raw = Harness::new(EngineConfig::uncached(), vec![cached_leaf("M", 1.0)], far_future()).await;

    let points = monotone_series();
    raw.energy_series("M", &points).await;

    let mut writers = Vec::new();
    for chunk in scrambled(&points).chunks(8) {
        let engine = cached.engine.clone();
        let chunk = chunk.to_vec();
        writers.push(tokio::spawn(async move {
            for (minute, energy) in chunk {
                engine
                    .ingest(Reading::new("M", at(minute)).with_energy(energy))
                    .await
                    .unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let id = SourceId::new("M");
    let checkpoints = cached.engine.checkpoints(&id);
    assert_eq!(checkpoints.len(), 25);
    assert!(checkpoints
        .windows(2)
        .all(|pair| pair[0].cumulative_energy <= pair[1].cumulative_energy));

    let ctx = cached.engine.context();
    for minute in (0..=240).step_by(5) {
        let fast = cached.engine.counter_at(&ctx, &id, at(minute)).await.unwrap();
        let cold = raw.engine.counter_at(&ctx, &id, at(minute)).await.unwrap();
        assert_close(fast, cold);
    }
    assert_eq!(cached.engine.cache_stats().rejected, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_run_alongside_writers() {
    let harness = Harness::new(
        EngineConfig::default(),
        vec![cached_leaf("A", 1.0), cached_leaf("B", 1.0)],
        far_future(),
    )
    .await;
    harness.energy_series("A", &[(0, 0.0), (600, 6000.0)]).await;

    let writer = {
        let engine = harness.engine.clone();
        tokio::spawn(async move {
            for minute in 0..200 {
                engine
                    .ingest(Reading::new("B", at(minute)).with_energy(minute as f64))
                    .await
                    .unwrap();
            }
        })
    };

    let mut readers = Vec::new();
    for offset in 0..4 {
        let engine = harness.engine.clone();
        readers.push(tokio::spawn(async move {
            let ctx = engine.context();
            for step in 0..50 {
                let start = at(offset * 10 + step);
                let end = start + chrono::Duration::minutes(100);
                let energy = engine.energy(&ctx, &"A".into(), start, end).await.unwrap();
                assert!((energy - 1000.0).abs() < 1e-6);
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    let energy = harness
        .engine
        .energy(&harness.engine.context(), &"B".into(), at(10), at(190))
        .await
        .unwrap();
    assert_close(energy, 180.0);
}
