//! Checkpoint cache behaviour observed through the engine.

use chrono::Duration;
use meterline_engine::{EngineConfig, LateDataPolicy};
use meterline_types::{Reading, SourceId};

use crate::common::{assert_close, at, cached_leaf, far_future, Harness};

const IRREGULAR: &[(i64, f64)] = &[
    (0, 0.0),
    (7, 35.0),
    (19, 200.0),
    (23, 210.0),
    (48, 480.0),
    (61, 500.0),
    (95, 1100.0),
    (130, 1400.0),
];

#[tokio::test]
async fn cached_and_uncached_counters_agree() {
    let cached = Harness::new(EngineConfig::default(), vec![cached_leaf("M", 1.0)], far_future()).await;
    let raw = Harness::new(EngineConfig::uncached(), vec![cached_leaf("M", 1.0)], far_future()).await;
    cached.energy_series("M", IRREGULAR).await;
    raw.energy_series("M", IRREGULAR).await;

    let id = SourceId::new("M");
    let ctx = cached.engine.context();
    for minute in (0..=130).step_by(3) {
        let fast = cached.engine.counter_at(&ctx, &id, at(minute)).await.unwrap();
        let cold = raw.engine.counter_at(&ctx, &id, at(minute)).await.unwrap();
        assert_close(fast, cold);
    }
    for (start, end) in [(0, 130), (5, 50), (22, 24), (60, 129)] {
        let fast = cached.engine.energy(&ctx, &id, at(start), at(end)).await.unwrap();
        let cold = raw.engine.energy(&ctx, &id, at(start), at(end)).await.unwrap();
        assert_close(fast, cold);
    }

    let stats = cached.engine.cache_stats();
    assert!(stats.hits > 0);
    assert!(!cached.engine.checkpoints(&id).is_empty());
    assert!(raw.engine.checkpoints(&id).is_empty());
    assert_eq!(raw.engine.cache_stats().hits, 0);
}

#[tokio::test]
async fn recent_corrections_are_visible() {
    let harness = Harness::new(EngineConfig::default(), vec![cached_leaf("M", 1.0)], at(120)).await;
    harness
        .energy_series("M", &[(0, 0.0), (40, 400.0), (100, 1000.0)])
        .await;

    let id = SourceId::new("M");
    let ctx = harness.engine.context();
    let before = harness.engine.counter_at(&ctx, &id, at(80)).await.unwrap();
    assert_close(before, 800.0);

    // Out of order, but still inside the window.
    harness
        .engine
        .ingest(Reading::new("M", at(70)).with_energy(650.0))
        .await
        .unwrap();
    let after = harness.engine.counter_at(&ctx, &id, at(80)).await.unwrap();
    assert_close(after, 650.0 + 350.0 / 3.0);

    assert!(harness.engine.cache_stats().window_bypasses >= 2);
}

#[tokio::test]
async fn readings_aging_out_of_the_window_become_cacheable() {
    let cached = Harness::new(EngineConfig::default(), vec![cached_leaf("M", 1.0)], at(30)).await;
    let raw = Harness::new(EngineConfig::uncached(), vec![cached_leaf("M", 1.0)], at(30)).await;
    let points = (0..=10)
        .map(|i| (i * 10 + i % 3, (i * i * 25) as f64))
        .collect::<Vec<_>>();
    cached.energy_series("M", &points).await;
    raw.energy_series("M", &points).await;

    let id = SourceId::new("M");
    assert!(cached.engine.checkpoints(&id).is_empty());

    cached.clock.advance(Duration::minutes(200));
    raw.clock.advance(Duration::minutes(200));

    let ctx = cached.engine.context();
    for _ in 0..2 {
        for minute in 0..=100 {
            let fast = cached.engine.counter_at(&ctx, &id, at(minute)).await.unwrap();
            let cold = raw.engine.counter_at(&ctx, &id, at(minute)).await.unwrap();
            assert_close(fast, cold);
        }
    }

    let checkpoints = cached.engine.checkpoints(&id);
    assert_eq!(checkpoints.len(), 11);
    assert!(checkpoints.iter().all(|cp| cp.computed_at == at(230)));
    let stats = cached.engine.cache_stats();
    assert!(stats.hits > 0);
    assert_eq!(stats.created, 11);
    assert_eq!(stats.window_bypasses, 0);
}

#[tokio::test]
async fn queries_fill_missing_checkpoints() {
    let harness = Harness::new(EngineConfig::default(), vec![cached_leaf("M", 1.0)], far_future()).await;
    harness
        .store
        .insert_raw(Reading::new("M", at(0)).with_energy(0.0))
        .await;
    harness
        .store
        .insert_raw(Reading::new("M", at(20)).with_energy(200.0))
        .await;

    let id = SourceId::new("M");
    assert!(harness.engine.checkpoints(&id).is_empty());

    let energy = harness
        .engine
        .energy(&harness.engine.context(), &id, at(5), at(15))
        .await
        .unwrap();
    assert_close(energy, 100.0);

    let cached = harness
        .engine
        .checkpoints(&id)
        .into_iter()
        .map(|cp| (cp.timestamp, cp.cumulative_energy))
        .collect::<Vec<_>>();
    assert_eq!(cached, vec![(at(0), 0.0), (at(10), 100.0)]);
    assert_eq!(harness.engine.cache_stats().created, 2);
}

async fn late_reading_under(policy: LateDataPolicy) -> (Harness, f64) {
    let config = EngineConfig::default().with_late_data_policy(policy);
    let harness = Harness::new(config, vec![cached_leaf("M", 1.0)], far_future()).await;
    harness.energy_series("M", &[(0, 0.0), (20, 200.0)]).await;

    let id = SourceId::new("M");
    assert_eq!(
        harness.engine.checkpoints(&id)[1].cumulative_energy,
        100.0
    );

    // Days late: the checkpoint at minute 10 is already finalized.
    harness
        .engine
        .ingest(Reading::new("M", at(5)).with_energy(80.0))
        .await
        .unwrap();

    let value = harness
        .engine
        .counter_at(&harness.engine.context(), &id, at(12))
        .await
        .unwrap();
    (harness, value)
}

#[tokio::test]
async fn finalized_checkpoints_freeze_by_default() {
    let (harness, value) = late_reading_under(LateDataPolicy::Freeze).await;
    let id = SourceId::new("M");

    assert_eq!(harness.engine.checkpoints(&id)[1].cumulative_energy, 100.0);
    assert_eq!(harness.engine.cache_stats().frozen_skips, 1);
    // Served from the frozen checkpoint at minute 10.
    assert_close(value, 120.0);
}

#[tokio::test]
async fn finalized_checkpoints_revise_when_configured() {
    let (harness, value) = late_reading_under(LateDataPolicy::Revise).await;
    let id = SourceId::new("M");

    assert_close(harness.engine.checkpoints(&id)[1].cumulative_energy, 120.0);
    assert_eq!(harness.engine.cache_stats().refreshed, 1);
    // Matches interpolation between the late reading and minute 20.
    assert_close(value, 80.0 + 120.0 * 7.0 / 15.0);
}

#[tokio::test]
async fn storage_failure_falls_back_to_raw_readings() {
    let harness = Harness::new(EngineConfig::default(), vec![cached_leaf("M", 1.0)], far_future()).await;
    harness
        .energy_series("M", &[(0, 0.0), (10, 100.0), (20, 250.0)])
        .await;

    harness.store.fail_ranges(true);
    let value = harness
        .engine
        .counter_at(&harness.engine.context(), &"M".into(), at(15))
        .await
        .unwrap();
    assert_close(value, 175.0);

    let stats = harness.engine.cache_stats();
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.hits, 0);
}

#[tokio::test]
async fn evicted_source_is_rebuilt_lazily() {
    let harness = Harness::new(EngineConfig::default(), vec![cached_leaf("M", 1.0)], far_future()).await;
    harness
        .energy_series("M", &[(0, 0.0), (10, 100.0), (20, 250.0)])
        .await;

    let id = SourceId::new("M");
    assert_eq!(harness.engine.evict_source(&id).await, 3);
    assert!(harness.engine.checkpoints(&id).is_empty());

    let value = harness
        .engine
        .counter_at(&harness.engine.context(), &id, at(15))
        .await
        .unwrap();
    assert_close(value, 175.0);
    assert_eq!(harness.engine.checkpoints(&id).len(), 1);
}
