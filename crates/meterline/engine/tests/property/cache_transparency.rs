//! Property tests: the checkpoint cache never changes an answer.
//!
//! For counters older than the window, a cached engine and an uncached engine
//! fed the same readings must agree, whatever order the readings arrived in.

use meterline_engine::{EngineConfig, LateDataPolicy};
use meterline_types::SourceId;
use proptest::prelude::*;

use crate::common::{at, cached_leaf, far_future, Harness};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A non-decreasing energy series at irregular minutes.
fn arb_series() -> impl Strategy<Value = Vec<(i64, f64)>> {
    prop::collection::vec((1i64..45, 0.0f64..500.0), 2..40).prop_map(|steps| {
        let mut minute = 0;
        let mut energy = 0.0;
        let mut series = vec![(0, 0.0)];
        for (gap, delta) in steps {
            minute += gap;
            energy += delta;
            series.push((minute, energy));
        }
        series
    })
}

/// Series plus an arrival order for its readings.
fn arb_arrivals() -> impl Strategy<Value = (Vec<(i64, f64)>, Vec<(i64, f64)>)> {
    arb_series().prop_flat_map(|series| {
        let shuffled = Just(series.clone()).prop_shuffle();
        (Just(series), shuffled)
    })
}

fn check_agreement(arrivals: &[(i64, f64)], series: &[(i64, f64)], probes: &[u16]) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let config = EngineConfig::default().with_late_data_policy(LateDataPolicy::Revise);
        let cached = Harness::new(config, vec![cached_leaf("M", 1.0)], far_future()).await;
        let raw = Harness::new(EngineConfig::uncached(), vec![cached_leaf("M", 1.0)], far_future()).await;
        cached.energy_series("M", arrivals).await;
        raw.energy_series("M", series).await;

        let id = SourceId::new("M");
        let last = series.last().map(|&(minute, _)| minute).unwrap_or(0);
        let ctx = cached.engine.context();
        // Twice, so the second pass runs on checkpoints the first committed.
        for _ in 0..2 {
            for &probe in probes {
                let minute = i64::from(probe) % (last + 1);
                let fast = cached.engine.counter_at(&ctx, &id, at(minute)).await.unwrap();
                let cold = raw.engine.counter_at(&ctx, &id, at(minute)).await.unwrap();
                assert!(
                    (fast - cold).abs() < 1e-6,
                    "minute {minute}: cached {fast} vs raw {cold}"
                );
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// In-order ingestion: cached counters equal raw interpolation.
    #[test]
    fn cached_counters_match_raw(
        series in arb_series(),
        probes in prop::collection::vec(any::<u16>(), 1..30),
    ) {
        check_agreement(&series, &series, &probes);
    }

    /// Out-of-order ingestion with revision: still indistinguishable.
    #[test]
    fn shuffled_arrivals_match_raw(
        (series, arrivals) in arb_arrivals(),
        probes in prop::collection::vec(any::<u16>(), 1..30),
    ) {
        check_agreement(&arrivals, &series, &probes);
    }
}
