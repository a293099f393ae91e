//! Property tests: straddle interpolation over random reading pairs.

use chrono::Duration;
use meterline_engine::straddle;
use meterline_store::{InMemoryReadingStore, ReadingStore};
use meterline_types::{EngineError, Reading, ReadingField, SourceId, Straddle};
use proptest::prelude::*;

use crate::common::at;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Two readings at `t0 < t1` minutes with arbitrary values.
fn arb_pair() -> impl Strategy<Value = (i64, i64, f64, f64)> {
    (0i64..10_000, 1i64..5_000, -1e6f64..1e6, -1e6f64..1e6)
        .prop_map(|(t0, gap, v0, v1)| (t0, t0 + gap, v0, v1))
}

fn energy_reading(minute: i64, value: f64) -> Reading {
    Reading::new("p", at(minute)).with_energy(value)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// The interpolated value follows the line through both readings.
    #[test]
    fn interpolation_is_linear(
        (t0, t1, v0, v1) in arb_pair(),
        fraction in 0.0f64..=1.0,
    ) {
        let offset = ((t1 - t0) as f64 * fraction).round() as i64;
        let target = at(t0 + offset);
        let straddle = Straddle::new(
            ReadingField::CumulativeEnergy,
            energy_reading(t0, v0),
            energy_reading(t1, v1),
            target,
        )
        .unwrap();

        let value = straddle.interpolate().unwrap();
        let expected = v0 + (v1 - v0) * offset as f64 / (t1 - t0) as f64;
        prop_assert!((value - expected).abs() <= 1e-6 * (1.0 + expected.abs()));
        prop_assert!(value >= v0.min(v1) - 1e-6 && value <= v0.max(v1) + 1e-6);
    }

    /// A reading sitting on the target is returned unchanged.
    #[test]
    fn exact_hits_return_the_reading((t0, t1, v0, v1) in arb_pair()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryReadingStore::new();
            store.insert(energy_reading(t0, v0)).await.unwrap();
            store.insert(energy_reading(t1, v1)).await.unwrap();
            let id = SourceId::new("p");

            for (minute, value) in [(t0, v0), (t1, v1)] {
                let resolved = straddle::resolve(&store, &id, at(minute), ReadingField::CumulativeEnergy)
                    .await
                    .unwrap();
                assert!(resolved.is_exact());
                assert_eq!(resolved.interpolate().unwrap(), value);
            }
        });
    }

    /// Targets outside the readings are rejected, never extrapolated.
    #[test]
    fn outside_targets_are_out_of_range(
        (t0, t1, v0, v1) in arb_pair(),
        overshoot in 1i64..1_000,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryReadingStore::new();
            store.insert(energy_reading(t0, v0)).await.unwrap();
            store.insert(energy_reading(t1, v1)).await.unwrap();
            let id = SourceId::new("p");

            for target in [at(t0) - Duration::minutes(overshoot), at(t1) + Duration::minutes(overshoot)] {
                let result = straddle::interpolate_at(&store, &id, target, ReadingField::CumulativeEnergy).await;
                assert!(matches!(result, Err(EngineError::OutOfRange { .. })));
            }
        });
    }
}
