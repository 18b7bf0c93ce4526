//! Property-based tests for progress estimation.
//!
//! These tests drive the estimator with arbitrary status sequences and
//! check the guarantees displays rely on.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use policycalc_core::cache::CacheKey;
use policycalc_core::meta::CalcKind;
use policycalc_core::options::EngineConfig;
use policycalc_core::progress::{
    blend, server_percent, synthetic_percent, SyntheticProgressEstimator,
};
use policycalc_core::status::{CalculationStatus, ComputingInfo};

fn arb_kind() -> impl Strategy<Value = CalcKind> {
    prop_oneof![Just(CalcKind::Household), Just(CalcKind::Economy)]
}

fn arb_in_flight() -> impl Strategy<Value = CalculationStatus> {
    prop_oneof![
        Just(CalculationStatus::Pending),
        (
            proptest::option::of(0.0f64..100.0),
            proptest::option::of(0u64..2_000_000),
            proptest::option::of(1u32..50),
        )
            .prop_map(|(progress, remaining, queue)| {
                CalculationStatus::Computing(ComputingInfo {
                    progress,
                    estimated_time_remaining: remaining,
                    queue_position: queue,
                    ..ComputingInfo::default()
                })
            }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Reported progress never decreases for one calculation.
    #[test]
    fn progress_is_monotonic(
        kind in arb_kind(),
        steps in proptest::collection::vec((arb_in_flight(), 0u64..120_000), 1..40),
    ) {
        let estimator = SyntheticProgressEstimator::new(Arc::new(EngineConfig::default()));
        let key = CacheKey::new(kind, "prop");
        let mut elapsed = Duration::ZERO;
        let mut last = 0.0f64;
        for (status, step_ms) in steps {
            elapsed += Duration::from_millis(step_ms);
            let sample = estimator.estimate_at(&key, &status, elapsed);
            prop_assert!(sample.percent >= last, "{} < {}", sample.percent, last);
            prop_assert!(sample.percent <= 99.0, "in-flight reached {}", sample.percent);
            last = sample.percent;
        }
    }

    /// A fresh queued-only estimate stays under the queue cap.
    #[test]
    fn queue_only_respects_cap(kind in arb_kind(), position in 1u32..100, secs in 0u64..10_000) {
        let estimator = SyntheticProgressEstimator::new(Arc::new(EngineConfig::default()));
        let status = CalculationStatus::Computing(ComputingInfo {
            queue_position: Some(position),
            ..ComputingInfo::default()
        });
        let sample = estimator.estimate(kind, &status, Duration::from_secs(secs));
        prop_assert!((0.0..=20.0).contains(&sample.percent));
    }

    /// Blends stay inside [0, 99] for any inputs in range.
    #[test]
    fn blend_is_bounded(
        elapsed in 0u64..5_000,
        remaining in 0u64..5_000,
        expected in 1u64..1_000,
        weight in 0.0f64..=1.0,
    ) {
        let expected = Duration::from_secs(expected);
        let synthetic = synthetic_percent(Duration::from_secs(elapsed), expected);
        let server = server_percent(Duration::from_secs(remaining), expected);
        let mixed = blend(server, synthetic, weight);
        prop_assert!((0.0..=99.0).contains(&mixed));
    }
}

#[test]
fn terminal_after_in_flight_reaches_100() {
    let estimator = SyntheticProgressEstimator::new(Arc::new(EngineConfig::default()));
    let key = CacheKey::new(CalcKind::Economy, "done");
    estimator.estimate_at(&key, &CalculationStatus::computing(), Duration::from_secs(100));
    let done = estimator.estimate_at(
        &key,
        &CalculationStatus::Ok {
            result: serde_json::Value::Null,
        },
        Duration::from_secs(101),
    );
    assert!((done.percent - 100.0).abs() < f64::EPSILON);
    assert!(done.terminal);
}
