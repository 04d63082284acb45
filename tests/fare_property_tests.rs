//! Property-based tests for fare estimation
//!
//! Fares are quoted to the rider up front and must be reproducible from stored coordinates,
//! so these focus on determinism and on the fare never dropping as a trip gets
//! longer.

use proptest::prelude::*;
use ride_dispatch::{Coordinate, Fare, fare::FarePolicy};

fn coordinate_strategy() -> impl Strategy<Value = Coordinate> {
    (-89.0f64..89.0, -179.0f64..179.0).prop_map(|(lat, lng)| Coordinate::new(lat, lng))
}

proptest! {
    /// Property: the same inputs always price the same.
    #[test]
    fn prop_estimate_is_deterministic(a in coordinate_strategy(), b in coordinate_strategy()) {
        let policy = FarePolicy::default();
        prop_assert_eq!(policy.estimate(&a, &b), policy.estimate(&a, &b));
    }

    /// Property: direction of travel does not change the price.
    #[test]
    fn prop_estimate_is_symmetric(a in coordinate_strategy(), b in coordinate_strategy()) {
        let policy = FarePolicy::default();
        prop_assert_eq!(policy.estimate(&a, &b).fare, policy.estimate(&b, &a).fare);
    }

    /// Property: nothing is ever cheaper than the base fare.
    #[test]
    fn prop_base_fare_is_the_floor(a in coordinate_strategy(), b in coordinate_strategy()) {
        let estimate = FarePolicy::default().estimate(&a, &b);
        prop_assert!(estimate.fare >= Fare::from_cents(250));
        prop_assert!(estimate.distance_km >= 0.0);
    }

    /// Property: going further north along a meridian never costs less.
    #[test]
    fn prop_fare_non_decreasing_in_distance(
        lat in -80.0f64..0.0,
        lng in -179.0f64..179.0,
        near in 0.0f64..40.0,
        extra in 0.0f64..40.0,
    ) {
        let policy = FarePolicy::default();
        let origin = Coordinate::new(lat, lng);
        let short = policy.estimate(&origin, &Coordinate::new(lat + near, lng));
        let long = policy.estimate(&origin, &Coordinate::new(lat + near + extra, lng));

        prop_assert!(short.distance_km <= long.distance_km + 1e-9);
        prop_assert!(short.fare <= long.fare);
    }
}

#[test]
fn reference_points() {
    let policy = FarePolicy::default();
    let origin = Coordinate::new(0.0, 0.0);

    let still = policy.estimate(&origin, &origin);
    assert_eq!(still.fare.to_string(), "2.50");

    let tenth = policy.estimate(&origin, &Coordinate::new(0.0, 0.1));
    assert!(tenth.fare > still.fare);
    assert_eq!(tenth.fare.to_string(), "25.85");
}
