//! Property-based tests for the ride lifecycle
//!
//! These walk rides into every reachable status (including cancellation at each
//! point it is allowed) and then throw every target status at them. The
//! transition table is small, but the interesting part is what a transition
//! does to the rest of the aggregate: exactly one new timestamp, driver binding,
//! final fare, and nothing at all on failure.

use proptest::prelude::*;
use ride_dispatch::{
    DispatchService, ErrorKind, Fare, Identity, Location, Ride, RideStatus, TimeStamp,
    config::DispatchConfig,
    machine,
    store::{RideStore, SledRideStore},
};
use tempfile::tempdir;

const RIDER: &str = "rider_prop";
const DRIVER: &str = "driver_prop";

fn requested() -> Ride {
    Ride::request(
        "ride_prop".into(),
        RIDER.into(),
        Location::new("A", 48.8566, 2.3522),
        Location::new("B", 48.8606, 2.3376),
        Fare::from_cents(777),
        TimeStamp::new_with(2025, 3, 1, 9, 0, 0),
    )
}

/// Whoever is allowed to ask for `target` on this ride, if anyone.
fn actor_for(target: RideStatus) -> Identity {
    match target {
        RideStatus::Cancelled => Identity::rider(RIDER),
        _ => Identity::driver(DRIVER),
    }
}

/// Drive a fresh ride into `status`. `cancel_from` picks where a cancelled ride
/// was cancelled.
fn ride_in(status: RideStatus, cancel_from: RideStatus) -> Ride {
    let path: Vec<RideStatus> = match status {
        RideStatus::Requested => vec![],
        RideStatus::Accepted => vec![RideStatus::Accepted],
        RideStatus::InProgress => vec![RideStatus::Accepted, RideStatus::InProgress],
        RideStatus::Completed => vec![
            RideStatus::Accepted,
            RideStatus::InProgress,
            RideStatus::Completed,
        ],
        RideStatus::Cancelled => {
            let mut prefix = match cancel_from {
                RideStatus::Accepted => vec![RideStatus::Accepted],
                RideStatus::InProgress => vec![RideStatus::Accepted, RideStatus::InProgress],
                _ => vec![],
            };
            prefix.push(RideStatus::Cancelled);
            prefix
        }
    };

    let mut ride = requested();
    for (minute, step) in path.into_iter().enumerate() {
        let at = TimeStamp::new_with(2025, 3, 1, 9, minute as u32 + 1, 0);
        ride = machine::transition(&ride, step, &actor_for(step), at).unwrap();
    }
    ride
}

fn stamped(ride: &Ride) -> usize {
    [
        ride.accepted_at,
        ride.started_at,
        ride.completed_at,
        ride.cancelled_at,
    ]
    .iter()
    .filter(|t| t.is_some())
    .count()
}

fn status_strategy() -> impl Strategy<Value = RideStatus> {
    prop::sample::select(RideStatus::ALL.to_vec())
}

fn cancel_point_strategy() -> impl Strategy<Value = RideStatus> {
    prop::sample::select(vec![
        RideStatus::Requested,
        RideStatus::Accepted,
        RideStatus::InProgress,
    ])
}

proptest! {
    /// Property: an allowed transition succeeds and stamps exactly one new
    /// timestamp; a disallowed one fails with InvalidTransition.
    #[test]
    fn prop_transition_matches_table(
        from in status_strategy(),
        to in status_strategy(),
        cancel_from in cancel_point_strategy(),
    ) {
        let ride = ride_in(from, cancel_from);
        let at = TimeStamp::new_with(2025, 3, 1, 10, 0, 0);
        let result = machine::transition(&ride, to, &actor_for(to), at);

        if machine::is_allowed(from, to) {
            let next = result.unwrap();
            prop_assert_eq!(next.status, to);
            prop_assert_eq!(stamped(&next), stamped(&ride) + 1);
            prop_assert_eq!(next.timestamp_for(to), Some(at));
            prop_assert_eq!(next.requested_at, ride.requested_at);
        } else {
            let err = result.unwrap_err();
            prop_assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        }
    }

    /// Property: terminal statuses admit nothing.
    #[test]
    fn prop_terminal_is_final(to in status_strategy(), cancel_from in cancel_point_strategy()) {
        for terminal in [RideStatus::Completed, RideStatus::Cancelled] {
            let ride = ride_in(terminal, cancel_from);
            prop_assert!(!machine::is_allowed(terminal, to));
            prop_assert!(machine::transition(&ride, to, &actor_for(to), TimeStamp::new()).is_err());
        }
    }

    /// Property: driver, final fare and timestamps agree with the status.
    #[test]
    fn prop_aggregate_invariants(status in status_strategy(), cancel_from in cancel_point_strategy()) {
        let ride = ride_in(status, cancel_from);

        match ride.status {
            RideStatus::Requested => prop_assert!(ride.driver_id.is_none()),
            RideStatus::Accepted | RideStatus::InProgress | RideStatus::Completed => {
                prop_assert_eq!(ride.driver_id.as_deref(), Some(DRIVER))
            }
            RideStatus::Cancelled => {}
        }
        prop_assert_eq!(ride.final_fare.is_some(), ride.status == RideStatus::Completed);
        prop_assert!(ride.timestamp_for(ride.status).is_some());
        prop_assert_eq!(ride.estimated_fare, Fare::from_cents(777));
    }

    /// Property: statuses only move forward along the graph.
    #[test]
    fn prop_no_path_leads_back_to_requested(from in status_strategy()) {
        prop_assert!(!machine::is_allowed(from, RideStatus::Requested));
    }
}

/// Every (from, to) pair against a real store: failures leave the record
/// byte-for-byte as it was.
#[test]
fn stored_ride_unchanged_by_rejected_transitions() {
    let temp_dir = tempdir().unwrap();
    let store = SledRideStore::open(temp_dir.path().join("grid.db")).unwrap();
    let service = DispatchService::new(store, &DispatchConfig::default());
    let rider = Identity::rider(RIDER);
    let driver = Identity::driver(DRIVER);

    for from in RideStatus::ALL {
        for to in RideStatus::ALL {
            let ride = service
                .request_ride(&rider, Location::new("A", 1.0, 1.0), Location::new("B", 1.0, 1.01))
                .unwrap();
            let steps: &[RideStatus] = match from {
                RideStatus::Requested => &[],
                RideStatus::Accepted => &[RideStatus::Accepted],
                RideStatus::InProgress => &[RideStatus::Accepted, RideStatus::InProgress],
                RideStatus::Completed => &[
                    RideStatus::Accepted,
                    RideStatus::InProgress,
                    RideStatus::Completed,
                ],
                RideStatus::Cancelled => &[RideStatus::Cancelled],
            };
            for step in steps {
                let who = if *step == RideStatus::Cancelled { &rider } else { &driver };
                service.set_status(&ride.id, *step, who).unwrap();
            }

            let before = service.store().get(&ride.id).unwrap().unwrap();
            let who = if to == RideStatus::Cancelled { &rider } else { &driver };
            let result = service.set_status(&ride.id, to, who);
            let after = service.store().get(&ride.id).unwrap().unwrap();

            if machine::is_allowed(from, to) {
                let updated = result.unwrap();
                assert_eq!(updated, after);
                assert_eq!(after.version, before.version + 1);
            } else {
                let kind = result.unwrap_err().kind();
                // accepting is a claim, and losing a claim reads as AlreadyClaimed
                let expected = if to == RideStatus::Accepted {
                    ErrorKind::AlreadyClaimed
                } else {
                    ErrorKind::InvalidTransition
                };
                assert_eq!(kind, expected, "{from} -> {to}");
                assert_eq!(before, after, "{from} -> {to}");
            }
        }
    }
}
