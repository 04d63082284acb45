//! Ride lifecycle transitions.
//!
//! ```text
//! Requested -> Accepted -> InProgress -> Completed
//!     \            \           \
//!      +------------+-----------+--> Cancelled
//! ```
//!
//! Completed and Cancelled are terminal. Everything here is synchronous and
//! side-effect free; persisting and announcing the result is the caller's job.

use crate::auth::{Identity, Role};
use crate::error::DispatchError;
use crate::ride::{Ride, RideStatus, TimeStamp};

/// The transition table. Exhaustive on purpose so a new status forces a decision here.
pub fn is_allowed(from: RideStatus, to: RideStatus) -> bool {
    use RideStatus::*;

    match (from, to) {
        (Requested, Accepted) => true,
        (Accepted, InProgress) => true,
        (InProgress, Completed) => true,
        (Requested | Accepted | InProgress, Cancelled) => true,
        (Requested | Accepted | InProgress, Requested | Accepted | InProgress | Completed) => false,
        (Completed | Cancelled, _) => false,
    }
}

/// Checks that `actor` is a party to `ride` who may request `target`.
pub fn authorize(ride: &Ride, target: RideStatus, actor: &Identity) -> Result<(), DispatchError> {
    let user = actor.user_id.as_str();

    match actor.role {
        Role::Rider => {
            if ride.rider_id != user {
                return Err(DispatchError::unauthorized(
                    user,
                    format!("not the rider of ride {}", ride.id),
                ));
            }
            if target != RideStatus::Cancelled {
                return Err(DispatchError::unauthorized(
                    user,
                    format!("riders may not move ride {} to {target}", ride.id),
                ));
            }
        }
        Role::Driver => match ride.driver_id.as_deref() {
            Some(driver) if driver != user => {
                return Err(DispatchError::unauthorized(
                    user,
                    format!("not the assigned driver of ride {}", ride.id),
                ));
            }
            // an unbound driver may only claim
            None if target == RideStatus::Cancelled => {
                return Err(DispatchError::unauthorized(
                    user,
                    format!("only the rider can cancel unclaimed ride {}", ride.id),
                ));
            }
            _ => {}
        },
    }

    Ok(())
}

/// Validate and apply `target` to a copy of `ride`.
///
/// Sets the status and the one timestamp belonging to it. Accepting binds the
/// acting driver when none is bound yet; completing fixes the final fare at the
/// estimate until settlement reports otherwise. The version is left for the store
/// to advance.
pub fn transition(
    ride: &Ride,
    target: RideStatus,
    actor: &Identity,
    at: TimeStamp,
) -> Result<Ride, DispatchError> {
    authorize(ride, target, actor)?;

    if ride.status.is_terminal() || !is_allowed(ride.status, target) {
        return Err(DispatchError::InvalidTransition {
            ride_id: ride.id.clone(),
            from: ride.status,
            to: target,
        });
    }

    let mut next = ride.clone();
    next.status = target;

    match target {
        RideStatus::Accepted => {
            next.accepted_at = Some(at);
            if next.driver_id.is_none() {
                next.driver_id = Some(actor.user_id.clone());
            }
        }
        RideStatus::InProgress => next.started_at = Some(at),
        RideStatus::Completed => {
            next.completed_at = Some(at);
            next.final_fare = Some(ride.estimated_fare);
        }
        RideStatus::Cancelled => next.cancelled_at = Some(at),
        // unreachable: nothing transitions into Requested
        RideStatus::Requested => {}
    }

    Ok(next)
}
