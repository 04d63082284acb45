//! Resolves drivers racing to claim the same ride.
//!
//! The decision is made by the store's conditional write, never by anything held
//! in this process, so claims arriving through different service instances are
//! arbitrated the same way. A claim that loses the write is final: it is reported
//! as `AlreadyClaimed` and not retried.

use crate::auth::Identity;
use crate::error::DispatchError;
use crate::machine;
use crate::ride::{Ride, RideStatus, TimeStamp};
use crate::store::{RideStore, UpdateOutcome};
use tracing::{debug, info};

pub struct AcceptanceArbiter<'a, S: RideStore> {
    store: &'a S,
}

impl<'a, S: RideStore> AcceptanceArbiter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn claim(&self, ride_id: &str, driver: &Identity) -> Result<Ride, DispatchError> {
        let ride = self
            .store
            .get(ride_id)?
            .ok_or_else(|| DispatchError::NotFound(ride_id.to_string()))?;

        if ride.status != RideStatus::Requested {
            return Err(DispatchError::AlreadyClaimed(ride_id.to_string()));
        }

        let claimed = machine::transition(&ride, RideStatus::Accepted, driver, TimeStamp::new())?;

        match self.store.conditional_update(ride.version, claimed)? {
            UpdateOutcome::Committed(ride) => {
                info!(ride_id, driver = %driver.user_id, version = ride.version, "ride claimed");
                Ok(ride)
            }
            UpdateOutcome::VersionMismatch => {
                let winner = self.store.get(ride_id)?.and_then(|r| r.driver_id);
                debug!(ride_id, driver = %driver.user_id, ?winner, "lost the claim race");
                Err(DispatchError::AlreadyClaimed(ride_id.to_string()))
            }
        }
    }
}
