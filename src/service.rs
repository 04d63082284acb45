//! Service layer API for ride dispatch operations
//!
//! Every mutation follows the same path: load, validate through the state
//! machine, persist with a conditional write, then publish synchronously. Because
//! publishing happens only after a commit, events for one ride leave in commit
//! order from any single caller, and each carries the ride version so clients can
//! drop a stale one.
use crate::arbiter::AcceptanceArbiter;
use crate::auth::{Identity, Role};
use crate::broadcast::{Broadcaster, DispatchEvent};
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::fare::{FareEstimate, FarePolicy};
use crate::machine;
use crate::presence::{Channel, Connection, PresenceRegistry};
use crate::ride::{Coordinate, Fare, Location, Ride, RideStatus, TimeStamp};
use crate::store::{RideStore, SledRideStore, UpdateOutcome};
use crate::utils;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DispatchService<S: RideStore = SledRideStore> {
    store: S,
    registry: Arc<PresenceRegistry>,
    broadcaster: Broadcaster,
    fares: FarePolicy,
    max_update_retries: u32,
}

impl DispatchService<SledRideStore> {
    /// Open the sled store named by `config`.
    pub fn open(config: &DispatchConfig) -> Result<Self, DispatchError> {
        let store = SledRideStore::open(&config.db_path)?;
        Ok(Self::new(store, config))
    }
}

impl<S: RideStore> DispatchService<S> {
    pub fn new(store: S, config: &DispatchConfig) -> Self {
        let registry = Arc::new(PresenceRegistry::new());
        Self {
            store,
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            fares: config.fare,
            max_update_retries: config.max_update_retries,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn load_ride(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        self.store
            .get(ride_id)?
            .ok_or_else(|| DispatchError::NotFound(ride_id.to_string()))
    }

    pub fn estimate_fare(
        &self,
        pickup: &Coordinate,
        destination: &Coordinate,
    ) -> Result<FareEstimate, DispatchError> {
        pickup.validate()?;
        destination.validate()?;
        Ok(self.fares.estimate(pickup, destination))
    }

    /// Create a ride for `rider` and announce it to listening drivers.
    pub fn request_ride(
        &self,
        rider: &Identity,
        pickup: Location,
        destination: Location,
    ) -> Result<Ride, DispatchError> {
        if rider.role != Role::Rider {
            return Err(DispatchError::unauthorized(
                &rider.user_id,
                "only riders can request rides",
            ));
        }

        let estimate = self.estimate_fare(&pickup.coordinate, &destination.coordinate)?;
        let ride = Ride::request(
            utils::new_uuid_to_bech32("ride_")?,
            rider.user_id.clone(),
            pickup,
            destination,
            estimate.fare,
            TimeStamp::new(),
        );
        self.store.create(&ride)?;

        info!(
            ride_id = %ride.id,
            rider = %ride.rider_id,
            distance_km = estimate.distance_km,
            fare = %ride.estimated_fare,
            "ride requested"
        );
        self.broadcaster.publish(
            &Channel::DriversListening,
            &DispatchEvent::NewRideAvailable { ride: ride.clone() },
        );

        Ok(ride)
    }

    /// Read a ride the caller is party to.
    pub fn get_ride(&self, ride_id: &str, actor: &Identity) -> Result<Ride, DispatchError> {
        let ride = self.load_ride(ride_id)?;
        if !ride.is_party(&actor.user_id) {
            return Err(DispatchError::unauthorized(
                &actor.user_id,
                format!("not a party to ride {ride_id}"),
            ));
        }
        Ok(ride)
    }

    /// Try to become the driver of a requested ride. At most one caller wins.
    pub fn claim_ride(&self, ride_id: &str, driver: &Identity) -> Result<Ride, DispatchError> {
        if driver.role != Role::Driver {
            return Err(DispatchError::unauthorized(
                &driver.user_id,
                "only drivers can claim rides",
            ));
        }

        let ride = AcceptanceArbiter::new(&self.store).claim(ride_id, driver)?;

        self.broadcaster.publish(
            &Channel::User(ride.rider_id.clone()),
            &DispatchEvent::RideAccepted {
                ride_id: ride.id.clone(),
                driver_id: driver.user_id.clone(),
                ride: ride.clone(),
            },
        );
        Ok(ride)
    }

    /// Move a ride along its lifecycle on behalf of `actor`.
    ///
    /// A driver accepting goes through the claim arbiter. Other transitions that
    /// lose a conditional write re-read and re-validate, since no business race is
    /// possible on them.
    pub fn set_status(
        &self,
        ride_id: &str,
        target: RideStatus,
        actor: &Identity,
    ) -> Result<Ride, DispatchError> {
        if target == RideStatus::Accepted && actor.role == Role::Driver {
            return self.claim_ride(ride_id, actor);
        }

        for attempt in 0..=self.max_update_retries {
            let ride = self.load_ride(ride_id)?;
            let next = machine::transition(&ride, target, actor, TimeStamp::new())?;

            match self.store.conditional_update(ride.version, next)? {
                UpdateOutcome::Committed(updated) => {
                    info!(
                        ride_id,
                        from = %ride.status,
                        to = %updated.status,
                        by = %actor.user_id,
                        version = updated.version,
                        "ride status changed"
                    );
                    self.announce_status(&updated);
                    return Ok(updated);
                }
                UpdateOutcome::VersionMismatch => {
                    debug!(ride_id, attempt, "status update raced, re-reading");
                }
            }
        }

        warn!(ride_id, retries = self.max_update_retries, "status update gave up");
        Err(DispatchError::VersionMismatch(ride_id.to_string()))
    }

    fn announce_status(&self, ride: &Ride) {
        self.broadcaster.publish_to_parties(
            ride,
            &DispatchEvent::RideStatusUpdated {
                ride_id: ride.id.clone(),
                status: ride.status,
                ride: ride.clone(),
            },
        );

        if ride.status.is_terminal() {
            let evicted = self.registry.close_channel(&Channel::Ride(ride.id.clone()));
            debug!(ride_id = %ride.id, evicted, "ride channel closed");

            if let Some(driver_id) = &ride.driver_id {
                match self.rider_follows_driver(&ride.rider_id, driver_id) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.registry
                            .leave_user(&ride.rider_id, &Channel::Driver(driver_id.clone()));
                    }
                    Err(e) => warn!(ride_id = %ride.id, error = %e, "could not check driver followers"),
                }
            }
        }
    }

    /// Whether `rider` has an active trip with `driver_id` at the wheel.
    fn rider_follows_driver(&self, rider: &str, driver_id: &str) -> Result<bool, DispatchError> {
        Ok(self.store.scan()?.into_iter().any(|ride| {
            ride.rider_id == rider
                && ride.driver_id.as_deref() == Some(driver_id)
                && matches!(ride.status, RideStatus::Accepted | RideStatus::InProgress)
        }))
    }

    /// Stream the caller's position to the other party of an active trip.
    pub fn update_location(
        &self,
        ride_id: &str,
        actor: &Identity,
        coordinate: Coordinate,
    ) -> Result<usize, DispatchError> {
        coordinate.validate()?;
        let ride = self.get_ride(ride_id, actor)?;

        if !matches!(ride.status, RideStatus::Accepted | RideStatus::InProgress) {
            return Err(DispatchError::InvalidRequest(format!(
                "ride {ride_id} is {} and not streaming locations",
                ride.status
            )));
        }

        Ok(self.broadcaster.publish(
            &Channel::Ride(ride.id.clone()),
            &DispatchEvent::LocationUpdated {
                ride_id: ride.id,
                user_id: actor.user_id.clone(),
                role: actor.role,
                coordinate,
                at: TimeStamp::new(),
            },
        ))
    }

    /// Publish where a driver is right now on `driver:<id>`, trip or not.
    pub fn update_driver_location(
        &self,
        driver: &Identity,
        coordinate: Coordinate,
    ) -> Result<usize, DispatchError> {
        if driver.role != Role::Driver {
            return Err(DispatchError::unauthorized(
                &driver.user_id,
                "only drivers report a driver position",
            ));
        }
        coordinate.validate()?;

        Ok(self.broadcaster.publish(
            &Channel::Driver(driver.user_id.clone()),
            &DispatchEvent::DriverLocationUpdated {
                driver_id: driver.user_id.clone(),
                coordinate,
                at: TimeStamp::new(),
            },
        ))
    }

    /// Payment collaborator callback: the charge for a completed ride settled.
    ///
    /// Fixes the final fare to what was settled and tells both parties. A repeated
    /// signal is ignored.
    pub fn record_settlement(&self, ride_id: &str, amount: Fare) -> Result<Ride, DispatchError> {
        for attempt in 0..=self.max_update_retries {
            let ride = self.load_ride(ride_id)?;

            if ride.status != RideStatus::Completed {
                return Err(DispatchError::InvalidTransition {
                    ride_id: ride.id,
                    from: ride.status,
                    to: RideStatus::Completed,
                });
            }
            if ride.settled_at.is_some() {
                debug!(ride_id, "settlement already recorded");
                return Ok(ride);
            }

            let mut next = ride.clone();
            next.final_fare = Some(amount);
            next.settled_at = Some(TimeStamp::new());

            match self.store.conditional_update(ride.version, next)? {
                UpdateOutcome::Committed(settled) => {
                    info!(ride_id, amount = %amount, "ride settled");
                    self.broadcaster.publish_to_parties(
                        &settled,
                        &DispatchEvent::RideCompleted {
                            ride_id: settled.id.clone(),
                            final_fare: amount,
                            ride: settled.clone(),
                        },
                    );
                    return Ok(settled);
                }
                UpdateOutcome::VersionMismatch => {
                    debug!(ride_id, attempt, "settlement raced, re-reading");
                }
            }
        }

        warn!(ride_id, retries = self.max_update_retries, "settlement gave up");
        Err(DispatchError::VersionMismatch(ride_id.to_string()))
    }

    /// Requested rides, newest first.
    pub fn list_available(&self) -> Result<Vec<Ride>, DispatchError> {
        let mut rides: Vec<Ride> = self
            .store
            .scan()?
            .into_iter()
            .filter(|ride| ride.status == RideStatus::Requested)
            .collect();
        rides.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(rides)
    }

    /// Rides where `user_id` is the rider (or driver, per `role`), newest first.
    pub fn list_for_user(
        &self,
        user_id: &str,
        role: Role,
        status: Option<RideStatus>,
    ) -> Result<Vec<Ride>, DispatchError> {
        let mut rides: Vec<Ride> = self
            .store
            .scan()?
            .into_iter()
            .filter(|ride| match role {
                Role::Rider => ride.rider_id == user_id,
                Role::Driver => ride.driver_id.as_deref() == Some(user_id),
            })
            .filter(|ride| status.is_none_or(|wanted| ride.status == wanted))
            .collect();
        rides.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(rides)
    }

    /// Register a live connection for `identity`.
    pub fn connect(&self, identity: &Identity) -> Result<Connection, DispatchError> {
        self.registry.connect(identity)
    }

    /// Join a channel by name, if the connection's user may listen on it.
    pub fn subscribe(&self, connection_id: &str, channel: &str) -> Result<bool, DispatchError> {
        let identity = self
            .registry
            .identity(connection_id)
            .ok_or_else(|| DispatchError::ConnectionNotFound(connection_id.to_string()))?;
        let channel: Channel = channel.parse()?;

        self.authorize_channel(&identity, &channel)?;
        let joined = self.registry.join(connection_id, channel.clone())?;

        // a trip can end between the check and the join; its eviction only
        // runs after the commit, so checking again here closes the gap
        if let Err(e) = self.authorize_channel(&identity, &channel) {
            self.registry.leave(connection_id, &channel).ok();
            return Err(e);
        }
        Ok(joined)
    }

    pub fn unsubscribe(&self, connection_id: &str, channel: &str) -> Result<bool, DispatchError> {
        let identity = self
            .registry
            .identity(connection_id)
            .ok_or_else(|| DispatchError::ConnectionNotFound(connection_id.to_string()))?;
        let channel: Channel = channel.parse()?;

        if channel == Channel::User(identity.user_id.clone()) {
            return Err(DispatchError::InvalidRequest(
                "a connection cannot leave its private channel".into(),
            ));
        }
        self.registry.leave(connection_id, &channel)
    }

    pub fn disconnect(&self, connection_id: &str) -> bool {
        self.registry.disconnect(connection_id)
    }

    fn authorize_channel(&self, identity: &Identity, channel: &Channel) -> Result<(), DispatchError> {
        let user = identity.user_id.as_str();

        match channel {
            Channel::User(owner) if owner != user => Err(DispatchError::unauthorized(
                user,
                format!("cannot listen on {channel}"),
            )),
            Channel::DriverPool | Channel::DriversListening if identity.role != Role::Driver => {
                Err(DispatchError::unauthorized(user, format!("{channel} is for drivers")))
            }
            Channel::Ride(ride_id) => {
                let ride = self.load_ride(ride_id)?;
                if !ride.is_party(user) {
                    return Err(DispatchError::unauthorized(
                        user,
                        format!("not a party to ride {ride_id}"),
                    ));
                }
                if ride.status.is_terminal() {
                    return Err(DispatchError::InvalidRequest(format!(
                        "ride {ride_id} is {} and its channel is closed",
                        ride.status
                    )));
                }
                Ok(())
            }
            Channel::Driver(driver_id) if driver_id != user => {
                if identity.role == Role::Rider && self.rider_follows_driver(user, driver_id)? {
                    return Ok(());
                }
                Err(DispatchError::unauthorized(
                    user,
                    format!("no active trip with {driver_id}"),
                ))
            }
            _ => Ok(()),
        }
    }
}
