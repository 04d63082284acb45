//! Real-time event fan-out.
//!
//! Delivery is fire-and-forget: whoever is resolved from the channel at publish
//! time gets the event, nobody else ever will. A channel with no listeners is not
//! an error, and nothing is queued for connections that are gone.

use crate::auth::Role;
use crate::presence::{Channel, PresenceRegistry};
use crate::ride::{Coordinate, Fare, Ride, RideStatus, TimeStamp};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    NewRideAvailable {
        ride: Ride,
    },
    RideAccepted {
        ride_id: String,
        driver_id: String,
        ride: Ride,
    },
    RideStatusUpdated {
        ride_id: String,
        status: RideStatus,
        ride: Ride,
    },
    RideCompleted {
        ride_id: String,
        final_fare: Fare,
        ride: Ride,
    },
    LocationUpdated {
        ride_id: String,
        user_id: String,
        role: Role,
        coordinate: Coordinate,
        at: TimeStamp,
    },
    DriverLocationUpdated {
        driver_id: String,
        coordinate: Coordinate,
        at: TimeStamp,
    },
}

impl DispatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::NewRideAvailable { .. } => "new_ride_available",
            DispatchEvent::RideAccepted { .. } => "ride_accepted",
            DispatchEvent::RideStatusUpdated { .. } => "ride_status_updated",
            DispatchEvent::RideCompleted { .. } => "ride_completed",
            DispatchEvent::LocationUpdated { .. } => "location_updated",
            DispatchEvent::DriverLocationUpdated { .. } => "driver_location_updated",
        }
    }

    /// The ride this event is about. Driver positions belong to no ride.
    pub fn ride_id(&self) -> Option<&str> {
        match self {
            DispatchEvent::NewRideAvailable { ride } => Some(&ride.id),
            DispatchEvent::RideAccepted { ride_id, .. }
            | DispatchEvent::RideStatusUpdated { ride_id, .. }
            | DispatchEvent::RideCompleted { ride_id, .. }
            | DispatchEvent::LocationUpdated { ride_id, .. } => Some(ride_id),
            DispatchEvent::DriverLocationUpdated { .. } => None,
        }
    }
}

/// One event as it arrives in a connection's inbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery {
    pub channel: Channel,
    #[serde(flatten)]
    pub event: DispatchEvent,
}

impl Delivery {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<PresenceRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// Send `event` to every connection currently on `channel`. Returns how many
    /// inboxes accepted it.
    pub fn publish(&self, channel: &Channel, event: &DispatchEvent) -> usize {
        let recipients = self.registry.resolve(channel);
        if recipients.is_empty() {
            trace!(%channel, event = event.name(), "no listeners");
            return 0;
        }

        let mut delivered = 0;
        for connection_id in recipients {
            // the connection may have gone between resolve and send
            let Some(outbox) = self.registry.outbox(&connection_id) else {
                continue;
            };
            let delivery = Delivery {
                channel: channel.clone(),
                event: event.clone(),
            };
            if outbox.send(delivery).is_err() {
                debug!(connection = %connection_id, %channel, "inbox closed, dropping event");
                continue;
            }
            delivered += 1;
        }

        debug!(
            %channel,
            event = event.name(),
            ride_id = event.ride_id(),
            delivered,
            "published"
        );
        delivered
    }

    /// Publish to the rider and, once bound, the driver of `ride`.
    pub fn publish_to_parties(&self, ride: &Ride, event: &DispatchEvent) -> usize {
        let mut delivered = self.publish(&Channel::User(ride.rider_id.clone()), event);
        if let Some(driver_id) = &ride.driver_id {
            delivered += self.publish(&Channel::User(driver_id.clone()), event);
        }
        delivered
    }
}
