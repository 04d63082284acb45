//! Live connection registry.
//!
//! Maps connections to the channels they listen on. Each connection's entry holds
//! its own channel set, so joining, leaving and disconnecting each touch a single
//! map entry and a connection is never half registered. Nothing here is durable:
//! after a restart clients reconnect and subscribe again.

use crate::auth::{Identity, Role};
use crate::broadcast::Delivery;
use crate::error::DispatchError;
use crate::utils;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

pub type ConnectionId = String;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `user:<id>`, private to one user.
    User(String),
    /// `role:driver-pool`, every connected driver.
    DriverPool,
    /// `drivers-listening`, drivers who opted in to new-ride announcements.
    DriversListening,
    /// `ride:<id>`, the assigned rider and driver of one trip.
    Ride(String),
    /// `driver:<id>`, a driver's position outside any one trip.
    Driver(String),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::User(id) => write!(f, "user:{id}"),
            Channel::DriverPool => f.write_str("role:driver-pool"),
            Channel::DriversListening => f.write_str("drivers-listening"),
            Channel::Ride(id) => write!(f, "ride:{id}"),
            Channel::Driver(id) => write!(f, "driver:{id}"),
        }
    }
}

impl FromStr for Channel {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DispatchError::InvalidRequest(format!("unknown channel {s:?}"));

        match s {
            "role:driver-pool" => Ok(Channel::DriverPool),
            "drivers-listening" => Ok(Channel::DriversListening),
            _ => match s.split_once(':') {
                Some(("user", id)) if !id.is_empty() => Ok(Channel::User(id.to_string())),
                Some(("ride", id)) if !id.is_empty() => Ok(Channel::Ride(id.to_string())),
                Some(("driver", id)) if !id.is_empty() => Ok(Channel::Driver(id.to_string())),
                _ => Err(invalid()),
            },
        }
    }
}

impl serde::Serialize for Channel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug)]
pub struct PresenceEntry {
    pub identity: Identity,
    pub channels: HashSet<Channel>,
    outbox: UnboundedSender<Delivery>,
}

/// Handed to the transport when a connection registers. The transport's writer
/// task drains `inbox` onto the socket.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub inbox: UnboundedReceiver<Delivery>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    connections: DashMap<ConnectionId, PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and join its default channels.
    pub fn connect(&self, identity: &Identity) -> Result<Connection, DispatchError> {
        let id = utils::new_uuid_to_bech32("conn_")?;
        let (outbox, inbox) = mpsc::unbounded_channel();

        let mut channels = HashSet::from([Channel::User(identity.user_id.clone())]);
        if identity.role == Role::Driver {
            channels.insert(Channel::DriverPool);
        }

        self.connections.insert(
            id.clone(),
            PresenceEntry {
                identity: identity.clone(),
                channels,
                outbox,
            },
        );
        debug!(connection = %id, user = %identity.user_id, role = %identity.role, "connected");

        Ok(Connection { id, inbox })
    }

    /// Returns `false` if the connection was already a member.
    pub fn join(&self, connection_id: &str, channel: Channel) -> Result<bool, DispatchError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| DispatchError::ConnectionNotFound(connection_id.to_string()))?;
        Ok(entry.channels.insert(channel))
    }

    /// Returns `false` if the connection was not a member.
    pub fn leave(&self, connection_id: &str, channel: &Channel) -> Result<bool, DispatchError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| DispatchError::ConnectionNotFound(connection_id.to_string()))?;
        Ok(entry.channels.remove(channel))
    }

    /// Drop the connection from every channel at once.
    pub fn disconnect(&self, connection_id: &str) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        if removed {
            debug!(connection = %connection_id, "disconnected");
        }
        removed
    }

    /// Remove `channel` from every connection. Returns how many were members.
    pub fn close_channel(&self, channel: &Channel) -> usize {
        let mut evicted = 0;
        for mut entry in self.connections.iter_mut() {
            if entry.channels.remove(channel) {
                evicted += 1;
            }
        }
        evicted
    }

    /// Remove `channel` from every connection of one user.
    pub fn leave_user(&self, user_id: &str, channel: &Channel) -> usize {
        let mut evicted = 0;
        for mut entry in self.connections.iter_mut() {
            if entry.identity.user_id == user_id && entry.channels.remove(channel) {
                evicted += 1;
            }
        }
        evicted
    }

    pub fn resolve(&self, channel: &Channel) -> HashSet<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.channels.contains(channel))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn identity(&self, connection_id: &str) -> Option<Identity> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.identity.clone())
    }

    pub fn channels_of(&self, connection_id: &str) -> Option<HashSet<Channel>> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.channels.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn outbox(&self, connection_id: &str) -> Option<UnboundedSender<Delivery>> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.outbox.clone())
    }
}
