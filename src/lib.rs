//! Ride dispatch and lifecycle coordination.
//!
//! A rider requests a trip, listening drivers hear about it, exactly one driver
//! claims it, and both parties follow it live until it is settled.

pub mod arbiter;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod fare;
pub mod logging;
pub mod machine;
pub mod presence;
pub mod ride;
pub mod service;
pub mod store;
pub mod utils;

pub use auth::{Identity, Role};
pub use error::{DispatchError, ErrorKind};
pub use ride::{Coordinate, Fare, Location, Ride, RideStatus, TimeStamp};
pub use service::DispatchService;
