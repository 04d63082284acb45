//! Durable ride storage with compare-and-set updates.
//!
//! The store is the only arbiter of concurrent writers. Every update names the
//! version it was derived from and commits only if the stored record still
//! carries that version; sled's `compare_and_swap` makes the check and the write
//! one atomic step, so independent handles (or threads) racing on the same ride
//! see exactly one winner.

use crate::error::DispatchError;
use crate::ride::Ride;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const RIDES_TREE: &str = "rides";

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Committed(Ride),
    VersionMismatch,
}

pub trait RideStore: Send + Sync {
    fn get(&self, ride_id: &str) -> Result<Option<Ride>, DispatchError>;

    /// Insert a new ride. Fails rather than overwrite an existing id.
    fn create(&self, ride: &Ride) -> Result<(), DispatchError>;

    /// Replace the ride with `next` if the stored version equals `expected_version`.
    /// The committed record carries `expected_version + 1`.
    fn conditional_update(
        &self,
        expected_version: u64,
        next: Ride,
    ) -> Result<UpdateOutcome, DispatchError>;

    /// Every stored ride, in key order.
    fn scan(&self) -> Result<Vec<Ride>, DispatchError>;
}

#[derive(Clone)]
pub struct SledRideStore {
    instance: Arc<sled::Db>,
    rides: sled::Tree,
}

impl SledRideStore {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, DispatchError> {
        let rides = instance.open_tree(RIDES_TREE)?;
        Ok(Self { instance, rides })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let db = sled::open(path)?;
        Self::new(Arc::new(db))
    }

    pub fn flush(&self) -> Result<(), DispatchError> {
        self.instance.flush()?;
        Ok(())
    }
}

impl RideStore for SledRideStore {
    fn get(&self, ride_id: &str) -> Result<Option<Ride>, DispatchError> {
        match self.rides.get(ride_id.as_bytes())? {
            Some(bytes) => Ok(Some(Ride::from_cbor(&bytes)?)),
            None => Ok(None),
        }
    }

    fn create(&self, ride: &Ride) -> Result<(), DispatchError> {
        let encoded = ride.to_cbor()?;
        let swapped =
            self.rides
                .compare_and_swap(ride.id.as_bytes(), None as Option<&[u8]>, Some(encoded))?;

        if swapped.is_err() {
            return Err(DispatchError::InvalidRequest(format!(
                "ride {} already exists",
                ride.id
            )));
        }
        Ok(())
    }

    fn conditional_update(
        &self,
        expected_version: u64,
        mut next: Ride,
    ) -> Result<UpdateOutcome, DispatchError> {
        let key = next.id.clone();
        let Some(current_bytes) = self.rides.get(key.as_bytes())? else {
            return Err(DispatchError::NotFound(key));
        };

        let current = Ride::from_cbor(&current_bytes)?;
        if current.version != expected_version {
            debug!(
                ride_id = %key,
                expected_version,
                stored_version = current.version,
                "conditional update rejected before swap"
            );
            return Ok(UpdateOutcome::VersionMismatch);
        }

        next.version = expected_version + 1;
        let encoded = next.to_cbor()?;

        // the swap fails if anyone committed between our read and this write
        match self
            .rides
            .compare_and_swap(key.as_bytes(), Some(&current_bytes), Some(encoded))?
        {
            Ok(()) => Ok(UpdateOutcome::Committed(next)),
            Err(_) => {
                debug!(ride_id = %key, expected_version, "conditional update lost the swap");
                Ok(UpdateOutcome::VersionMismatch)
            }
        }
    }

    fn scan(&self) -> Result<Vec<Ride>, DispatchError> {
        let mut rides = Vec::new();
        for entry in self.rides.iter() {
            let (_, bytes) = entry?;
            rides.push(Ride::from_cbor(&bytes)?);
        }
        Ok(rides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ride::{Fare, Location, RideStatus, TimeStamp};
    use tempfile::tempdir;

    fn ride(id: &str) -> Ride {
        Ride::request(
            id.into(),
            "rider_1".into(),
            Location::new("A", 1.0, 1.0),
            Location::new("B", 1.0, 1.1),
            Fare::from_cents(900),
            TimeStamp::new(),
        )
    }

    #[test]
    fn create_then_get() {
        let temp_dir = tempdir().unwrap();
        let store = SledRideStore::open(temp_dir.path().join("create.db")).unwrap();

        store.create(&ride("ride_a")).unwrap();
        let loaded = store.get("ride_a").unwrap().unwrap();

        assert_eq!(loaded.version, 0);
        assert_eq!(loaded.status, RideStatus::Requested);
        assert!(store.get("ride_missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_create_is_refused() {
        let temp_dir = tempdir().unwrap();
        let store = SledRideStore::open(temp_dir.path().join("dup.db")).unwrap();

        store.create(&ride("ride_a")).unwrap();
        assert!(store.create(&ride("ride_a")).is_err());
    }

    #[test]
    fn stale_version_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = SledRideStore::open(temp_dir.path().join("cas.db")).unwrap();
        store.create(&ride("ride_a")).unwrap();

        let mut first = store.get("ride_a").unwrap().unwrap();
        first.status = RideStatus::Cancelled;
        let outcome = store.conditional_update(0, first).unwrap();
        assert!(matches!(outcome, UpdateOutcome::Committed(ref r) if r.version == 1));

        let mut stale = ride("ride_a");
        stale.status = RideStatus::Accepted;
        let outcome = store.conditional_update(0, stale).unwrap();
        assert_eq!(outcome, UpdateOutcome::VersionMismatch);

        let stored = store.get("ride_a").unwrap().unwrap();
        assert_eq!(stored.status, RideStatus::Cancelled);
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn updating_a_missing_ride_is_not_found() {
        let temp_dir = tempdir().unwrap();
        let store = SledRideStore::open(temp_dir.path().join("missing.db")).unwrap();

        let err = store.conditional_update(0, ride("ride_ghost")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
