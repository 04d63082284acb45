//! Ride aggregate, locations and timestamps
use crate::error::DispatchError;
use crate::utils;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum RideStatus {
    #[n(0)]
    Requested,
    #[n(1)]
    Accepted,
    #[n(2)]
    InProgress,
    #[n(3)]
    Completed,
    #[n(4)]
    Cancelled,
}

impl RideStatus {
    pub const ALL: [RideStatus; 5] = [
        RideStatus::Requested,
        RideStatus::Accepted,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RideStatus::Requested => "Requested",
            RideStatus::Accepted => "Accepted",
            RideStatus::InProgress => "InProgress",
            RideStatus::Completed => "Completed",
            RideStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Decimal degrees.
#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    #[n(0)]
    pub lat: f64,
    #[n(1)]
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(DispatchError::InvalidRequest(format!(
                "coordinate ({}, {}) is not finite",
                self.lat, self.lng
            )));
        }
        if self.lat.abs() > 90.0 || self.lng.abs() > 180.0 {
            return Err(DispatchError::InvalidRequest(format!(
                "coordinate ({}, {}) is out of range",
                self.lat, self.lng
            )));
        }
        Ok(())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq)]
pub struct Location {
    #[n(0)]
    pub address: String,
    #[n(1)]
    pub coordinate: Coordinate,
}

impl Location {
    pub fn new(address: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            address: address.into(),
            coordinate: Coordinate::new(lat, lng),
        }
    }
}

/// Money in whole cents. Never stored as a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fare(u64);

impl Fare {
    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }
    pub fn from_amount(amount: f64) -> Self {
        Self(utils::to_cents(amount))
    }
    pub fn cents(&self) -> u64 {
        self.0
    }
    pub fn amount(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Fare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Fare {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.amount())
    }
}

impl<C> minicbor::Encode<C> for Fare {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.u64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Fare {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Fare(d.u64()?))
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Default)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
            .unwrap_or_default()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl Serialize for TimeStamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// One transportation request, tracked from request to settlement.
///
/// Stored as CBOR under its id. `version` starts at zero and is bumped by the
/// store on every committed mutation.
#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq)]
pub struct Ride {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub rider_id: String,
    #[n(2)]
    pub driver_id: Option<String>,
    #[n(3)]
    pub pickup: Location,
    #[n(4)]
    pub destination: Location,
    #[n(5)]
    pub status: RideStatus,
    #[n(6)]
    pub estimated_fare: Fare,
    #[n(7)]
    pub final_fare: Option<Fare>,
    #[n(8)]
    pub requested_at: TimeStamp,
    #[n(9)]
    pub accepted_at: Option<TimeStamp>,
    #[n(10)]
    pub started_at: Option<TimeStamp>,
    #[n(11)]
    pub completed_at: Option<TimeStamp>,
    #[n(12)]
    pub cancelled_at: Option<TimeStamp>,
    #[n(13)]
    pub settled_at: Option<TimeStamp>,
    #[n(14)]
    pub version: u64,
}

impl Ride {
    /// A freshly requested ride with no driver bound.
    pub fn request(
        id: String,
        rider_id: String,
        pickup: Location,
        destination: Location,
        estimated_fare: Fare,
        requested_at: TimeStamp,
    ) -> Self {
        Self {
            id,
            rider_id,
            driver_id: None,
            pickup,
            destination,
            status: RideStatus::Requested,
            estimated_fare,
            final_fare: None,
            requested_at,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            settled_at: None,
            version: 0,
        }
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.rider_id == user_id || self.driver_id.as_deref() == Some(user_id)
    }

    /// The timestamp stamped when the ride entered `status`.
    pub fn timestamp_for(&self, status: RideStatus) -> Option<TimeStamp> {
        match status {
            RideStatus::Requested => Some(self.requested_at),
            RideStatus::Accepted => self.accepted_at,
            RideStatus::InProgress => self.started_at,
            RideStatus::Completed => self.completed_at,
            RideStatus::Cancelled => self.cancelled_at,
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, DispatchError> {
        minicbor::to_vec(self).map_err(|e| DispatchError::Encode(e.to_string()))
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DispatchError> {
        Ok(minicbor::decode(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Ride {
        Ride::request(
            "ride_test".into(),
            "rider_a".into(),
            Location::new("1 Pickup St", 51.5007, -0.1246),
            Location::new("2 Dropoff Rd", 51.5033, -0.1196),
            Fare::from_cents(1234),
            TimeStamp::new(),
        )
    }

    #[test]
    fn ride_record_encoding() {
        let mut original = sample();
        original.driver_id = Some("driver_b".into());
        original.status = RideStatus::Accepted;
        original.accepted_at = Some(TimeStamp::new());
        original.version = 3;

        let encoding = original.to_cbor().unwrap();
        let decoded = Ride::from_cbor(&encoding).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = Ride::from_cbor(&[0xff, 0x00, 0x13]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Infrastructure);
    }

    #[test]
    fn fare_displays_two_decimals() {
        assert_eq!(Fare::from_cents(250).to_string(), "2.50");
        assert_eq!(Fare::from_cents(2585).to_string(), "25.85");
        assert_eq!(Fare::from_amount(2.5).cents(), 250);
    }

    #[test]
    fn coordinates_out_of_range_are_rejected() {
        assert!(Coordinate::new(0.0, 0.0).validate().is_ok());
        assert!(Coordinate::new(90.5, 0.0).validate().is_err());
        assert!(Coordinate::new(0.0, -180.1).validate().is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn status_names_are_verbatim_on_the_wire() {
        let json = serde_json::to_string(&RideStatus::InProgress).unwrap();
        assert_eq!(json, "\"InProgress\"");
        assert!(RideStatus::Cancelled.is_terminal());
        assert!(!RideStatus::Accepted.is_terminal());
    }
}
