//! The taxi ride schema: typed rides, and the rules that turn a [`RawRecord`] into one.
//!
//! Validation short-circuits: the first violated rule is the only one reported.
//! Rules run in this order:
//!
//! 1. pickup and dropoff timestamps parse
//! 2. dropoff is not before pickup
//! 3. `passenger_count` is absent or in `[0, 10)`
//! 4. `trip_distance` and `fare_amount` are present and `>= 0`
//! 5. both location ids are present integers

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;

use crate::record::{RawRecord, RawValue};

pub const PICKUP_TIME: &str = "tpep_pickup_datetime";
pub const DROPOFF_TIME: &str = "tpep_dropoff_datetime";
pub const PASSENGER_COUNT: &str = "passenger_count";
pub const TRIP_DISTANCE: &str = "trip_distance";
pub const FARE_AMOUNT: &str = "fare_amount";
pub const PICKUP_LOCATION_ID: &str = "PULocationID";
pub const DROPOFF_LOCATION_ID: &str = "DOLocationID";

/// Every column a source has to provide, in wire order.
pub const COLUMNS: [&str; 7] = [
    PICKUP_TIME,
    DROPOFF_TIME,
    PASSENGER_COUNT,
    TRIP_DISTANCE,
    FARE_AMOUNT,
    PICKUP_LOCATION_ID,
    DROPOFF_LOCATION_ID,
];

const MAX_PASSENGERS: i64 = 10;

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    MissingOrMalformed,
    OutOfRange,
    TemporalOrder,
}

impl ValidationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorKind::MissingOrMalformed => "missing_or_malformed",
            ValidationErrorKind::OutOfRange => "out_of_range",
            ValidationErrorKind::TemporalOrder => "temporal_order",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} is missing or malformed")]
    MissingOrMalformed { field: &'static str },
    #[error("{field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
    #[error("dropoff time {dropoff} is before pickup time {pickup}")]
    TemporalOrder {
        pickup: NaiveDateTime,
        dropoff: NaiveDateTime,
    },
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            ValidationError::MissingOrMalformed { .. } => ValidationErrorKind::MissingOrMalformed,
            ValidationError::OutOfRange { .. } => ValidationErrorKind::OutOfRange,
            ValidationError::TemporalOrder { .. } => ValidationErrorKind::TemporalOrder,
        }
    }

    /// The offending column, when a single column is to blame.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::MissingOrMalformed { field }
            | ValidationError::OutOfRange { field, .. } => Some(*field),
            ValidationError::TemporalOrder { .. } => None,
        }
    }
}

/// A ride that passed every schema rule. Only [`validate`] builds one, so holding a
/// `ValidatedRide` means its invariants hold.
///
/// Serializes to the wire format consumers read, keys and casing included.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidatedRide {
    #[serde(rename = "tpep_pickup_datetime")]
    pickup_time: NaiveDateTime,
    #[serde(rename = "tpep_dropoff_datetime")]
    dropoff_time: NaiveDateTime,
    passenger_count: Option<u8>,
    trip_distance: f64,
    fare_amount: f64,
    #[serde(rename = "PULocationID")]
    pickup_location_id: i64,
    #[serde(rename = "DOLocationID")]
    dropoff_location_id: i64,
}

impl ValidatedRide {
    pub fn pickup_time(&self) -> NaiveDateTime {
        self.pickup_time
    }

    pub fn dropoff_time(&self) -> NaiveDateTime {
        self.dropoff_time
    }

    pub fn passenger_count(&self) -> Option<u8> {
        self.passenger_count
    }

    pub fn trip_distance(&self) -> f64 {
        self.trip_distance
    }

    pub fn fare_amount(&self) -> f64 {
        self.fare_amount
    }

    pub fn pickup_location_id(&self) -> i64 {
        self.pickup_location_id
    }

    pub fn dropoff_location_id(&self) -> i64 {
        self.dropoff_location_id
    }
}

impl From<&ValidatedRide> for RawRecord {
    fn from(ride: &ValidatedRide) -> Self {
        RawRecord::new()
            .with(PICKUP_TIME, ride.pickup_time)
            .with(DROPOFF_TIME, ride.dropoff_time)
            .with(PASSENGER_COUNT, ride.passenger_count.map(i64::from))
            .with(TRIP_DISTANCE, ride.trip_distance)
            .with(FARE_AMOUNT, ride.fare_amount)
            .with(PICKUP_LOCATION_ID, ride.pickup_location_id)
            .with(DROPOFF_LOCATION_ID, ride.dropoff_location_id)
    }
}

pub fn validate(raw: &RawRecord) -> Result<ValidatedRide, ValidationError> {
    let pickup_time = required(raw, PICKUP_TIME, as_timestamp)?;
    let dropoff_time = required(raw, DROPOFF_TIME, as_timestamp)?;
    if dropoff_time < pickup_time {
        return Err(ValidationError::TemporalOrder {
            pickup: pickup_time,
            dropoff: dropoff_time,
        });
    }

    let passenger_count = passenger_count(raw)?;
    let trip_distance = non_negative(raw, TRIP_DISTANCE)?;
    let fare_amount = non_negative(raw, FARE_AMOUNT)?;
    let pickup_location_id = required(raw, PICKUP_LOCATION_ID, as_integer)?;
    let dropoff_location_id = required(raw, DROPOFF_LOCATION_ID, as_integer)?;

    Ok(ValidatedRide {
        pickup_time,
        dropoff_time,
        passenger_count,
        trip_distance,
        fare_amount,
        pickup_location_id,
        dropoff_location_id,
    })
}

/// Outcome of validating one batch. Both lists keep source order; rejections carry
/// the row's position within the batch.
#[derive(Debug, Default)]
pub struct BatchValidation {
    pub rides: Vec<ValidatedRide>,
    pub rejected: Vec<(usize, ValidationError)>,
}

pub fn validate_batch(rows: &[RawRecord]) -> BatchValidation {
    let mut outcome = BatchValidation::default();
    for (index, row) in rows.iter().enumerate() {
        match validate(row) {
            Ok(ride) => outcome.rides.push(ride),
            Err(err) => outcome.rejected.push((index, err)),
        }
    }
    outcome
}

fn required<T>(
    raw: &RawRecord,
    field: &'static str,
    coerce: fn(&RawValue) -> Option<T>,
) -> Result<T, ValidationError> {
    raw.get(field)
        .and_then(coerce)
        .ok_or(ValidationError::MissingOrMalformed { field })
}

fn non_negative(raw: &RawRecord, field: &'static str) -> Result<f64, ValidationError> {
    let value = required(raw, field, as_real)?;
    if value < 0.0 {
        return Err(ValidationError::OutOfRange {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn passenger_count(raw: &RawRecord) -> Result<Option<u8>, ValidationError> {
    let value = match raw.get(PASSENGER_COUNT) {
        None | Some(RawValue::Null) => return Ok(None),
        Some(RawValue::Float(f)) if f.is_nan() => return Ok(None),
        Some(value) => value,
    };
    let count = as_integer(value).ok_or(ValidationError::MissingOrMalformed {
        field: PASSENGER_COUNT,
    })?;
    if !(0..MAX_PASSENGERS).contains(&count) {
        return Err(ValidationError::OutOfRange {
            field: PASSENGER_COUNT,
            value: count.to_string(),
        });
    }
    // In range, so the conversion cannot fail
    Ok(u8::try_from(count).ok())
}

fn as_timestamp(value: &RawValue) -> Option<NaiveDateTime> {
    match value {
        RawValue::Timestamp(ts) => Some(*ts),
        RawValue::Str(s) => parse_timestamp(s.trim()),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

fn as_real(value: &RawValue) -> Option<f64> {
    let real = match value {
        RawValue::Float(f) => *f,
        RawValue::Int(i) => *i as f64,
        RawValue::Str(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    real.is_finite().then_some(real)
}

fn as_integer(value: &RawValue) -> Option<i64> {
    match value {
        RawValue::Int(i) => Some(*i),
        RawValue::Float(f) => integral(*f),
        RawValue::Str(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

// Columnar sources hand out nullable integer columns as doubles
fn integral(f: f64) -> Option<i64> {
    let in_range = f >= i64::MIN as f64 && f <= i64::MAX as f64;
    (f.is_finite() && f.fract() == 0.0 && in_range).then_some(f as i64)
}
