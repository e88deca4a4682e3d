#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parquet::data_type::{DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

use taxi_publisher::record::RawRecord;
use taxi_publisher::ride::{self, ValidatedRide};
use taxi_publisher::sinks::{Ack, PublishError, RidePublisher};
use taxi_publisher::source::{RecordSource, SourceError, SourceRows};

pub fn pickup_time(n: usize) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::minutes(n as i64)
}

/// A valid row whose fare identifies it.
pub fn ride_row(n: usize) -> RawRecord {
    RawRecord::new()
        .with(ride::PICKUP_TIME, pickup_time(n))
        .with(ride::DROPOFF_TIME, pickup_time(n) + chrono::Duration::minutes(12))
        .with(ride::PASSENGER_COUNT, 1.0)
        .with(ride::TRIP_DISTANCE, 2.5)
        .with(ride::FARE_AMOUNT, n as f64)
        .with(ride::PICKUP_LOCATION_ID, 161_i64)
        .with(ride::DROPOFF_LOCATION_ID, 236_i64)
}

pub fn ride_rows(count: usize) -> Vec<RawRecord> {
    (0..count).map(ride_row).collect()
}

pub struct VecSource {
    rows: Vec<RawRecord>,
    reads: AtomicUsize,
}

impl VecSource {
    pub fn new(rows: Vec<RawRecord>) -> Self {
        Self {
            rows,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for VecSource {
    async fn read(&self) -> Result<SourceRows, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(SourceRows::from_records(self.rows.clone()))
    }

    fn location(&self) -> &str {
        "memory://rides"
    }
}

pub struct FailingSource;

#[async_trait]
impl RecordSource for FailingSource {
    async fn read(&self) -> Result<SourceRows, SourceError> {
        Err(SourceError::Unavailable("connection refused".to_string()))
    }

    fn location(&self) -> &str {
        "memory://unreachable"
    }
}

/// Yields `good` rows, then a decoding error.
pub struct InterruptedSource {
    pub good: usize,
}

#[async_trait]
impl RecordSource for InterruptedSource {
    async fn read(&self) -> Result<SourceRows, SourceError> {
        let good = self.good;
        let rows = (0..good).map(|n| Ok(ride_row(n))).chain(std::iter::once(Err(
            SourceError::Row {
                index: good,
                reason: "corrupt page".to_string(),
            },
        )));
        Ok(SourceRows::new(Some(good * 2), Box::new(rows)))
    }

    fn location(&self) -> &str {
        "memory://corrupt"
    }
}

/// Records what it is asked to publish. Attempts listed in `fail_on` (0-based) are
/// rejected, and every publish can be made to take `delay`.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<ValidatedRide>>>,
    attempts: Arc<AtomicUsize>,
    fail_on: HashSet<usize>,
    delay: Option<Duration>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(attempts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            fail_on: attempts.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn published(&self) -> Vec<ValidatedRide> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_fares(&self) -> Vec<f64> {
        self.published()
            .iter()
            .map(ValidatedRide::fare_amount)
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RidePublisher for RecordingPublisher {
    async fn publish(&self, ride: &ValidatedRide) -> Result<Ack, PublishError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_on.contains(&attempt) {
            return Err(PublishError::Produce(KafkaError::MessageProduction(
                RDKafkaErrorCode::BrokerNotAvailable,
            )));
        }

        let mut published = self.published.lock().unwrap();
        published.push(ride.clone());
        Ok(Ack {
            partition: 0,
            offset: published.len() as i64 - 1,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampUnit {
    Micros,
    Nanos,
}

/// One trip per entry, in the layout of the TLC yellow taxi files. `None` passenger
/// counts are written as nulls.
pub fn trips_parquet(trips: &[(usize, Option<f64>, f64)]) -> Vec<u8> {
    write_trips(trips, TimestampUnit::Micros, true)
}

/// Like `trips_parquet`, with the timestamp unit chosen and the fare column optional.
pub fn write_trips(
    trips: &[(usize, Option<f64>, f64)],
    unit: TimestampUnit,
    with_fare: bool,
) -> Vec<u8> {
    let timestamp_type = match unit {
        TimestampUnit::Micros => "TIMESTAMP(MICROS,true)",
        TimestampUnit::Nanos => "TIMESTAMP(NANOS,false)",
    };
    let fare_column = if with_fare {
        "OPTIONAL DOUBLE fare_amount;"
    } else {
        ""
    };
    let message = format!(
        "
        message schema {{
            OPTIONAL INT64 VendorID;
            OPTIONAL INT64 tpep_pickup_datetime ({timestamp_type});
            OPTIONAL INT64 tpep_dropoff_datetime ({timestamp_type});
            OPTIONAL DOUBLE passenger_count;
            OPTIONAL DOUBLE trip_distance;
            OPTIONAL INT64 PULocationID;
            OPTIONAL INT64 DOLocationID;
            {fare_column}
        }}
        "
    );
    let schema = Arc::new(parse_message_type(&message).unwrap());

    let to_timestamp = |time: NaiveDateTime| match unit {
        TimestampUnit::Micros => time.and_utc().timestamp_micros(),
        TimestampUnit::Nanos => time.and_utc().timestamp_nanos_opt().unwrap(),
    };
    let pickups: Vec<i64> = trips
        .iter()
        .map(|(n, _, _)| to_timestamp(pickup_time(*n)))
        .collect();
    let dropoffs: Vec<i64> = trips
        .iter()
        .map(|(n, _, _)| to_timestamp(pickup_time(*n) + chrono::Duration::minutes(12)))
        .collect();
    let passengers: Vec<f64> = trips.iter().filter_map(|(_, p, _)| *p).collect();
    let passenger_levels: Vec<i16> = trips
        .iter()
        .map(|(_, p, _)| i16::from(p.is_some()))
        .collect();
    let fares: Vec<f64> = trips.iter().map(|(_, _, fare)| *fare).collect();
    let present = vec![1_i16; trips.len()];

    let mut buffer = Vec::new();
    let mut writer = SerializedFileWriter::new(
        &mut buffer,
        schema,
        Arc::new(WriterProperties::builder().build()),
    )
    .unwrap();
    let mut row_group = writer.next_row_group().unwrap();
    let mut index = 0;
    while let Some(mut column) = row_group.next_column().unwrap() {
        let written = match index {
            0 => column
                .typed::<Int64Type>()
                .write_batch(&vec![2; trips.len()], Some(&present), None),
            1 => column
                .typed::<Int64Type>()
                .write_batch(&pickups, Some(&present), None),
            2 => column
                .typed::<Int64Type>()
                .write_batch(&dropoffs, Some(&present), None),
            3 => column
                .typed::<DoubleType>()
                .write_batch(&passengers, Some(&passenger_levels), None),
            4 => column
                .typed::<DoubleType>()
                .write_batch(&vec![2.5; trips.len()], Some(&present), None),
            5 => column
                .typed::<Int64Type>()
                .write_batch(&vec![161; trips.len()], Some(&present), None),
            6 => column
                .typed::<Int64Type>()
                .write_batch(&vec![236; trips.len()], Some(&present), None),
            _ => column
                .typed::<DoubleType>()
                .write_batch(&fares, Some(&present), None),
        };
        written.unwrap();
        column.close().unwrap();
        index += 1;
    }
    row_group.close().unwrap();
    writer.close().unwrap();

    buffer
}
