use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use parquet::basic::{LogicalType, TimeUnit};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::reader::RowIter as ParquetRowIter;
use parquet::record::{Field, Row};
use parquet::schema::types::{SchemaDescriptor, Type};
use tracing::info;

use super::{RecordSource, SourceError, SourceRows};
use crate::record::{RawRecord, RawValue};
use crate::ride::COLUMNS;

/// Reads a parquet file from an `http(s)://` URL or a local path. The whole file is
/// fetched up front; rows are decoded as they are pulled.
pub struct ParquetSource {
    location: String,
    client: reqwest::Client,
}

impl ParquetSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            client: reqwest::Client::new(),
        }
    }

    fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }

    async fn fetch(&self) -> Result<Bytes, SourceError> {
        if !self.is_remote() {
            let data = tokio::fs::read(&self.location)
                .await
                .map_err(|source| SourceError::Io {
                    location: self.location.clone(),
                    source,
                })?;
            return Ok(Bytes::from(data));
        }

        let fetch_error = |source| SourceError::Fetch {
            location: self.location.clone(),
            source,
        };
        self.client
            .get(&self.location)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_error)?
            .bytes()
            .await
            .map_err(fetch_error)
    }
}

#[async_trait]
impl RecordSource for ParquetSource {
    async fn read(&self) -> Result<SourceRows, SourceError> {
        info!("Reading data from {}", self.location);
        let data = self.fetch().await?;
        let rows = open(data)?;
        info!(
            "Successfully read {} records",
            rows.total.map_or("an unknown number of".to_string(), |t| t.to_string())
        );
        Ok(rows)
    }

    fn location(&self) -> &str {
        &self.location
    }
}

/// Opens parquet bytes, keeping only the ride columns.
pub fn open(data: Bytes) -> Result<SourceRows, SourceError> {
    let reader = SerializedFileReader::new(data)?;
    let file_metadata = reader.metadata().file_metadata();
    let total = usize::try_from(file_metadata.num_rows()).ok();
    let schema = file_metadata.schema_descr();
    let projection = projection(schema)?;
    let nanosecond_columns = nanosecond_timestamp_columns(schema);

    let rows = ParquetRowIter::from_file_into(Box::new(reader))
        .project(Some(projection))?
        .enumerate()
        .map(move |(index, row)| match row {
            Ok(row) => Ok(convert_row(&row, &nanosecond_columns)),
            Err(e) => Err(SourceError::Row {
                index,
                reason: e.to_string(),
            }),
        });

    Ok(SourceRows::new(total, Box::new(rows)))
}

fn projection(schema: &SchemaDescriptor) -> Result<Type, SourceError> {
    let root = schema.root_schema();
    let fields: Vec<_> = root
        .get_fields()
        .iter()
        .filter(|field| COLUMNS.iter().any(|column| *column == field.name()))
        .cloned()
        .collect();

    if let Some(missing) = COLUMNS
        .iter()
        .find(|column| !fields.iter().any(|field| field.name() == **column))
    {
        return Err(SourceError::MissingColumn(*missing));
    }

    Ok(Type::group_type_builder(root.name())
        .with_fields(fields)
        .build()?)
}

// The row API hands INT64 nanosecond timestamps back as plain longs
fn nanosecond_timestamp_columns(schema: &SchemaDescriptor) -> HashSet<String> {
    schema
        .columns()
        .iter()
        .filter(|column| {
            matches!(
                column.logical_type(),
                Some(LogicalType::Timestamp {
                    unit: TimeUnit::NANOS(_),
                    ..
                })
            )
        })
        .map(|column| column.name().to_string())
        .collect()
}

fn convert_row(row: &Row, nanosecond_columns: &HashSet<String>) -> RawRecord {
    row.get_column_iter()
        .map(|(name, field)| {
            let value = match field {
                Field::Long(nanos) if nanosecond_columns.contains(name) => timestamp(
                    nanos.div_euclid(1_000_000_000),
                    nanos.rem_euclid(1_000_000_000),
                ),
                field => convert_field(field),
            };
            (name.clone(), value)
        })
        .collect()
}

pub fn convert_field(field: &Field) -> RawValue {
    match field {
        Field::Null => RawValue::Null,
        Field::Bool(v) => RawValue::Bool(*v),
        Field::Byte(v) => RawValue::Int(i64::from(*v)),
        Field::Short(v) => RawValue::Int(i64::from(*v)),
        Field::Int(v) => RawValue::Int(i64::from(*v)),
        Field::Long(v) => RawValue::Int(*v),
        Field::UByte(v) => RawValue::Int(i64::from(*v)),
        Field::UShort(v) => RawValue::Int(i64::from(*v)),
        Field::UInt(v) => RawValue::Int(i64::from(*v)),
        Field::ULong(v) => i64::try_from(*v).map_or(RawValue::Float(*v as f64), RawValue::Int),
        Field::Float(v) => RawValue::Float(f64::from(*v)),
        Field::Double(v) => RawValue::Float(*v),
        Field::Str(v) => RawValue::Str(v.clone()),
        Field::TimestampMillis(ms) => {
            timestamp(ms.div_euclid(1_000), ms.rem_euclid(1_000) * 1_000_000)
        }
        Field::TimestampMicros(us) => {
            timestamp(us.div_euclid(1_000_000), us.rem_euclid(1_000_000) * 1_000)
        }
        other => RawValue::Str(other.to_string()),
    }
}

fn timestamp(secs: i64, nanos: i64) -> RawValue {
    u32::try_from(nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(secs, nanos))
        .map_or(RawValue::Null, |ts| RawValue::Timestamp(ts.naive_utc()))
}
