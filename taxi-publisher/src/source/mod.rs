use async_trait::async_trait;
use thiserror::Error;

use crate::record::RawRecord;

pub mod parquet;

pub use self::parquet::ParquetSource;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to fetch {location}: {source}")]
    Fetch {
        location: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode parquet data: {0}")]
    Parquet(#[from] ::parquet::errors::ParquetError),
    #[error("source is missing required column {0}")]
    MissingColumn(&'static str),
    #[error("row {index} could not be read: {reason}")]
    Row { index: usize, reason: String },
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

pub type RowIter = Box<dyn Iterator<Item = Result<RawRecord, SourceError>> + Send>;

/// An ordered, finite sequence of rows. Items are produced lazily; an `Err` item
/// means the source broke down part way through.
pub struct SourceRows {
    /// Row count announced by the source, used for progress reporting.
    pub total: Option<usize>,
    pub rows: RowIter,
}

impl SourceRows {
    pub fn new(total: Option<usize>, rows: RowIter) -> Self {
        Self { total, rows }
    }

    pub fn from_records(records: Vec<RawRecord>) -> Self {
        let total = records.len();
        Self::new(Some(total), Box::new(records.into_iter().map(Ok)))
    }
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn read(&self) -> Result<SourceRows, SourceError>;

    /// Where the rows come from, for logs.
    fn location(&self) -> &str;
}
