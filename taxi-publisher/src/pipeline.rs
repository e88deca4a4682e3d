use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::Batches;
use crate::prometheus::{
    report_dropped_rides, TAXI_PUBLISHER_ACK_SECONDS, TAXI_PUBLISHER_BATCH_SIZE,
    TAXI_RIDES_PUBLISHED_TOTAL, TAXI_RIDES_SEEN_TOTAL,
};
use crate::record::RawRecord;
use crate::ride::{validate_batch, BatchValidation, ValidatedRide};
use crate::sinks::{Ack, PublishError, RidePublisher};
use crate::source::{RecordSource, SourceError, SourceRows};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub batch_size: NonZeroUsize,
    pub pacing_delay: Duration,
    /// Upper bound on a single publish-and-acknowledge round trip.
    pub publish_timeout: Option<Duration>,
}

/// Counts for a run. `records_seen` includes invalid rows; `records_published`
/// only counts acknowledged messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub records_seen: usize,
    pub records_published: usize,
    pub records_invalid: usize,
    pub publish_failures: usize,
    pub batches: usize,
}

/// Emitted after every batch. `batch` is 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchProgress {
    pub batch: usize,
    pub batch_len: usize,
    pub valid: usize,
    pub published: usize,
    pub records_seen: usize,
    pub records_published: usize,
    pub total: Option<usize>,
}

/// Errors that abort a run. Invalid rows and failed publishes never end up here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),
    #[error("source failed after {after} records: {source}")]
    SourceInterrupted {
        after: usize,
        #[source]
        source: SourceError,
    },
    #[error("run cancelled after {} records", .summary.records_seen)]
    Cancelled { summary: Summary },
}

pub struct Pipeline<P> {
    config: PipelineConfig,
    publisher: P,
    progress: Option<UnboundedSender<BatchProgress>>,
}

impl<P: RidePublisher> Pipeline<P> {
    pub fn new(config: PipelineConfig, publisher: P) -> Self {
        Self {
            config,
            publisher,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: UnboundedSender<BatchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Reads the source once, then validates and publishes it batch by batch. Each
    /// publish is awaited before the next one starts.
    pub async fn run<S>(
        &self,
        source: &S,
        cancel: &CancellationToken,
    ) -> Result<Summary, PipelineError>
    where
        S: RecordSource + ?Sized,
    {
        let mut summary = Summary::default();

        let SourceRows { total, rows } = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { summary }),
            read = source.read() => read.map_err(PipelineError::SourceUnavailable)?,
        };

        let mut batches = Batches::new(rows, self.config.batch_size).peekable();
        while let Some(batch) = batches.next() {
            let first_row = summary.records_seen;
            let records = take_batch(batch, first_row)?;
            let batch_len = records.len();

            summary.records_seen += batch_len;
            counter!(TAXI_RIDES_SEEN_TOTAL).increment(batch_len as u64);
            histogram!(TAXI_PUBLISHER_BATCH_SIZE).record(batch_len as f64);

            let BatchValidation { rides, rejected } = validate_batch(&records);
            for (index, err) in &rejected {
                warn!(
                    row = first_row + index,
                    kind = %err.kind(),
                    "dropping invalid record: {}",
                    err
                );
                report_dropped_rides(err.kind().as_str(), 1);
            }
            summary.records_invalid += rejected.len();

            let mut published = 0;
            for ride in &rides {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled { summary }),
                    result = self.publish(ride) => result,
                };

                match result {
                    Ok(ack) => {
                        debug!(partition = ack.partition, offset = ack.offset, "ride published");
                        published += 1;
                        summary.records_published += 1;
                        counter!(TAXI_RIDES_PUBLISHED_TOTAL).increment(1);
                    }
                    Err(err) => {
                        error!("failed to publish ride: {}", err);
                        report_dropped_rides(err.cause(), 1);
                        summary.publish_failures += 1;
                    }
                }
            }

            summary.batches += 1;
            info!(
                records_seen = summary.records_seen,
                records_published = summary.records_published,
                batch = summary.batches,
                "processed {}/{} records",
                summary.records_published,
                total.unwrap_or(summary.records_seen),
            );
            self.report(BatchProgress {
                batch: summary.batches,
                batch_len,
                valid: rides.len(),
                published,
                records_seen: summary.records_seen,
                records_published: summary.records_published,
                total,
            });

            if !self.config.pacing_delay.is_zero() && batches.peek().is_some() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled { summary }),
                    _ = tokio::time::sleep(self.config.pacing_delay) => {}
                }
            }
        }

        Ok(summary)
    }

    async fn publish(&self, ride: &ValidatedRide) -> Result<Ack, PublishError> {
        let started = Instant::now();
        let result = match self.config.publish_timeout {
            Some(limit) => tokio::time::timeout(limit, self.publisher.publish(ride))
                .await
                .unwrap_or(Err(PublishError::Timeout(limit))),
            None => self.publisher.publish(ride).await,
        };
        histogram!(TAXI_PUBLISHER_ACK_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    fn report(&self, progress: BatchProgress) {
        if let Some(tx) = &self.progress {
            if tx.send(progress).is_err() {
                debug!("progress receiver dropped");
            }
        }
    }
}

fn take_batch(
    batch: Vec<Result<RawRecord, SourceError>>,
    first_row: usize,
) -> Result<Vec<RawRecord>, PipelineError> {
    let mut records = Vec::with_capacity(batch.len());
    for row in batch {
        match row {
            Ok(record) => records.push(record),
            Err(source) => {
                return Err(PipelineError::SourceInterrupted {
                    after: first_row + records.len(),
                    source,
                })
            }
        }
    }
    Ok(records)
}
