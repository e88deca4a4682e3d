use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::ride::ValidatedRide;

pub mod kafka;
pub mod print;

/// Broker confirmation that a message was durably accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ack {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize ride: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("maximum message size exceeded")]
    MessageTooLarge,
    #[error("failed to produce to kafka: {0}")]
    Produce(#[from] KafkaError),
    #[error("delivery was canceled before the broker acknowledged it")]
    Canceled,
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
}

impl PublishError {
    /// Label for the dropped rides counter.
    pub fn cause(&self) -> &'static str {
        match self {
            PublishError::Serialization(_) => "serialization",
            PublishError::MessageTooLarge => "kafka_message_size",
            PublishError::Produce(_) | PublishError::Canceled => "kafka_write_error",
            PublishError::Timeout(_) => "publish_timeout",
        }
    }
}

/// Publishes one ride and waits for the broker to acknowledge it. Implementations
/// never retry; a failure is returned to the caller to decide on.
#[async_trait]
pub trait RidePublisher: Send + Sync {
    async fn publish(&self, ride: &ValidatedRide) -> Result<Ack, PublishError>;
}

/// The message payload: the ride as UTF-8 JSON.
pub fn encode_ride(ride: &ValidatedRide) -> Result<Vec<u8>, PublishError> {
    Ok(serde_json::to_vec(ride)?)
}
