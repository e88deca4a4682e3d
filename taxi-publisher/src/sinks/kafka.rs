use std::time::Duration;

use async_trait::async_trait;
use common_kafka::config::KafkaConfig;
use common_kafka::kafka_producer::{create_kafka_producer, KafkaContext};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use tracing::{debug, info_span, instrument, Instrument};

use crate::ride::ValidatedRide;
use crate::sinks::{encode_ride, Ack, PublishError, RidePublisher};

/// Produces each ride as one keyless message to a fixed topic.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: String) -> Self {
        Self { producer, topic }
    }

    pub async fn from_config(config: &KafkaConfig, topic: String) -> Result<Self, KafkaError> {
        let producer = create_kafka_producer(config).await?;
        Ok(Self::new(producer, topic))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for every queued message to be delivered.
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        self.producer.flush(timeout)
    }

    fn enqueue(&self, payload: &[u8]) -> Result<DeliveryFuture, PublishError> {
        let record = FutureRecord::<str, [u8]> {
            topic: self.topic.as_str(),
            payload: Some(payload),
            partition: None,
            key: None,
            timestamp: None,
            headers: None,
        };

        self.producer.send_result(record).map_err(|(e, _)| {
            debug!("failed to enqueue ride: {}", e);
            match e.rdkafka_error_code() {
                Some(RDKafkaErrorCode::MessageSizeTooLarge) => PublishError::MessageTooLarge,
                _ => PublishError::Produce(e),
            }
        })
    }

    async fn process_ack(delivery: DeliveryFuture) -> Result<Ack, PublishError> {
        match delivery.await {
            // Cancelled due to timeout while retrying
            Err(_) => Err(PublishError::Canceled),
            Ok(Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge), _))) => {
                // Rejected by broker due to message size
                Err(PublishError::MessageTooLarge)
            }
            Ok(Err((err, _))) => Err(PublishError::Produce(err)),
            Ok(Ok((partition, offset))) => Ok(Ack { partition, offset }),
        }
    }
}

#[async_trait]
impl RidePublisher for KafkaPublisher {
    #[instrument(skip_all)]
    async fn publish(&self, ride: &ValidatedRide) -> Result<Ack, PublishError> {
        let payload = encode_ride(ride)?;
        let delivery = self.enqueue(&payload)?;
        Self::process_ack(delivery)
            .instrument(info_span!("ack_wait_one"))
            .await
    }
}
