use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::ride::ValidatedRide;
use crate::sinks::{Ack, PublishError, RidePublisher};

/// Logs rides instead of producing them, acknowledging each on a single fake partition.
#[derive(Default)]
pub struct PrintPublisher {
    next_offset: AtomicI64,
}

#[async_trait]
impl RidePublisher for PrintPublisher {
    async fn publish(&self, ride: &ValidatedRide) -> Result<Ack, PublishError> {
        let payload = serde_json::to_string(ride)?;
        info!("ride: {}", payload);

        Ok(Ack {
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::Relaxed),
        })
    }
}
