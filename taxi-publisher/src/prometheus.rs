// prometheus exporter setup

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

pub const TAXI_RIDES_SEEN_TOTAL: &str = "taxi_rides_seen_total";
pub const TAXI_RIDES_PUBLISHED_TOTAL: &str = "taxi_rides_published_total";
pub const TAXI_RIDES_DROPPED_TOTAL: &str = "taxi_rides_dropped_total";
pub const TAXI_PUBLISHER_BATCH_SIZE: &str = "taxi_publisher_batch_size";
pub const TAXI_PUBLISHER_ACK_SECONDS: &str = "taxi_publisher_ack_duration_seconds";

pub fn report_dropped_rides(cause: &'static str, quantity: u64) {
    counter!(TAXI_RIDES_DROPPED_TOTAL, "cause" => cause).increment(quantity);
}

/// Installs the global recorder and serves `/metrics` on `address`.
pub fn setup_metrics_recorder(address: SocketAddr) -> Result<(), BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];
    const BATCH_SIZES: &[f64] = &[
        1.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0,
    ];

    PrometheusBuilder::new()
        .with_http_listener(address)
        .set_buckets_for_metric(Matcher::Suffix("_seconds".to_string()), EXPONENTIAL_SECONDS)?
        .set_buckets_for_metric(Matcher::Suffix("_batch_size".to_string()), BATCH_SIZES)?
        .install()
}
