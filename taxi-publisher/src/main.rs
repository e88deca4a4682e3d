use std::time::Duration;

use anyhow::Context;
use envconfig::Envconfig;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use taxi_publisher::config::Config;
use taxi_publisher::pipeline::Pipeline;
use taxi_publisher::prometheus::setup_metrics_recorder;
use taxi_publisher::sinks::kafka::KafkaPublisher;
use taxi_publisher::sinks::print::PrintPublisher;
use taxi_publisher::source::{ParquetSource, RecordSource};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

async fn shutdown(cancel: CancellationToken) -> std::io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
        _ = cancel.cancelled() => return Ok(()),
    };

    info!("Shutting down gracefully...");
    cancel.cancel();
    Ok(())
}

// RUST_LOG wins over LOG_LEVEL when both are set
fn setup_tracing(level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("invalid configuration")?;
    setup_tracing(config.log_level);
    info!("Starting up...");

    if config.export_prometheus {
        setup_metrics_recorder(config.metrics_address)
            .context("failed to install prometheus exporter")?;
        info!("Metrics listening on {}", config.metrics_address);
    }

    let topic = config.topic()?;
    let pipeline_config = config.pipeline_config()?;

    let cancel = CancellationToken::new();
    let listener = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown(listener).await {
            error!("failed to register signal handlers: {}", e);
        }
    });

    let source = ParquetSource::new(config.data_url.clone());
    info!("Publishing rides from {} to {}", source.location(), topic);

    let result = if config.print_sink {
        let pipeline = Pipeline::new(pipeline_config, PrintPublisher::default());
        pipeline.run(&source, &cancel).await
    } else {
        let publisher = KafkaPublisher::from_config(&config.kafka, topic.kafka_topic())
            .await
            .context("failed to create kafka producer")?;
        let pipeline = Pipeline::new(pipeline_config, publisher);
        let result = pipeline.run(&source, &cancel).await;
        if let Err(e) = pipeline.publisher().flush(FLUSH_TIMEOUT) {
            warn!("failed to flush kafka producer: {}", e);
        }
        result
    };

    // Releases the signal listener
    cancel.cancel();

    match result {
        Ok(summary) => {
            info!(
                records_seen = summary.records_seen,
                records_published = summary.records_published,
                records_invalid = summary.records_invalid,
                publish_failures = summary.publish_failures,
                batches = summary.batches,
                "Data processing completed successfully"
            );
            Ok(())
        }
        Err(e) => {
            error!("Data processing failed: {}", e);
            Err(e.into())
        }
    }
}
