use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;
use thiserror::Error;
use tracing::Level;

use crate::pipeline::PipelineConfig;

// Kafka refuses longer topic names
const MAX_TOPIC_LENGTH: usize = 249;
const DEFAULT_TOPIC_NAME: &str = "taxi-rides";

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Required, but checked by `topic` so a missing value surfaces as a `ConfigError`.
    pub project_id: Option<String>,
    pub topic_name: Option<NonEmptyString>,

    // Older deployments name these after Pub/Sub; read when the above are unset
    pub gcp_project_id: Option<String>,
    pub pubsub_topic: Option<NonEmptyString>,

    #[envconfig(
        default = "https://d37ci6vzurychx.cloudfront.net/trip-data/yellow_tripdata_2023-01.parquet"
    )]
    pub data_url: String,

    #[envconfig(default = "100")]
    pub batch_size: usize,

    #[envconfig(default = "100")]
    pub pacing_delay_ms: EnvMsDuration,

    // 0 disables the timeout. Otherwise it must outlast the producer's own delivery timeout
    #[envconfig(default = "30000")]
    pub publish_timeout_ms: EnvMsDuration,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "false")]
    pub export_prometheus: bool,

    #[envconfig(default = "0.0.0.0:9102")]
    pub metrics_address: SocketAddr,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("PROJECT_ID must be set")]
    MissingProjectId,
    #[error("invalid project id {0:?}")]
    InvalidProjectId(String),
    #[error("invalid topic name {0:?}")]
    InvalidTopicName(String),
    #[error("BATCH_SIZE must be a positive integer")]
    InvalidBatchSize,
    #[error(
        "PUBLISH_TIMEOUT_MS ({publish_timeout_ms}) must exceed the kafka delivery timeout plus linger ({delivery_timeout_ms})"
    )]
    PublishTimeoutTooShort {
        publish_timeout_ms: u128,
        delivery_timeout_ms: u128,
    },
}

impl Config {
    pub fn topic(&self) -> Result<TopicPath, ConfigError> {
        let project_id = [&self.project_id, &self.gcp_project_id]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
            .ok_or(ConfigError::MissingProjectId)?;
        let topic_name = self
            .topic_name
            .as_ref()
            .or(self.pubsub_topic.as_ref())
            .map_or(DEFAULT_TOPIC_NAME, NonEmptyString::as_str);
        TopicPath::new(project_id, topic_name)
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let batch_size = NonZeroUsize::new(self.batch_size).ok_or(ConfigError::InvalidBatchSize)?;
        let publish_timeout = Some(self.publish_timeout_ms.0).filter(|timeout| !timeout.is_zero());

        // A timed out delivery future does not withdraw the message from librdkafka's queue
        if let Some(timeout) = publish_timeout.filter(|_| !self.print_sink) {
            let delivery = self.kafka_delivery_timeout();
            if timeout <= delivery {
                return Err(ConfigError::PublishTimeoutTooShort {
                    publish_timeout_ms: timeout.as_millis(),
                    delivery_timeout_ms: delivery.as_millis(),
                });
            }
        }

        Ok(PipelineConfig {
            batch_size,
            pacing_delay: self.pacing_delay_ms.0,
            publish_timeout,
        })
    }

    fn kafka_delivery_timeout(&self) -> Duration {
        Duration::from_millis(
            u64::from(self.kafka.kafka_message_timeout_ms)
                + u64::from(self.kafka.kafka_producer_linger_ms),
        )
    }
}

/// A topic resolved from a project and a topic name. Published to as
/// `<project>.<topic>`, displayed as `projects/<project>/topics/<topic>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicPath {
    project_id: String,
    topic_name: String,
}

impl TopicPath {
    pub fn new(project_id: &str, topic_name: &str) -> Result<Self, ConfigError> {
        if !is_topic_safe(project_id) {
            return Err(ConfigError::InvalidProjectId(project_id.to_string()));
        }
        if !is_topic_safe(topic_name) || project_id.len() + 1 + topic_name.len() > MAX_TOPIC_LENGTH
        {
            return Err(ConfigError::InvalidTopicName(topic_name.to_string()));
        }

        Ok(Self {
            project_id: project_id.to_string(),
            topic_name: topic_name.to_string(),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn kafka_topic(&self) -> String {
        format!("{}.{}", self.project_id, self.topic_name)
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/topics/{}", self.project_id, self.topic_name)
    }
}

fn is_topic_safe(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
