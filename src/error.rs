use std::path::PathBuf;

use rdkafka::error::KafkaError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// Reasons an inbound message is discarded without touching state.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("No handler for topic '{0}'")]
    UnknownTopic(String),

    #[error("Malformed payload on '{topic}': {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}
