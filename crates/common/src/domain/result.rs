use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Payload decode error: {0}")]
    PayloadDecodeError(#[from] serde_json::Error),

    #[error("Insufficient temperatures: expected at least {expected}, got {actual}")]
    InsufficientTemperatures { expected: usize, actual: usize },

    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("Invalid QoS level: {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),

    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),

    #[error("Invalid message store: {0}")]
    InvalidStore(String),

    #[error("MQTT connection failed: {0}")]
    MqttConnectionError(String),

    #[error("MQTT subscription failed: {0}")]
    MqttSubscriptionError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
