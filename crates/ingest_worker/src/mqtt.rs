mod config;
mod event_source;
mod subscriber;
mod topic;

pub use config::{MqttConfig, StoreMode, MEMORY_STORE};
pub use subscriber::MqttIntake;
pub use topic::validate_topic_filter;
