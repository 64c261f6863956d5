use common::domain::{DomainError, DomainResult};
use rumqttc::QoS;
use std::path::PathBuf;
use std::time::Duration;

/// Store value selecting the in-memory session store.
pub const MEMORY_STORE: &str = ":memory:";

const DEFAULT_MQTT_PORT: u16 = 1883;

/// Subscription parameters for the intake adapter.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Topic filter to subscribe to
    pub topic: String,
    /// Broker URI, `tcp://host:port`, `mqtt://host:port` or `host[:port]`
    pub broker_url: String,
    pub client_id: String,
    pub clean_session: bool,
    /// Quality of service, 0, 1 or 2
    pub qos: u8,
    /// `:memory:` or a directory for the session store
    pub store: String,
    pub keep_alive: Duration,
    /// Bound on CONNACK and SUBACK during start-up
    pub connect_timeout: Duration,
    /// Pause after a connection error before the next reconnect attempt
    pub reconnect_delay: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            topic: "Hotpants/data".to_string(),
            broker_url: "tcp://test.mosquitto.org:1883".to_string(),
            client_id: "tempstream".to_string(),
            clean_session: false,
            qos: 0,
            store: MEMORY_STORE.to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Where the client keeps in-flight session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMode {
    Memory,
    File(PathBuf),
}

impl StoreMode {
    pub fn parse(store: &str) -> DomainResult<Self> {
        match store.trim() {
            "" => Err(DomainError::InvalidStore(
                "Store cannot be empty, use ':memory:' or a directory".to_string(),
            )),
            MEMORY_STORE => Ok(StoreMode::Memory),
            path => Ok(StoreMode::File(PathBuf::from(path))),
        }
    }
}

impl MqttConfig {
    pub fn qos_level(&self) -> DomainResult<QoS> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(DomainError::InvalidQos(other)),
        }
    }

    pub fn store_mode(&self) -> DomainResult<StoreMode> {
        StoreMode::parse(&self.store)
    }

    /// Client ID accepted by the broker for the configured session type.
    pub fn validated_client_id(&self) -> DomainResult<&str> {
        let id = self.client_id.as_str();
        if id.starts_with(char::is_whitespace) {
            return Err(DomainError::InvalidClientId(format!(
                "Client ID '{}' cannot start with whitespace",
                id
            )));
        }
        if id.is_empty() && !self.clean_session {
            return Err(DomainError::InvalidClientId(
                "A persistent session (clean_session = false) requires a client ID".to_string(),
            ));
        }
        Ok(id)
    }

    /// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port
    pub fn broker_address(&self) -> DomainResult<(&str, u16)> {
        let url = self.broker_url.trim();
        let url = url.trim_start_matches("mqtt://");
        let url = url.trim_start_matches("tcp://");
        let url = url.trim_end_matches('/');

        let parts: Vec<&str> = url.split(':').collect();
        match parts.as_slice() {
            [host] if !host.is_empty() => Ok((*host, DEFAULT_MQTT_PORT)),
            [host, port] if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    DomainError::InvalidBrokerUrl(format!("Invalid port in broker URL: {}", port))
                })?;
                Ok((*host, port))
            }
            _ => Err(DomainError::InvalidBrokerUrl(format!(
                "Invalid broker URL format: {}",
                self.broker_url
            ))),
        }
    }
}
