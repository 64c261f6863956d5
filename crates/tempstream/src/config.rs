use common::postgres::{PostgresConfig, PostgresSslMode};
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment, File};
use ingest_worker::mqtt::MqttConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // MQTT configuration
    /// Topic filter for sensor readings
    #[serde(default = "default_mqtt_topic")]
    pub mqtt_topic: String,

    /// Broker URI (tcp://host:port)
    #[serde(default = "default_mqtt_broker_url")]
    pub mqtt_broker_url: String,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default = "default_mqtt_clean_session")]
    pub mqtt_clean_session: bool,

    /// Subscription QoS (0, 1 or 2)
    #[serde(default = "default_mqtt_qos")]
    pub mqtt_qos: u8,

    /// Session store, ":memory:" or a directory
    #[serde(default = "default_mqtt_store")]
    pub mqtt_store: String,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    /// Time allowed for the DISCONNECT to be flushed on shutdown
    #[serde(default = "default_mqtt_disconnect_timeout_ms")]
    pub mqtt_disconnect_timeout_ms: u64,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    /// TLS negotiation: disable, prefer or require
    #[serde(default)]
    pub postgres_sslmode: PostgresSslMode,

    // Lifecycle
    /// Bound on broker connect and subscribe during start-up, in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Bound on each closer, in seconds
    #[serde(default = "default_closer_timeout_secs")]
    pub closer_timeout_secs: u64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Enable OpenTelemetry export
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// MQTT defaults
fn default_mqtt_topic() -> String {
    "Hotpants/data".to_string()
}

fn default_mqtt_broker_url() -> String {
    "tcp://test.mosquitto.org:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "tempstream".to_string()
}

fn default_mqtt_clean_session() -> bool {
    false
}

fn default_mqtt_qos() -> u8 {
    0
}

fn default_mqtt_store() -> String {
    ingest_worker::mqtt::MEMORY_STORE.to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_mqtt_disconnect_timeout_ms() -> u64 {
    100
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "tempstream".to_string()
}

fn default_postgres_username() -> String {
    "tempstream".to_string()
}

fn default_postgres_password() -> String {
    "tempstream".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_closer_timeout_secs() -> u64 {
    10
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "tempstream".to_string()
}

impl ServiceConfig {
    /// Load from an optional `config.*` file in the working directory,
    /// overridden by `TEMPSTREAM_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("TEMPSTREAM"))
            .build()?
            .try_deserialize()
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            topic: self.mqtt_topic.clone(),
            broker_url: self.mqtt_broker_url.clone(),
            client_id: self.mqtt_client_id.clone(),
            clean_session: self.mqtt_clean_session,
            qos: self.mqtt_qos,
            store: self.mqtt_store.clone(),
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            connect_timeout: Duration::from_secs(self.startup_timeout_secs),
            ..Default::default()
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
            ssl_mode: self.postgres_sslmode,
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
        }
    }

    pub fn mqtt_disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.mqtt_disconnect_timeout_ms)
    }

    pub fn closer_timeout(&self) -> Duration {
        Duration::from_secs(self.closer_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests run serially and don't interfere with each other
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 5] = [
        "TEMPSTREAM_LOG_LEVEL",
        "TEMPSTREAM_MQTT_QOS",
        "TEMPSTREAM_MQTT_TOPIC",
        "TEMPSTREAM_POSTGRES_PORT",
        "TEMPSTREAM_POSTGRES_SSLMODE",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: Test runs with mutex lock to prevent concurrent env access
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        let config = ServiceConfig::load().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.mqtt_topic, "Hotpants/data");
        assert_eq!(config.mqtt_broker_url, "tcp://test.mosquitto.org:1883");
        assert_eq!(config.mqtt_qos, 0);
        assert!(!config.mqtt_clean_session);
        assert_eq!(config.mqtt_store, ":memory:");
        assert_eq!(config.mqtt_disconnect_timeout(), Duration::from_millis(100));
        assert_eq!(config.closer_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("TEMPSTREAM_LOG_LEVEL", "debug");
            std::env::set_var("TEMPSTREAM_MQTT_QOS", "1");
            std::env::set_var("TEMPSTREAM_MQTT_TOPIC", "Lab/+/data");
            std::env::set_var("TEMPSTREAM_POSTGRES_PORT", "6543");
        }

        let config = ServiceConfig::load().unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.mqtt_qos, 1);
        assert_eq!(config.mqtt_topic, "Lab/+/data");
        assert_eq!(config.postgres_port, 6543);

        clear_env();
    }

    #[test]
    fn test_derived_configs() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        let config = ServiceConfig::load().unwrap();

        let mqtt = config.mqtt_config();
        assert_eq!(mqtt.topic, config.mqtt_topic);
        assert_eq!(mqtt.connect_timeout, Duration::from_secs(30));
        assert_eq!(mqtt.keep_alive, Duration::from_secs(30));

        let postgres = config.postgres_config();
        assert_eq!(postgres.host, "localhost");
        assert_eq!(postgres.port, 5432);
        assert_eq!(postgres.max_pool_size, 5);
        assert_eq!(postgres.ssl_mode, PostgresSslMode::Prefer);

        let telemetry = config.telemetry_config();
        assert_eq!(telemetry.service_name, "tempstream");
        assert!(!telemetry.otel_enabled);
    }

    #[test]
    fn test_postgres_sslmode_from_env() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("TEMPSTREAM_POSTGRES_SSLMODE", "require");
        }

        let config = ServiceConfig::load().unwrap();
        assert_eq!(config.postgres_sslmode, PostgresSslMode::Require);
        assert_eq!(config.postgres_config().ssl_mode, PostgresSslMode::Require);

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("TEMPSTREAM_POSTGRES_SSLMODE", "sometimes");
        }
        assert!(ServiceConfig::load().is_err());

        clear_env();
    }
}
