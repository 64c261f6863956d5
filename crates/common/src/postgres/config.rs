use serde::{Deserialize, Serialize};

/// PostgreSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
    pub ssl_mode: PostgresSslMode,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "tempstream".to_string(),
            username: "tempstream".to_string(),
            password: "tempstream".to_string(),
            max_pool_size: 5,
            ssl_mode: PostgresSslMode::default(),
        }
    }
}

/// TLS negotiation with the server, named after libpq's `sslmode`.
///
/// Server certificates are verified against the Mozilla root store whenever
/// TLS is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostgresSslMode {
    /// Plain TCP only
    Disable,
    /// TLS when the server offers it, plain TCP otherwise
    #[default]
    Prefer,
    /// Fail unless TLS can be established
    Require,
}

impl From<PostgresSslMode> for deadpool_postgres::SslMode {
    fn from(mode: PostgresSslMode) -> Self {
        match mode {
            PostgresSslMode::Disable => deadpool_postgres::SslMode::Disable,
            PostgresSslMode::Prefer => deadpool_postgres::SslMode::Prefer,
            PostgresSslMode::Require => deadpool_postgres::SslMode::Require,
        }
    }
}
