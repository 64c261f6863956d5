use crate::postgres::{PostgresConfig, PostgresSslMode};
use anyhow::Result;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info};

const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// PostgreSQL client wrapper with connection pooling
#[derive(Clone)]
pub struct PostgresClient {
    pool: Pool,
}

impl PostgresClient {
    /// Creates a new PostgreSQL client with connection pooling
    ///
    /// # Arguments
    /// * `host` - Database host (e.g., "localhost")
    /// * `port` - Database port (e.g., 5432)
    /// * `database` - Database name
    /// * `username` - Database username
    /// * `password` - Database password
    /// * `max_pool_size` - Maximum number of connections in the pool
    /// * `ssl_mode` - Whether connections negotiate TLS
    pub fn new(
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
        max_pool_size: usize,
        ssl_mode: PostgresSslMode,
    ) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(host.to_string());
        cfg.port = Some(port);
        cfg.dbname = Some(database.to_string());
        cfg.user = Some(username.to_string());
        cfg.password = Some(password.to_string());
        cfg.ssl_mode = Some(ssl_mode.into());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        // The connector is only used when the ssl mode allows TLS.
        let pool = cfg.create_pool(Some(Runtime::Tokio1), tls_connector()?)?;
        pool.resize(max_pool_size);

        debug!(?ssl_mode, "postgreSQL pool created");
        Ok(Self { pool })
    }

    pub fn from_config(config: &PostgresConfig) -> Result<Self> {
        Self::new(
            &config.host,
            config.port,
            &config.database,
            &config.username,
            &config.password,
            config.max_pool_size,
            config.ssl_mode,
        )
    }

    /// Pings the database to verify connectivity
    pub async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.execute("SELECT 1", &[]).await?;
        debug!("postgreSQL connection successful");
        Ok(())
    }

    /// Gets a connection from the pool
    pub async fn get_connection(&self) -> Result<deadpool_postgres::Client> {
        Ok(self.pool.get().await?)
    }

    /// Closes the pool and waits until every checked-out connection has
    /// been returned and dropped.
    ///
    /// New `get_connection` calls fail once the pool is closed. Callers bound
    /// the wait with their own timeout.
    pub async fn close(self) {
        self.pool.close();

        loop {
            let status = self.pool.status();
            if status.size == 0 {
                break;
            }
            debug!(in_use = status.size, "waiting for pooled connections to be released");
            tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
        }

        info!("postgreSQL pool closed");
    }
}

/// rustls connector trusting the webpki (Mozilla) root certificates.
fn tls_connector() -> Result<MakeRustlsConnect> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(MakeRustlsConnect::new(config))
}
