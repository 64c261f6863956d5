use crate::domain::{DomainError, DomainResult, PersistedRecord, ReadingSink};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::debug;

const INSERT_CONDITION: &str = "INSERT INTO conditions (time, mac, temp_delta, raw_temp0, raw_temp1) \
     VALUES ($1, $2, $3, $4, $5)";

/// Writes derived readings to the `conditions` hypertable.
#[derive(Clone)]
pub struct PostgresReadingRepository {
    client: PostgresClient,
}

impl PostgresReadingRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReadingSink for PostgresReadingRepository {
    async fn insert(&self, record: &PersistedRecord) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        conn.execute(
            INSERT_CONDITION,
            &[
                &record.timestamp,
                &record.device_id,
                &record.temp_delta,
                &record.raw_temp0,
                &record.raw_temp1,
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(device_id = %record.device_id, "inserted condition row");
        Ok(())
    }
}
