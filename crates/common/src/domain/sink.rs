use crate::domain::{DomainResult, PersistedRecord};
use async_trait::async_trait;

/// Time-series store that accepts derived records.
///
/// Infrastructure layer (e.g., `PostgresReadingRepository`) implements this
/// trait. A successful return means durability is the store's responsibility.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReadingSink: Send + Sync {
    /// Insert a single record
    async fn insert(&self, record: &PersistedRecord) -> DomainResult<()>;
}
