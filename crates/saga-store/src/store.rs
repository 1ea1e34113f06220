use std::sync::Arc;

use async_trait::async_trait;

use crate::{CorrelationId, Result, SagaRecord, Version};

/// Core trait for saga state store implementations.
///
/// All implementations must be thread-safe (Send + Sync) and must honour
/// three guarantees:
/// - `put` is atomic per record: readers never observe a partial write.
/// - A `get` after a successful `put` in the same process returns the value
///   just written.
/// - `put` only succeeds when the stored version equals `expected`; this is
///   the single-writer discipline every orchestrator worker relies on.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Writes a record if the stored version equals `expected`.
    ///
    /// `Version::initial()` means the record must not exist yet (neither hot
    /// nor archived). Returns the new version, which is also stored on the
    /// record.
    async fn put(&self, record: SagaRecord, expected: Version) -> Result<Version>;

    /// Retrieves a hot record.
    ///
    /// Returns None if the saga never existed or has been archived.
    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>>;

    /// Lists hot records currently in the given state, oldest update first.
    ///
    /// Used by recovery sweeps after a crash and by timeout processing.
    async fn list_by_state(&self, state: &str) -> Result<Vec<SagaRecord>>;

    /// Lists hot records that still carry unpublished outbox messages.
    async fn list_with_pending_outbox(&self) -> Result<Vec<SagaRecord>>;

    /// Moves a record out of hot storage.
    ///
    /// Fails with `NotFound` if there is no hot record for the ID.
    async fn archive(&self, correlation_id: CorrelationId) -> Result<()>;

    /// Retrieves an archived record.
    async fn get_archived(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>>;
}

#[async_trait]
impl<T: SagaStore + ?Sized> SagaStore for Arc<T> {
    async fn put(&self, record: SagaRecord, expected: Version) -> Result<Version> {
        (**self).put(record, expected).await
    }

    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>> {
        (**self).get(correlation_id).await
    }

    async fn list_by_state(&self, state: &str) -> Result<Vec<SagaRecord>> {
        (**self).list_by_state(state).await
    }

    async fn list_with_pending_outbox(&self) -> Result<Vec<SagaRecord>> {
        (**self).list_with_pending_outbox().await
    }

    async fn archive(&self, correlation_id: CorrelationId) -> Result<()> {
        (**self).archive(correlation_id).await
    }

    async fn get_archived(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>> {
        (**self).get_archived(correlation_id).await
    }
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Checks whether a correlation ID has ever been used, hot or archived.
    async fn exists(&self, correlation_id: CorrelationId) -> Result<bool> {
        if self.get(correlation_id).await?.is_some() {
            return Ok(true);
        }
        Ok(self.get_archived(correlation_id).await?.is_some())
    }

    /// Looks a record up in hot storage first, then in the archive.
    async fn find(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>> {
        match self.get(correlation_id).await? {
            Some(record) => Ok(Some(record)),
            None => self.get_archived(correlation_id).await,
        }
    }

    /// Lists hot records in any of the given states.
    async fn list_by_states(&self, states: &[&str]) -> Result<Vec<SagaRecord>> {
        let mut records = Vec::new();
        for state in states {
            records.extend(self.list_by_state(state).await?);
        }
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}
