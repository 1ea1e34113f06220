use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    CorrelationId, Result, SagaRecord, SagaStoreError, Version,
    store::SagaStore,
};

#[derive(Default)]
struct Tables {
    hot: HashMap<CorrelationId, SagaRecord>,
    archived: HashMap<CorrelationId, SagaRecord>,
}

/// In-memory saga store.
///
/// Provides the same compare-and-swap semantics as the PostgreSQL
/// implementation; clones share the same underlying tables, so several
/// orchestrators built over clones behave like workers sharing a database.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory saga store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of hot records.
    pub async fn hot_count(&self) -> usize {
        self.tables.read().await.hot.len()
    }

    /// Returns the number of archived records.
    pub async fn archived_count(&self) -> usize {
        self.tables.read().await.archived.len()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn put(&self, mut record: SagaRecord, expected: Version) -> Result<Version> {
        let correlation_id = record.correlation_id;
        let mut tables = self.tables.write().await;

        if tables.archived.contains_key(&correlation_id) {
            return Err(SagaStoreError::Archived(correlation_id));
        }

        let actual = tables
            .hot
            .get(&correlation_id)
            .map(|r| r.version)
            .unwrap_or(Version::initial());

        if actual != expected {
            return Err(SagaStoreError::ConcurrencyConflict {
                correlation_id,
                expected,
                actual,
            });
        }

        let next = expected.next();
        record.version = next;
        tables.hot.insert(correlation_id, record);

        Ok(next)
    }

    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>> {
        Ok(self.tables.read().await.hot.get(&correlation_id).cloned())
    }

    async fn list_by_state(&self, state: &str) -> Result<Vec<SagaRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .hot
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    async fn list_with_pending_outbox(&self) -> Result<Vec<SagaRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .hot
            .values()
            .filter(|r| r.outbox_pending)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    async fn archive(&self, correlation_id: CorrelationId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .hot
            .remove(&correlation_id)
            .ok_or(SagaStoreError::NotFound(correlation_id))?;
        tables.archived.insert(correlation_id, record);
        Ok(())
    }

    async fn get_archived(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>> {
        Ok(self.tables.read().await.archived.get(&correlation_id).cloned())
    }
}
