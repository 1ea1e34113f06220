use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CorrelationId, Result, SagaRecord, SagaStoreError, Version,
    store::SagaStore,
};

const COLUMNS: &str = "correlation_id, saga_type, state, version, created_at, updated_at, next_deadline, outbox_pending, payload";

/// PostgreSQL-backed saga store.
///
/// Compare-and-swap is a conditional `UPDATE ... WHERE version = $expected`;
/// creation is an `INSERT` guarded by the primary key and by the archive
/// table.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and returns a store over a fresh pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        Ok(SagaRecord {
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            saga_type: row.try_get("saga_type")?,
            state: row.try_get("state")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            next_deadline: row.try_get("next_deadline")?,
            outbox_pending: row.try_get("outbox_pending")?,
            payload: row.try_get("payload")?,
        })
    }

    async fn insert_new(&self, record: &SagaRecord, next: Version) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let archived: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM saga_instances_archive WHERE correlation_id = $1",
        )
        .bind(record.correlation_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if archived.is_some() {
            return Err(SagaStoreError::Archived(record.correlation_id));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO saga_instances
                (correlation_id, saga_type, state, version, created_at, updated_at, next_deadline, outbox_pending, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (correlation_id) DO NOTHING
            "#,
        )
        .bind(record.correlation_id.as_uuid())
        .bind(&record.saga_type)
        .bind(&record.state)
        .bind(next.as_i64())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.next_deadline)
        .bind(record.outbox_pending)
        .bind(&record.payload)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let actual: i64 =
                sqlx::query_scalar("SELECT version FROM saga_instances WHERE correlation_id = $1")
                    .bind(record.correlation_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(SagaStoreError::ConcurrencyConflict {
                correlation_id: record.correlation_id,
                expected: Version::initial(),
                actual: Version::new(actual),
            });
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn put(&self, record: SagaRecord, expected: Version) -> Result<Version> {
        let correlation_id = record.correlation_id;
        let next = expected.next();

        if expected == Version::initial() {
            self.insert_new(&record, next).await?;
            return Ok(next);
        }

        let updated = sqlx::query(
            r#"
            UPDATE saga_instances
            SET state = $3, version = $4, updated_at = $5, next_deadline = $6,
                outbox_pending = $7, payload = $8
            WHERE correlation_id = $1 AND version = $2
            "#,
        )
        .bind(correlation_id.as_uuid())
        .bind(expected.as_i64())
        .bind(&record.state)
        .bind(next.as_i64())
        .bind(record.updated_at)
        .bind(record.next_deadline)
        .bind(record.outbox_pending)
        .bind(&record.payload)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM saga_instances WHERE correlation_id = $1")
                    .bind(correlation_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(SagaStoreError::ConcurrencyConflict {
                correlation_id,
                expected,
                actual: actual.map(Version::new).unwrap_or(Version::initial()),
            });
        }

        Ok(next)
    }

    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM saga_instances WHERE correlation_id = $1"
        ))
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn list_by_state(&self, state: &str) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM saga_instances WHERE state = $1 ORDER BY updated_at ASC"
        ))
        .bind(state)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn list_with_pending_outbox(&self) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM saga_instances WHERE outbox_pending ORDER BY updated_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn archive(&self, correlation_id: CorrelationId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(&format!(
            r#"
            WITH moved AS (
                DELETE FROM saga_instances WHERE correlation_id = $1
                RETURNING {COLUMNS}
            )
            INSERT INTO saga_instances_archive ({COLUMNS})
            SELECT {COLUMNS} FROM moved
            "#
        ))
        .bind(correlation_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            return Err(SagaStoreError::NotFound(correlation_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_archived(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM saga_instances_archive WHERE correlation_id = $1"
        ))
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }
}
