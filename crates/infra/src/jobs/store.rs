//! Job status storage.
//!
//! The status record is what dashboards poll; the processor is its only
//! writer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::instrument;

use mediaflow_core::JobId;

use super::types::{JobRecord, JobStatus, ProcessingResult, RecordVersion};

/// Job status store abstraction.
#[async_trait]
pub trait JobStatusStore: Send + Sync + 'static {
    /// Get a job's current record.
    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, JobStoreError>;

    /// Write `record` unless that would move the stored record backwards
    /// (see [`JobRecord::may_replace`]); a refused write is a `Conflict`.
    async fn upsert(&self, record: &JobRecord) -> Result<(), JobStoreError>;

    /// Write `record` only if the stored record still is `previous`
    /// (`None`: no record yet). Returns whether this call won the claim.
    async fn claim(
        &self,
        record: &JobRecord,
        previous: Option<RecordVersion>,
    ) -> Result<bool, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("corrupt job record: {0}")]
    Corrupt(String),
    #[error("stale write refused: {0}")]
    Conflict(String),
}

/// In-memory job store for tests/dev.
///
/// Keeps every status written per job so tests can assert on the sequence.
#[derive(Debug, Default)]
pub struct InMemoryJobStatusStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
    history: RwLock<HashMap<JobId, Vec<JobStatus>>>,
    failures: RwLock<VecDeque<JobStoreError>>,
    claim_failures: RwLock<VecDeque<JobStoreError>>,
}

impl InMemoryJobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed a record without recording history.
    pub fn insert(&self, record: JobRecord) {
        self.records.write().insert(record.job_id.clone(), record);
    }

    /// Statuses written for `job_id`, consecutive duplicates collapsed.
    pub fn status_history(&self, job_id: &JobId) -> Vec<JobStatus> {
        let history = self.history.read();
        let mut statuses = history.get(job_id).cloned().unwrap_or_default();
        statuses.dedup();
        statuses
    }

    /// Number of writes for `job_id`.
    pub fn write_count(&self, job_id: &JobId) -> usize {
        self.history.read().get(job_id).map_or(0, Vec::len)
    }

    /// Queue a failure for the next `upsert`.
    pub fn fail_next_write(&self, err: JobStoreError) {
        self.failures.write().push_back(err);
    }

    /// Queue a failure for the next `claim`.
    pub fn fail_next_claim(&self, err: JobStoreError) {
        self.claim_failures.write().push_back(err);
    }

    fn store(&self, records: &mut HashMap<JobId, JobRecord>, record: &JobRecord) {
        let mut stamped = record.clone();
        stamped.updated_at = Utc::now();
        self.history
            .write()
            .entry(record.job_id.clone())
            .or_default()
            .push(record.status);
        records.insert(record.job_id.clone(), stamped);
    }
}

#[async_trait]
impl JobStatusStore for InMemoryJobStatusStore {
    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, JobStoreError> {
        Ok(self.records.read().get(job_id).cloned())
    }

    async fn upsert(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        if let Some(err) = self.failures.write().pop_front() {
            return Err(err);
        }
        let mut records = self.records.write();
        if let Some(existing) = records.get(&record.job_id) {
            if !record.may_replace(existing) {
                return Err(conflict(record, Some(existing.version())));
            }
        }
        self.store(&mut records, record);
        Ok(())
    }

    async fn claim(
        &self,
        record: &JobRecord,
        previous: Option<RecordVersion>,
    ) -> Result<bool, JobStoreError> {
        if let Some(err) = self.claim_failures.write().pop_front() {
            return Err(err);
        }
        let mut records = self.records.write();
        if records.get(&record.job_id).map(JobRecord::version) != previous {
            return Ok(false);
        }
        self.store(&mut records, record);
        Ok(true)
    }
}

fn conflict(record: &JobRecord, existing: Option<RecordVersion>) -> JobStoreError {
    let found = existing.map_or_else(
        || "a newer record".to_string(),
        |v| format!("{} (attempt {})", v.status.as_str(), v.attempt),
    );
    JobStoreError::Conflict(format!(
        "{} (attempt {}) would replace {found}",
        record.status.as_str(),
        record.attempt
    ))
}

/// DDL for the status table, applied by [`PostgresJobStatusStore::ensure_schema`].
pub const JOB_STATUS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS document_processing_jobs (
    job_id        TEXT PRIMARY KEY,
    status        TEXT NOT NULL,
    progress_pct  SMALLINT NOT NULL CHECK (progress_pct BETWEEN 0 AND 100),
    stage         TEXT NOT NULL,
    result        JSONB,
    error         TEXT,
    attempt       INTEGER NOT NULL DEFAULT 1,
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Postgres-backed job status store.
#[derive(Debug, Clone)]
pub struct PostgresJobStatusStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// The underlying pool, for other tables that live next to the status table.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connect a small pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the status table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::query(JOB_STATUS_SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl JobStatusStore for PostgresJobStatusStore {
    #[instrument(skip_all, fields(job_id = %job_id), err)]
    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, status, progress_pct, stage, result, error, attempt, updated_at
            FROM document_processing_jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let row = JobStatusRow::from_row(&row)
            .map_err(|e| JobStoreError::Corrupt(format!("failed to read job row: {e}")))?;
        JobRecord::try_from(row).map(Some)
    }

    #[instrument(skip_all, fields(job_id = %record.job_id, status = record.status.as_str()), err)]
    async fn upsert(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let result = encode_result(record)?;
        let written = bind_record(
            sqlx::query(
                r#"
                INSERT INTO document_processing_jobs (
                    job_id, status, progress_pct, stage, result, error, attempt, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                ON CONFLICT (job_id)
                DO UPDATE SET
                    status = EXCLUDED.status,
                    progress_pct = EXCLUDED.progress_pct,
                    stage = EXCLUDED.stage,
                    result = EXCLUDED.result,
                    error = EXCLUDED.error,
                    attempt = EXCLUDED.attempt,
                    updated_at = NOW()
                WHERE document_processing_jobs.attempt < EXCLUDED.attempt
                   OR (document_processing_jobs.attempt = EXCLUDED.attempt
                       AND document_processing_jobs.status NOT IN ('completed', 'failed')
                       AND (CASE EXCLUDED.status WHEN 'queued' THEN 0 WHEN 'processing' THEN 1 ELSE 2 END)
                        >= (CASE document_processing_jobs.status WHEN 'queued' THEN 0 WHEN 'processing' THEN 1 ELSE 2 END))
                "#,
            ),
            record,
            result,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert", e))?
        .rows_affected();

        if written == 0 {
            return Err(conflict(record, None));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(job_id = %record.job_id, attempt = record.attempt), err)]
    async fn claim(
        &self,
        record: &JobRecord,
        previous: Option<RecordVersion>,
    ) -> Result<bool, JobStoreError> {
        let result = encode_result(record)?;
        let query = match previous {
            None => bind_record(
                sqlx::query(
                    r#"
                    INSERT INTO document_processing_jobs (
                        job_id, status, progress_pct, stage, result, error, attempt, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                    ON CONFLICT (job_id) DO NOTHING
                    "#,
                ),
                record,
                result,
            ),
            Some(previous) => bind_record(
                sqlx::query(
                    r#"
                    INSERT INTO document_processing_jobs (
                        job_id, status, progress_pct, stage, result, error, attempt, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                    ON CONFLICT (job_id)
                    DO UPDATE SET
                        status = EXCLUDED.status,
                        progress_pct = EXCLUDED.progress_pct,
                        stage = EXCLUDED.stage,
                        result = EXCLUDED.result,
                        error = EXCLUDED.error,
                        attempt = EXCLUDED.attempt,
                        updated_at = NOW()
                    WHERE document_processing_jobs.status = $8
                      AND document_processing_jobs.attempt = $9
                    "#,
                ),
                record,
                result,
            )
            .bind(previous.status.as_str())
            .bind(previous.attempt as i32),
        };

        let written = query
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim", e))?
            .rows_affected();
        Ok(written == 1)
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// Bind the seven record columns, in table order, as `$1..$7`.
fn bind_record<'q>(
    query: PgQuery<'q>,
    record: &'q JobRecord,
    result: Option<serde_json::Value>,
) -> PgQuery<'q> {
    query
        .bind(record.job_id.as_str())
        .bind(record.status.as_str())
        .bind(i16::from(record.progress_pct))
        .bind(&record.stage)
        .bind(result)
        .bind(record.error.as_deref())
        .bind(record.attempt as i32)
}

fn encode_result(record: &JobRecord) -> Result<Option<serde_json::Value>, JobStoreError> {
    record
        .result
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| JobStoreError::Corrupt(format!("unencodable result: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            JobStoreError::Storage(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::ColumnDecode { index, source } => {
            JobStoreError::Corrupt(format!("column {index} in {operation}: {source}"))
        }
        other => JobStoreError::Storage(format!("{operation}: {other}")),
    }
}

struct JobStatusRow {
    job_id: String,
    status: String,
    progress_pct: i16,
    stage: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
    attempt: i32,
    updated_at: DateTime<Utc>,
}

impl JobStatusRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobStatusRow {
            job_id: row.try_get("job_id")?,
            status: row.try_get("status")?,
            progress_pct: row.try_get("progress_pct")?,
            stage: row.try_get("stage")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            attempt: row.try_get("attempt")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<JobStatusRow> for JobRecord {
    type Error = JobStoreError;

    fn try_from(row: JobStatusRow) -> Result<Self, Self::Error> {
        let job_id = JobId::parse(row.job_id).map_err(|e| JobStoreError::Corrupt(e.to_string()))?;
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| JobStoreError::Corrupt(format!("unknown status '{}'", row.status)))?;
        let result = row
            .result
            .map(serde_json::from_value::<ProcessingResult>)
            .transpose()
            .map_err(|e| JobStoreError::Corrupt(format!("result column: {e}")))?;

        Ok(JobRecord {
            job_id,
            status,
            progress_pct: row.progress_pct.clamp(0, 100) as u8,
            stage: row.stage,
            result,
            error: row.error,
            attempt: row.attempt.max(1) as u32,
            updated_at: row.updated_at,
        })
    }
}
