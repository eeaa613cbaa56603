//! Embedding sink writing one vector per resource into Postgres.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use mediaflow_ai::{AiError, EmbeddingSink};
use mediaflow_cache::Embedding;
use mediaflow_core::ResourceId;

pub const RESOURCE_EMBEDDINGS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS resource_embeddings (
    resource_id   BIGINT PRIMARY KEY,
    model         TEXT NOT NULL,
    dimensions    INTEGER NOT NULL,
    embedding     REAL[] NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Stores the latest vector per resource; a re-run replaces the previous one.
#[derive(Debug, Clone)]
pub struct PostgresEmbeddingSink {
    pool: PgPool,
    model: String,
}

impl PostgresEmbeddingSink {
    pub fn new(pool: PgPool, model: impl Into<String>) -> Self {
        Self {
            pool,
            model: model.into(),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), AiError> {
        sqlx::query(RESOURCE_EMBEDDINGS_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl EmbeddingSink for PostgresEmbeddingSink {
    #[instrument(skip_all, fields(resource_id = %resource_id, dimensions = embedding.len()), err)]
    async fn store(&self, resource_id: ResourceId, embedding: &Embedding) -> Result<(), AiError> {
        if embedding.is_empty() {
            return Err(AiError::InvalidInput("refusing to store an empty embedding".into()));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(AiError::InvalidInput("embedding contains non-finite values".into()));
        }
        let dimensions = i32::try_from(embedding.len())
            .map_err(|_| AiError::InvalidInput(format!("{} dimensions", embedding.len())))?;

        sqlx::query(
            r#"
            INSERT INTO resource_embeddings (resource_id, model, dimensions, embedding, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (resource_id) DO UPDATE SET
                model = EXCLUDED.model,
                dimensions = EXCLUDED.dimensions,
                embedding = EXCLUDED.embedding,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(resource_id.get())
        .bind(&self.model)
        .bind(dimensions)
        .bind(embedding.as_slice())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("store", e))?;

        debug!(model = %self.model, "embedding stored");
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AiError {
    match err {
        sqlx::Error::Database(db_err) => {
            AiError::Internal(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            AiError::Unavailable(format!("embedding store {operation}: {err}"))
        }
        other => AiError::Internal(format!("{operation}: {other}")),
    }
}
