//! Postgres-backed checkpoint store

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::CheckpointStore;
use crate::error::{RelayError, RelayResult};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Checkpoint rows in the `relay_checkpoints` table, one per relay key
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, migrate and wrap the pool
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn to_db(block: u64) -> RelayResult<i64> {
    i64::try_from(block)
        .map_err(|_| RelayError::Checkpoint(format!("block {} exceeds BIGINT range", block)))
}

fn from_db(block: i64) -> RelayResult<u64> {
    u64::try_from(block)
        .map_err(|_| RelayError::Checkpoint(format!("negative checkpoint {} in database", block)))
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, key: &str) -> RelayResult<Option<u64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"SELECT last_processed_block FROM relay_checkpoints WHERE relay_key = $1"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Checkpoint(format!("failed to load {}: {}", key, e)))?;

        row.map(|(block,)| from_db(block)).transpose()
    }

    async fn load_or_default(&self, key: &str, default: u64) -> RelayResult<u64> {
        sqlx::query(
            r#"
            INSERT INTO relay_checkpoints (relay_key, last_processed_block)
            VALUES ($1, $2)
            ON CONFLICT (relay_key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(to_db(default)?)
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Checkpoint(format!("failed to initialise {}: {}", key, e)))?;

        let row: (i64,) = sqlx::query_as(
            r#"SELECT last_processed_block FROM relay_checkpoints WHERE relay_key = $1"#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RelayError::Checkpoint(format!("failed to load {}: {}", key, e)))?;

        from_db(row.0)
    }

    async fn compare_and_set(&self, key: &str, expected: u64, new: u64) -> RelayResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE relay_checkpoints
            SET last_processed_block = $3, updated_at = NOW()
            WHERE relay_key = $1 AND last_processed_block = $2
            "#,
        )
        .bind(key)
        .bind(to_db(expected)?)
        .bind(to_db(new)?)
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Checkpoint(format!("failed to update {}: {}", key, e)))?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_conversions() {
        assert_eq!(to_db(42).unwrap(), 42);
        assert!(to_db(u64::MAX).is_err());
        assert_eq!(from_db(7).unwrap(), 7);
        assert!(from_db(-1).is_err());
    }
}
