//! Schema bootstrap for the job store.
//!
//! Applies the scheduler's schema idempotently and tracks what has been
//! applied in a `_migrations` table, so `crash-monitor migrate` can run
//! repeatedly (and against an already-provisioned database) without error.

use sqlx::PgPool;
use thiserror::Error;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration script failed to execute.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// DDL for the scheduler's tables.
///
/// `priority_claims` is the per-owner claim record: which processor
/// currently holds each expedited artifact. Claims follow their owner; a
/// dead owner's claims are requeued as priority requests by the sweep.
fn schema_statements() -> Vec<&'static str> {
    vec![
        r#"
        CREATE TABLE IF NOT EXISTS processors (
            id INTEGER PRIMARY KEY,
            last_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            uuid TEXT PRIMARY KEY,
            owner INTEGER NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            queued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            outcome TEXT
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS jobs_owner_open_idx
            ON jobs (owner) WHERE outcome IS NULL
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS jobs_queued_at_idx ON jobs (queued_at)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS priority_requests (
            uuid TEXT PRIMARY KEY
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS priority_claims (
            owner INTEGER NOT NULL,
            uuid TEXT NOT NULL,
            PRIMARY KEY (owner, uuid)
        )
        "#,
    ]
}

/// Migration runner for applying schema changes.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    /// Creates a new migration runner.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending migrations.
    ///
    /// Idempotent: already-applied statements are skipped, and the
    /// statements themselves use IF NOT EXISTS clauses.
    pub async fn run_migrations(&self) -> Result<(), MigrationError> {
        self.ensure_migrations_table().await?;

        for (idx, statement) in schema_statements().iter().enumerate() {
            let migration_name = format!("scheduler_v1_part_{}", idx);

            if !self.is_migration_applied(&migration_name).await? {
                self.apply_migration(&migration_name, statement).await?;
                tracing::info!(migration = %migration_name, "Applied migration");
            }
        }

        Ok(())
    }

    /// Ensures the migrations tracking table exists.
    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Checks if a migration has already been applied.
    async fn is_migration_applied(&self, name: &str) -> Result<bool, MigrationError> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result.is_some())
    }

    /// Applies a single migration inside a transaction.
    async fn apply_migration(&self, name: &str, sql: &str) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::MigrationFailed(format!("{}: {}", name, e)))?;

        sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Resets the database by dropping all scheduler tables.
    ///
    /// **WARNING**: This will destroy all data! Use only in development/testing.
    pub async fn reset_database(&self) -> Result<(), MigrationError> {
        let drop_statements = [
            "DROP TABLE IF EXISTS priority_claims CASCADE",
            "DROP TABLE IF EXISTS priority_requests CASCADE",
            "DROP TABLE IF EXISTS jobs CASCADE",
            "DROP TABLE IF EXISTS processors CASCADE",
            "DROP TABLE IF EXISTS _migrations CASCADE",
        ];

        for statement in drop_statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| MigrationError::MigrationFailed(format!("Drop failed: {}", e)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_display() {
        let err = MigrationError::MigrationFailed("test error".to_string());
        assert!(err.to_string().contains("test error"));
    }

    #[test]
    fn test_schema_covers_all_tables() {
        let ddl = schema_statements().join("\n");
        for table in ["jobs", "processors", "priority_requests", "priority_claims"] {
            assert!(ddl.contains(table), "missing DDL for {}", table);
        }
    }
}
