//! Migration runner.
//!
//! On every process start, scans `migrations/` for `NN_description.sql`
//! files, applies any not recorded in `schema_migrations` in ascending
//! filename order, and records filename/checksum/execution time/error. A
//! failed migration aborts startup. Every `.sql` file must be idempotent
//! (`IF NOT EXISTS` everywhere) — the runner itself does not retry a failed
//! file, it just records the failure and returns an error.

use crate::error::{EngineError, Result};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::path::Path;
use std::time::Instant;

/// Ensures the `schema_migrations` ledger table exists, then applies every
/// pending migration file under `migrations_dir` in ascending filename
/// order. Returns the filenames actually applied this run (empty on a
/// fully up-to-date database, since re-running is always safe).
pub async fn run(pool: &PgPool, migrations_dir: &Path) -> Result<Vec<String>> {
    ensure_ledger_table(pool).await?;

    let mut entries: Vec<_> = std::fs::read_dir(migrations_dir)
        .map_err(|e| {
            EngineError::Configuration(format!(
                "cannot read migrations dir {}: {e}",
                migrations_dir.display()
            ))
        })?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "sql")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut applied = Vec::new();
    for entry in entries {
        let filename = entry.file_name().to_string_lossy().to_string();
        let already_applied: Option<(bool,)> =
            sqlx::query_as("SELECT success FROM schema_migrations WHERE filename = $1")
                .bind(&filename)
                .fetch_optional(pool)
                .await?;

        if let Some((true,)) = already_applied {
            tracing::debug!(filename, "migration already applied, skipping");
            continue;
        }

        let sql = std::fs::read_to_string(entry.path()).map_err(|e| {
            EngineError::Configuration(format!("cannot read {filename}: {e}"))
        })?;
        let checksum = format!("{:x}", Sha256::digest(sql.as_bytes()));

        let start = Instant::now();
        let outcome = apply_one(pool, &sql).await;
        let elapsed_ms = start.elapsed().as_millis() as i64;

        match outcome {
            Ok(()) => {
                record(pool, &filename, &checksum, elapsed_ms, true, None).await?;
                tracing::info!(filename, elapsed_ms, "migration applied");
                applied.push(filename);
            }
            Err(e) => {
                let err_msg = e.to_string();
                record(pool, &filename, &checksum, elapsed_ms, false, Some(&err_msg)).await?;
                return Err(EngineError::Configuration(format!(
                    "migration {filename} failed: {err_msg}"
                )));
            }
        }
    }

    Ok(applied)
}

async fn apply_one(pool: &PgPool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::raw_sql(sql).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

async fn ensure_ledger_table(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            filename TEXT PRIMARY KEY,
            checksum TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            success BOOLEAN NOT NULL,
            execution_time_ms BIGINT NOT NULL,
            error_message TEXT
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn record(
    pool: &PgPool,
    filename: &str,
    checksum: &str,
    elapsed_ms: i64,
    success: bool,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO schema_migrations (filename, checksum, applied_at, success, execution_time_ms, error_message)
         VALUES ($1, $2, now(), $3, $4, $5)
         ON CONFLICT (filename) DO UPDATE SET
            checksum = EXCLUDED.checksum,
            applied_at = EXCLUDED.applied_at,
            success = EXCLUDED.success,
            execution_time_ms = EXCLUDED.execution_time_ms,
            error_message = EXCLUDED.error_message",
    )
    .bind(filename)
    .bind(checksum)
    .bind(success)
    .bind(elapsed_ms)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_for_identical_content() {
        let a = format!("{:x}", Sha256::digest(b"create table foo ();"));
        let b = format!("{:x}", Sha256::digest(b"create table foo ();"));
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_differs_for_different_content() {
        let a = format!("{:x}", Sha256::digest(b"create table foo ();"));
        let b = format!("{:x}", Sha256::digest(b"create table bar ();"));
        assert_ne!(a, b);
    }
}
