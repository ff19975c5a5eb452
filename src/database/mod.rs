//! Persistence layer (the Store).
//!
//! SQLite via `sqlx`, reached exclusively through runtime `sqlx::query`
//! calls — no compile-time `query!` macros, so no live database is needed
//! to build this module. Schema is created idempotently on startup rather
//! than through migration files.
//!
//! Submodules add methods to `Store` by domain, the same split the
//! `health`/`maintenance` modules use for `Database` elsewhere in the
//! pack: `attempts`, `patterns`, `hosts`, `suppressions`, `handoffs`,
//! `maintenance`.

mod analytics;
mod attempts;
mod handoffs;
mod hosts;
mod maintenance;
mod patterns;
pub mod records;
mod suppressions;

pub use analytics::AnalyticsSummary;

pub use records::*;

use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{error, info, warn};

use crate::constants::retry;
use crate::errors::JarvisError;

pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Connects with exponential backoff (1,2,4,8,16,30s; up to 10
    /// attempts) so the service can start alongside a database that is
    /// still initializing.
    pub async fn connect(database_url: &str) -> Result<Self, JarvisError> {
        let mut attempt = 0u32;
        let pool = loop {
            attempt += 1;
            match SqlitePool::connect(database_url).await {
                Ok(pool) => break pool,
                Err(e) => {
                    if attempt >= retry::STORE_CONNECT_MAX_ATTEMPTS {
                        error!("giving up connecting to the store after {attempt} attempts: {e}");
                        return Err(JarvisError::StoreUnavailable(e.to_string()));
                    }
                    let delay = retry::STORE_CONNECT_BACKOFF_S
                        [(attempt as usize - 1).min(retry::STORE_CONNECT_BACKOFF_S.len() - 1)];
                    warn!(
                        "store connection attempt {attempt} failed ({e}), retrying in {delay}s"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                }
            }
        };

        let store = Self { pool };
        store.initialize_tables().await?;
        info!("store connected and schema ensured");
        Ok(store)
    }

    async fn initialize_tables(&self) -> Result<(), JarvisError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS remediation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts DATETIME NOT NULL,
                alert_name TEXT NOT NULL,
                instance_key TEXT NOT NULL,
                severity TEXT NOT NULL,
                labels TEXT NOT NULL,
                annotations TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                analysis TEXT NOT NULL,
                reasoning TEXT NOT NULL,
                commands TEXT NOT NULL,
                success BOOLEAN NOT NULL,
                error TEXT,
                duration_s REAL NOT NULL,
                ssh_host TEXT NOT NULL,
                pattern_id INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_remediation_log_key ON remediation_log(alert_name, instance_key, ts)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS remediation_patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_name TEXT NOT NULL,
                category TEXT NOT NULL,
                symptom_fingerprint TEXT NOT NULL,
                root_cause TEXT NOT NULL,
                solution_commands TEXT NOT NULL,
                target_host TEXT,
                risk_level TEXT NOT NULL,
                confidence REAL NOT NULL,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                usage_count INTEGER NOT NULL DEFAULT 0,
                avg_execution_time_s REAL NOT NULL DEFAULT 0,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                created_by TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                last_used_at DATETIME,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_patterns_fingerprint ON remediation_patterns(alert_name, symptom_fingerprint)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS host_status_log (
                host_name TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_success DATETIME,
                last_attempt DATETIME,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS suppressions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                root_cause_alert TEXT NOT NULL,
                root_cause_instance TEXT NOT NULL,
                suppressed_until DATETIME NOT NULL,
                reason TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_suppressions_instance ON suppressions(root_cause_instance)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS maintenance_windows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start DATETIME NOT NULL,
                end DATETIME NOT NULL,
                reason TEXT NOT NULL,
                created_by TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS self_preservation_handoffs (
                handoff_id TEXT PRIMARY KEY,
                restart_target TEXT NOT NULL,
                reason TEXT NOT NULL,
                context TEXT NOT NULL,
                status TEXT NOT NULL,
                callback_url TEXT,
                executor_id TEXT,
                error TEXT,
                created_at DATETIME NOT NULL,
                completed_at DATETIME
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The self-restart mutex: at most one row may be in an active
        // status at a time. SQLite partial unique indexes enforce this at
        // the backend rather than through application scheduling.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_handoffs_single_active
            ON self_preservation_handoffs((1))
            WHERE status IN ('pending', 'in_progress')
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Store {
        Store::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn schema_creates_all_tables() {
        let store = test_store().await;
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();

        for expected in [
            "host_status_log",
            "maintenance_windows",
            "remediation_log",
            "remediation_patterns",
            "self_preservation_handoffs",
            "suppressions",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }
}
