//! Suppression-window queries (the Suppressor's durable half).

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::errors::JarvisError;

use super::records::Suppression;
use super::Store;

impl Store {
    pub async fn create_suppression(
        &self,
        root_cause_alert: &str,
        root_cause_instance: &str,
        suppressed_until: DateTime<Utc>,
        reason: &str,
    ) -> Result<i64, JarvisError> {
        let result = sqlx::query(
            r#"
            INSERT INTO suppressions (root_cause_alert, root_cause_instance, suppressed_until, reason)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(root_cause_alert)
        .bind(root_cause_instance)
        .bind(suppressed_until)
        .bind(reason)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Active suppressions covering `instance_key`, i.e. not yet expired.
    pub async fn active_suppressions(
        &self,
        instance_key: &str,
    ) -> Result<Vec<Suppression>, JarvisError> {
        let rows = sqlx::query(
            "SELECT * FROM suppressions WHERE root_cause_instance = ? AND suppressed_until > ?",
        )
        .bind(instance_key)
        .bind(Utc::now())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_suppression).collect()
    }

    /// Every unexpired suppression row, across all hosts — used once at
    /// startup to rehydrate the in-memory cache (spec.md §9).
    pub async fn list_active_suppressions(&self) -> Result<Vec<Suppression>, JarvisError> {
        let rows = sqlx::query("SELECT * FROM suppressions WHERE suppressed_until > ?")
            .bind(Utc::now())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_suppression).collect()
    }

    /// Deletes suppressions whose window has passed, returning the count
    /// removed. Called periodically to keep the table from growing
    /// unbounded; harmless to skip for any number of cycles since expired
    /// rows are already excluded by `active_suppressions`.
    pub async fn prune_expired_suppressions(&self) -> Result<u64, JarvisError> {
        let result = sqlx::query("DELETE FROM suppressions WHERE suppressed_until <= ?")
            .bind(Utc::now())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Unconditionally deletes every suppression row for `host`, expired or
    /// not — called on `host_recovered` (spec.md §4.3/§4.8), as distinct
    /// from `prune_expired_suppressions`' expiry-only sweep. A row created
    /// moments before recovery with a `suppressed_until` still minutes out
    /// must not survive this call.
    pub async fn clear_suppressions_for_host(&self, host: &str) -> Result<u64, JarvisError> {
        let result = sqlx::query("DELETE FROM suppressions WHERE root_cause_instance = ?")
            .bind(host)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_suppression(row: &sqlx::sqlite::SqliteRow) -> Result<Suppression, JarvisError> {
    Ok(Suppression {
        id: row.try_get("id")?,
        root_cause_alert: row.try_get("root_cause_alert")?,
        root_cause_instance: row.try_get("root_cause_instance")?,
        suppressed_until: row.try_get("suppressed_until")?,
        reason: row.try_get("reason")?,
    })
}
