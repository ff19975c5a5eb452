//! Maintenance-window queries, used by the pipeline's pre-flight check.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::errors::JarvisError;

use super::records::MaintenanceWindow;
use super::Store;

impl Store {
    pub async fn create_maintenance_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reason: &str,
        created_by: &str,
    ) -> Result<i64, JarvisError> {
        let result = sqlx::query(
            "INSERT INTO maintenance_windows (start, end, reason, created_by) VALUES (?, ?, ?, ?)",
        )
        .bind(start)
        .bind(end)
        .bind(reason)
        .bind(created_by)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Whether `at` falls within any recorded maintenance window — the
    /// pipeline skips remediation entirely while this is true.
    pub async fn in_maintenance_window(&self, at: DateTime<Utc>) -> Result<bool, JarvisError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM maintenance_windows WHERE start <= ? AND end >= ?",
        )
        .bind(at)
        .bind(at)
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }

    pub async fn list_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>, JarvisError> {
        let rows = sqlx::query("SELECT * FROM maintenance_windows ORDER BY start DESC")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_window).collect()
    }

    pub async fn delete_maintenance_window(&self, id: i64) -> Result<bool, JarvisError> {
        let result = sqlx::query("DELETE FROM maintenance_windows WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_window(row: &sqlx::sqlite::SqliteRow) -> Result<MaintenanceWindow, JarvisError> {
    Ok(MaintenanceWindow {
        id: row.try_get("id")?,
        start: row.try_get("start")?,
        end: row.try_get("end")?,
        reason: row.try_get("reason")?,
        created_by: row.try_get("created_by")?,
    })
}
