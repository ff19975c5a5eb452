//! Host-status queries (HostMonitor's durable half).

use chrono::Utc;
use sqlx::Row;

use crate::errors::JarvisError;

use super::records::{HostState, HostStatus};
use super::Store;

impl Store {
    pub async fn get_host_status(&self, host_name: &str) -> Result<Option<HostStatus>, JarvisError> {
        let row = sqlx::query("SELECT * FROM host_status_log WHERE host_name = ?")
            .bind(host_name)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_status).transpose()
    }

    pub async fn list_host_statuses(&self) -> Result<Vec<HostStatus>, JarvisError> {
        let rows = sqlx::query("SELECT * FROM host_status_log ORDER BY host_name")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_status).collect()
    }

    /// Records a successful probe/command: resets the failure streak and
    /// marks the host online.
    pub async fn record_host_success(&self, host_name: &str) -> Result<(), JarvisError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO host_status_log (host_name, status, consecutive_failures, last_success, last_attempt, last_error)
            VALUES (?, ?, 0, ?, ?, NULL)
            ON CONFLICT(host_name) DO UPDATE SET
                status = excluded.status,
                consecutive_failures = 0,
                last_success = excluded.last_success,
                last_attempt = excluded.last_attempt,
                last_error = NULL
            "#,
        )
        .bind(host_name)
        .bind(HostState::Online.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Records a failed probe/command, incrementing the failure streak.
    /// The caller decides the resulting `HostState` (e.g. flipping to
    /// `Offline` once the consecutive-failure threshold is crossed) and
    /// passes it in rather than this method guessing at the threshold.
    pub async fn record_host_failure(
        &self,
        host_name: &str,
        new_state: HostState,
        error: &str,
    ) -> Result<i64, JarvisError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO host_status_log (host_name, status, consecutive_failures, last_success, last_attempt, last_error)
            VALUES (?, ?, 1, NULL, ?, ?)
            ON CONFLICT(host_name) DO UPDATE SET
                status = ?,
                consecutive_failures = consecutive_failures + 1,
                last_attempt = ?,
                last_error = ?
            "#,
        )
        .bind(host_name)
        .bind(new_state.as_str())
        .bind(now)
        .bind(error)
        .bind(new_state.as_str())
        .bind(now)
        .bind(error)
        .execute(self.pool())
        .await?;

        let failures: i64 = sqlx::query_scalar(
            "SELECT consecutive_failures FROM host_status_log WHERE host_name = ?",
        )
        .bind(host_name)
        .fetch_one(self.pool())
        .await?;
        Ok(failures)
    }

    pub async fn set_host_status(&self, host_name: &str, status: HostState) -> Result<(), JarvisError> {
        sqlx::query(
            r#"
            INSERT INTO host_status_log (host_name, status, consecutive_failures, last_success, last_attempt, last_error)
            VALUES (?, ?, 0, NULL, NULL, NULL)
            ON CONFLICT(host_name) DO UPDATE SET status = ?
            "#,
        )
        .bind(host_name)
        .bind(status.as_str())
        .bind(status.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

fn row_to_status(row: &sqlx::sqlite::SqliteRow) -> Result<HostStatus, JarvisError> {
    let status_raw: String = row.try_get("status")?;
    Ok(HostStatus {
        host_name: row.try_get("host_name")?,
        status: HostState::parse(&status_raw),
        consecutive_failures: row.try_get("consecutive_failures")?,
        last_success: row.try_get("last_success")?,
        last_attempt: row.try_get("last_attempt")?,
        last_error: row.try_get("last_error")?,
    })
}
