//! Self-restart handoff queries (SelfPreserver's durable half).
//!
//! The single-active-handoff invariant is enforced by a partial unique
//! index (see `initialize_tables`), not application-level locking:
//! `create_handoff` turns the resulting constraint violation into
//! `JarvisError::HandoffConflict` rather than the generic store error.

use chrono::Utc;
use sqlx::Row;

use crate::errors::JarvisError;

use super::records::{HandoffStatus, SelfRestartHandoff};
use super::Store;

impl Store {
    pub async fn create_handoff(
        &self,
        handoff_id: &str,
        restart_target: &str,
        reason: &str,
        context: &serde_json::Value,
        callback_url: Option<&str>,
    ) -> Result<(), JarvisError> {
        let result = sqlx::query(
            r#"
            INSERT INTO self_preservation_handoffs (
                handoff_id, restart_target, reason, context, status, callback_url,
                executor_id, error, created_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, ?, NULL)
            "#,
        )
        .bind(handoff_id)
        .bind(restart_target)
        .bind(reason)
        .bind(context.to_string())
        .bind(HandoffStatus::Pending.as_str())
        .bind(callback_url)
        .bind(Utc::now())
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(JarvisError::HandoffConflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_handoff(&self, handoff_id: &str) -> Result<Option<SelfRestartHandoff>, JarvisError> {
        let row = sqlx::query("SELECT * FROM self_preservation_handoffs WHERE handoff_id = ?")
            .bind(handoff_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_handoff).transpose()
    }

    /// The lone non-terminal handoff, if any — used both to resume after a
    /// restart and to reject a second `initiate` while one is outstanding.
    pub async fn active_handoff(&self) -> Result<Option<SelfRestartHandoff>, JarvisError> {
        let row = sqlx::query(
            "SELECT * FROM self_preservation_handoffs WHERE status IN ('pending', 'in_progress') LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_handoff).transpose()
    }

    pub async fn update_handoff_status(
        &self,
        handoff_id: &str,
        status: HandoffStatus,
        executor_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), JarvisError> {
        let completed_at = status.is_terminal().then(Utc::now);
        sqlx::query(
            r#"
            UPDATE self_preservation_handoffs
            SET status = ?, executor_id = COALESCE(?, executor_id), error = ?, completed_at = ?
            WHERE handoff_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(executor_id)
        .bind(error)
        .bind(completed_at)
        .bind(handoff_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_handoffs(&self, limit: i64) -> Result<Vec<SelfRestartHandoff>, JarvisError> {
        let rows = sqlx::query(
            "SELECT * FROM self_preservation_handoffs ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_handoff).collect()
    }
}

fn row_to_handoff(row: &sqlx::sqlite::SqliteRow) -> Result<SelfRestartHandoff, JarvisError> {
    let status_raw: String = row.try_get("status")?;
    let context_raw: String = row.try_get("context")?;
    Ok(SelfRestartHandoff {
        handoff_id: row.try_get("handoff_id")?,
        restart_target: row.try_get("restart_target")?,
        reason: row.try_get("reason")?,
        context: serde_json::from_str(&context_raw).unwrap_or(serde_json::Value::Null),
        status: HandoffStatus::parse(&status_raw),
        callback_url: row.try_get("callback_url")?,
        executor_id: row.try_get("executor_id")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}
