//! Remediation-attempt queries.

use sqlx::Row;

use crate::errors::JarvisError;

use super::records::{NewRemediationAttempt, RemediationAttempt};
use super::Store;

impl Store {
    /// Counts attempts for `(alert_name, instance_key)` within the last
    /// `window_h` hours. Rows outside the window are ignored but retained.
    pub async fn count_attempts(
        &self,
        alert_name: &str,
        instance_key: &str,
        window_h: i64,
    ) -> Result<i64, JarvisError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM remediation_log
            WHERE alert_name = ? AND instance_key = ?
              AND ts >= datetime('now', ?)
            "#,
        )
        .bind(alert_name)
        .bind(instance_key)
        .bind(format!("-{window_h} hours"))
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// Inserts a single attempt row, returning its assigned id.
    pub async fn record_attempt(&self, attempt: &NewRemediationAttempt) -> Result<i64, JarvisError> {
        let labels = attempt.labels.to_string();
        let annotations = attempt.annotations.to_string();
        let commands = serde_json::to_string(&attempt.commands).map_err(|e| {
            JarvisError::Other(anyhow::anyhow!("failed to serialize commands: {e}"))
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO remediation_log (
                ts, alert_name, instance_key, severity, labels, annotations,
                attempt_number, analysis, reasoning, commands, success, error,
                duration_s, ssh_host, pattern_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.ts)
        .bind(&attempt.alert_name)
        .bind(&attempt.instance_key)
        .bind(&attempt.severity)
        .bind(labels)
        .bind(annotations)
        .bind(attempt.attempt_number)
        .bind(&attempt.analysis)
        .bind(&attempt.reasoning)
        .bind(commands)
        .bind(attempt.success)
        .bind(&attempt.error)
        .bind(attempt.duration_s)
        .bind(&attempt.ssh_host)
        .bind(attempt.pattern_id)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Deletes attempt rows within the attempt window for
    /// `(alert_name, instance_key)`, returning the count cleared. This is
    /// the "clean slate on resolve" invariant — rows are deleted, not
    /// marked, and calling it twice in a row is idempotent (the second
    /// call returns 0). Rows older than the window are left in place: they
    /// no longer count toward attempt accounting but are retained for
    /// analytics, same as `count_attempts` ignoring them without deleting
    /// them.
    pub async fn clear_attempts(
        &self,
        alert_name: &str,
        instance_key: &str,
        window_h: i64,
    ) -> Result<u64, JarvisError> {
        let result = sqlx::query(
            r#"
            DELETE FROM remediation_log
            WHERE alert_name = ? AND instance_key = ?
              AND ts >= datetime('now', ?)
            "#,
        )
        .bind(alert_name)
        .bind(instance_key)
        .bind(format!("-{window_h} hours"))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Most recent attempts for `(alert_name, instance_key)`, newest
    /// first — used to build escalation/diagnosis summaries.
    pub async fn get_previous_attempts(
        &self,
        alert_name: &str,
        instance_key: &str,
        limit: i64,
    ) -> Result<Vec<RemediationAttempt>, JarvisError> {
        let rows = sqlx::query(
            r#"
            SELECT id, ts, alert_name, instance_key, severity, labels, annotations,
                   attempt_number, analysis, reasoning, commands, success, error,
                   duration_s, ssh_host, pattern_id
            FROM remediation_log
            WHERE alert_name = ? AND instance_key = ?
            ORDER BY ts DESC
            LIMIT ?
            "#,
        )
        .bind(alert_name)
        .bind(instance_key)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_attempt).collect()
    }
}

fn row_to_attempt(row: &sqlx::sqlite::SqliteRow) -> Result<RemediationAttempt, JarvisError> {
    let labels_raw: String = row.try_get("labels")?;
    let annotations_raw: String = row.try_get("annotations")?;
    let commands_raw: String = row.try_get("commands")?;

    Ok(RemediationAttempt {
        id: row.try_get("id")?,
        ts: row.try_get("ts")?,
        alert_name: row.try_get("alert_name")?,
        instance_key: row.try_get("instance_key")?,
        severity: row.try_get("severity")?,
        labels: serde_json::from_str(&labels_raw).unwrap_or(serde_json::Value::Null),
        annotations: serde_json::from_str(&annotations_raw).unwrap_or(serde_json::Value::Null),
        attempt_number: row.try_get("attempt_number")?,
        analysis: row.try_get("analysis")?,
        reasoning: row.try_get("reasoning")?,
        commands: serde_json::from_str(&commands_raw).unwrap_or_default(),
        success: row.try_get("success")?,
        error: row.try_get("error")?,
        duration_s: row.try_get("duration_s")?,
        ssh_host: row.try_get("ssh_host")?,
        pattern_id: row.try_get("pattern_id")?,
    })
}
