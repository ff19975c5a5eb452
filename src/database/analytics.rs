//! Analytics summary for the `/analytics` endpoint.
//!
//! A 30-day rollup over `remediation_log`: attempt counts, success rate,
//! and an estimated-savings figure derived from how many of those attempts
//! were pattern bypasses (no LLM call) vs. full analyzer runs.

use serde::Serialize;
use sqlx::Row;

use crate::errors::JarvisError;

use super::Store;

const ANALYTICS_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub window_days: i64,
    pub total_attempts: i64,
    pub successful_attempts: i64,
    pub failed_attempts: i64,
    pub success_rate: f64,
    pub bypassed_attempts: i64,
    pub escalation_candidates: i64,
    /// Attempts that skipped the LLM via a learned pattern — a rough proxy
    /// for LLM calls avoided, since the Analyzer isn't itself metered here.
    pub estimated_llm_calls_saved: i64,
}

impl Store {
    pub async fn analytics_summary(&self) -> Result<AnalyticsSummary, JarvisError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0) AS successes,
                COALESCE(SUM(CASE WHEN pattern_id IS NOT NULL THEN 1 ELSE 0 END), 0) AS bypassed
            FROM remediation_log
            WHERE ts >= datetime('now', ?)
            "#,
        )
        .bind(format!("-{ANALYTICS_WINDOW_DAYS} days"))
        .fetch_one(self.pool())
        .await?;

        let total: i64 = row.try_get("total")?;
        let successes: i64 = row.try_get("successes")?;
        let bypassed: i64 = row.try_get("bypassed")?;
        let failures = total - successes;
        let success_rate = if total > 0 { successes as f64 / total as f64 } else { 0.0 };

        // An escalation candidate is a (alert_name, instance_key) whose
        // most recent attempt in the window failed — a rough count of
        // keys likely to have escalated, without re-running Pipeline's
        // exact N_max logic per key.
        let escalation_candidates: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT alert_name, instance_key, success
                FROM remediation_log r1
                WHERE ts >= datetime('now', ?)
                  AND ts = (
                      SELECT MAX(ts) FROM remediation_log r2
                      WHERE r2.alert_name = r1.alert_name AND r2.instance_key = r1.instance_key
                  )
                  AND success = 0
            )
            "#,
        )
        .bind(format!("-{ANALYTICS_WINDOW_DAYS} days"))
        .fetch_one(self.pool())
        .await?;

        Ok(AnalyticsSummary {
            window_days: ANALYTICS_WINDOW_DAYS,
            total_attempts: total,
            successful_attempts: successes,
            failed_attempts: failures,
            success_rate,
            bypassed_attempts: bypassed,
            escalation_candidates,
            estimated_llm_calls_saved: bypassed,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::database::NewRemediationAttempt;
    use serde_json::json;

    async fn test_store() -> Store {
        Store::connect("sqlite::memory:").await.unwrap()
    }

    fn attempt(success: bool, pattern_id: Option<i64>) -> NewRemediationAttempt {
        NewRemediationAttempt {
            ts: Utc::now(),
            alert_name: "DiskFull".to_string(),
            instance_key: "db-1".to_string(),
            severity: "critical".to_string(),
            labels: json!({}),
            annotations: json!({}),
            attempt_number: 1,
            analysis: String::new(),
            reasoning: String::new(),
            commands: vec![],
            success,
            error: None,
            duration_s: 1.0,
            ssh_host: "db-1".to_string(),
            pattern_id,
        }
    }

    #[tokio::test]
    async fn summarizes_success_rate_and_bypass_count() {
        let store = test_store().await;
        store.record_attempt(&attempt(true, Some(1))).await.unwrap();
        store.record_attempt(&attempt(false, None)).await.unwrap();

        let summary = store.analytics_summary().await.unwrap();
        assert_eq!(summary.total_attempts, 2);
        assert_eq!(summary.successful_attempts, 1);
        assert_eq!(summary.bypassed_attempts, 1);
        assert!((summary.success_rate - 0.5).abs() < 1e-9);
    }
}
