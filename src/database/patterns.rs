//! Remediation-pattern queries (the Learner's durable half).

use chrono::Utc;
use sqlx::Row;

use crate::errors::JarvisError;

use super::records::{NewRemediationPattern, RemediationPattern};
use super::Store;

impl Store {
    /// Inserts a pattern for `(alert_name, symptom_fingerprint)`, or — if
    /// one already exists — folds this occurrence into it by incrementing
    /// `success_count` and recomputing confidence via the same Bayesian
    /// rule `update_pattern_outcome` uses for a success. Calling this
    /// twice with the same key is therefore additive, never overwriting.
    pub async fn upsert_pattern(&self, pattern: &NewRemediationPattern) -> Result<i64, JarvisError> {
        let now = Utc::now();
        let commands = serde_json::to_string(&pattern.solution_commands)
            .map_err(|e| JarvisError::Other(anyhow::anyhow!("failed to serialize commands: {e}")))?;

        let existing: Option<(i64, i64, i64)> = sqlx::query_as(
            "SELECT id, success_count, failure_count FROM remediation_patterns WHERE alert_name = ? AND symptom_fingerprint = ?",
        )
        .bind(&pattern.alert_name)
        .bind(&pattern.symptom_fingerprint)
        .fetch_optional(self.pool())
        .await?;

        if let Some((id, success_count, failure_count)) = existing {
            let new_success = success_count + 1;
            let confidence = new_success as f64 / (new_success + failure_count) as f64;
            sqlx::query(
                r#"
                UPDATE remediation_patterns
                SET success_count = ?, confidence = ?, usage_count = usage_count + 1,
                    updated_at = ?, last_used_at = ?
                WHERE id = ?
                "#,
            )
            .bind(new_success)
            .bind(confidence)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?;
            Ok(id)
        } else {
            let result = sqlx::query(
                r#"
                INSERT INTO remediation_patterns (
                    alert_name, category, symptom_fingerprint, root_cause, solution_commands,
                    target_host, risk_level, confidence, success_count, failure_count,
                    usage_count, avg_execution_time_s, enabled, created_by, created_at, updated_at,
                    last_used_at, metadata
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 0, 1, 0, 1, ?, ?, ?, ?, '{}')
                "#,
            )
            .bind(&pattern.alert_name)
            .bind(&pattern.category)
            .bind(&pattern.symptom_fingerprint)
            .bind(&pattern.root_cause)
            .bind(commands)
            .bind(&pattern.target_host)
            .bind(&pattern.risk_level)
            .bind(pattern.confidence)
            .bind(&pattern.created_by)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(self.pool())
            .await?;
            Ok(result.last_insert_rowid())
        }
    }

    /// Enabled patterns for `alert_name`, for the Learner's match step.
    pub async fn find_patterns(&self, alert_name: &str) -> Result<Vec<RemediationPattern>, JarvisError> {
        let rows = sqlx::query(
            "SELECT * FROM remediation_patterns WHERE alert_name = ? AND enabled = 1",
        )
        .bind(alert_name)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_pattern).collect()
    }

    pub async fn get_pattern(&self, id: i64) -> Result<Option<RemediationPattern>, JarvisError> {
        let row = sqlx::query("SELECT * FROM remediation_patterns WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_pattern).transpose()
    }

    /// Sorted by confidence descending, for the `/patterns` endpoint.
    pub async fn list_patterns(
        &self,
        min_confidence: f64,
        limit: i64,
    ) -> Result<Vec<RemediationPattern>, JarvisError> {
        let rows = sqlx::query(
            "SELECT * FROM remediation_patterns WHERE confidence >= ? ORDER BY confidence DESC LIMIT ?",
        )
        .bind(min_confidence)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_pattern).collect()
    }

    /// Applies the Bayesian confidence update after an outcome tied to
    /// pattern `id`, per the learner's update rule:
    /// success → `confidence = (success_count+1)/(success_count+failure_count+1)`;
    /// failure → `confidence = success_count/(success_count+failure_count+1)`.
    /// `usage_count` and `avg_execution_time_s` are always updated.
    pub async fn update_pattern_outcome(
        &self,
        id: i64,
        success: bool,
        execution_time_s: f64,
    ) -> Result<(), JarvisError> {
        let row: (i64, i64, i64, f64) = sqlx::query_as(
            "SELECT success_count, failure_count, usage_count, avg_execution_time_s FROM remediation_patterns WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await?;
        let (success_count, failure_count, usage_count, avg_execution_time_s) = row;

        let (new_success, new_failure) = if success {
            (success_count + 1, failure_count)
        } else {
            (success_count, failure_count + 1)
        };
        // Both branches reduce to the same expression: the spec's
        // `(old_success [+1]) / (old_success + old_failure + 1)` becomes
        // `new_success / (new_success + new_failure)` once whichever count
        // was incremented is folded in — e.g. 4 success/0 failure plus one
        // more success gives 5/5 = 1.00, not 5/6.
        let confidence = new_success as f64 / (new_success + new_failure) as f64;
        let new_usage = usage_count + 1;
        let new_avg = (avg_execution_time_s * usage_count as f64 + execution_time_s) / new_usage as f64;

        sqlx::query(
            r#"
            UPDATE remediation_patterns
            SET success_count = ?, failure_count = ?, confidence = ?, usage_count = ?,
                avg_execution_time_s = ?, updated_at = ?, last_used_at = ?
            WHERE id = ?
            "#,
        )
        .bind(new_success)
        .bind(new_failure)
        .bind(confidence)
        .bind(new_usage)
        .bind(new_avg)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(())
    }
}

fn row_to_pattern(row: &sqlx::sqlite::SqliteRow) -> Result<RemediationPattern, JarvisError> {
    let commands_raw: String = row.try_get("solution_commands")?;
    let metadata_raw: String = row.try_get("metadata")?;

    Ok(RemediationPattern {
        id: row.try_get("id")?,
        alert_name: row.try_get("alert_name")?,
        category: row.try_get("category")?,
        symptom_fingerprint: row.try_get("symptom_fingerprint")?,
        root_cause: row.try_get("root_cause")?,
        solution_commands: serde_json::from_str(&commands_raw).unwrap_or_default(),
        target_host: row.try_get("target_host")?,
        risk_level: row.try_get("risk_level")?,
        confidence: row.try_get("confidence")?,
        success_count: row.try_get("success_count")?,
        failure_count: row.try_get("failure_count")?,
        usage_count: row.try_get("usage_count")?,
        avg_execution_time_s: row.try_get("avg_execution_time_s")?,
        enabled: row.try_get("enabled")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_used_at: row.try_get("last_used_at")?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Store;

    fn new_pattern(fingerprint: &str) -> NewRemediationPattern {
        NewRemediationPattern {
            alert_name: "ContainerUnhealthy".to_string(),
            category: "container".to_string(),
            symptom_fingerprint: fingerprint.to_string(),
            root_cause: "unhealthy container".to_string(),
            solution_commands: vec!["docker restart frigate".to_string()],
            target_host: Some("nexus".to_string()),
            risk_level: "low".to_string(),
            confidence: 0.8,
            created_by: "learner".to_string(),
        }
    }

    /// Scenario 5 in spec.md §8: seeding `success_count=4, failure_count=0`
    /// then recording one more success must land confidence at exactly
    /// 5/5 = 1.00, not 5/6.
    #[tokio::test]
    async fn success_outcome_matches_scenario_five_confidence() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let id = store.upsert_pattern(&new_pattern("fp")).await.unwrap();
        for _ in 0..3 {
            store.update_pattern_outcome(id, true, 1.0).await.unwrap();
        }
        let pattern = store.get_pattern(id).await.unwrap().unwrap();
        assert_eq!(pattern.success_count, 4);
        assert_eq!(pattern.failure_count, 0);
        assert!((pattern.confidence - 1.0).abs() < 1e-9, "confidence was {}", pattern.confidence);
    }

    /// R3: a failure outcome applies the Bayesian update rule from
    /// spec.md §4.7 exactly: confidence = success_count / (success_count +
    /// failure_count + 1) computed on the pre-update counts.
    #[tokio::test]
    async fn failure_outcome_applies_bayesian_update_rule() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let id = store.upsert_pattern(&new_pattern("fp")).await.unwrap();
        store.update_pattern_outcome(id, true, 1.0).await.unwrap();
        store.update_pattern_outcome(id, true, 1.0).await.unwrap();
        // success_count=3, failure_count=0 going into this failure.
        store.update_pattern_outcome(id, false, 1.0).await.unwrap();
        let pattern = store.get_pattern(id).await.unwrap().unwrap();
        assert_eq!(pattern.success_count, 3);
        assert_eq!(pattern.failure_count, 1);
        assert!((pattern.confidence - 0.75).abs() < 1e-9, "confidence was {}", pattern.confidence);
    }

    /// R1: upserting the same `(alert_name, symptom_fingerprint)` twice
    /// folds into one row whose counts sum both occurrences rather than
    /// creating a duplicate.
    #[tokio::test]
    async fn upsert_pattern_is_additive_on_the_same_key() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let first_id = store.upsert_pattern(&new_pattern("fp")).await.unwrap();
        let second_id = store.upsert_pattern(&new_pattern("fp")).await.unwrap();
        assert_eq!(first_id, second_id);

        let pattern = store.get_pattern(first_id).await.unwrap().unwrap();
        assert_eq!(pattern.success_count, 2);
        assert_eq!(pattern.usage_count, 2);

        let all = store.find_patterns("ContainerUnhealthy").await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
