//! Orchestration core (C10): the 16-step algorithm of spec.md §4.9, wired
//! into one `Pipeline::process_alert` call per inbound alert. Every other
//! component (Store, HostMonitor, Suppressor, Learner, Analyzer, Validator,
//! SSHExecutor, Notifier) is a narrow collaborator called in sequence —
//! Pipeline itself holds no state beyond `Arc`s to those collaborators,
//! same composition-root shape as the teacher's `AlertService`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::analyzer::{Analyzer, RemediationPlan};
use crate::config::AppConfig;
use crate::database::{NewRemediationAttempt, NewRemediationPattern, Store};
use crate::errors::JarvisError;
use crate::host_monitor::HostMonitor;
use crate::learner::{self, Decision};
use crate::notifier::{NotificationPayload, Notifier};
use crate::ssh::SshExecutor;
use crate::suppressor::{self, Suppressor};
use crate::validator;
use crate::webhook::AlertPayload;

/// Per-alert outcome, used by the caller (web handler or queue drainer)
/// for logging only — nothing downstream branches on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Resolved,
    SkippedMaintenance,
    Suppressed,
    Escalated,
    DiagnosticOnly,
    HostOffline,
    Rejected,
    Success,
    Failure,
}

pub struct Pipeline {
    config: Arc<AppConfig>,
    store: Arc<Store>,
    host_monitor: Arc<HostMonitor>,
    suppressor: Arc<Suppressor>,
    analyzer: Arc<Analyzer>,
    executor: Arc<SshExecutor>,
    notifier: Arc<Notifier>,
}

impl Pipeline {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<Store>,
        host_monitor: Arc<HostMonitor>,
        suppressor: Arc<Suppressor>,
        analyzer: Arc<Analyzer>,
        executor: Arc<SshExecutor>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self { config, store, host_monitor, suppressor, analyzer, executor, notifier }
    }

    /// Processes a freshly received alert, stamping any persisted attempt
    /// with the current time.
    pub async fn process_alert(&self, alert: AlertPayload) -> Result<Outcome, JarvisError> {
        self.process_alert_at(alert, Utc::now()).await
    }

    /// Processes `alert`, stamping any persisted `RemediationAttempt.ts`
    /// with `ts` rather than the actual processing time. The queue drainer
    /// uses this with the alert's original enqueue time so that a
    /// degraded-mode replay doesn't silently shift the attempt's recorded
    /// timestamp to the (possibly much later) drain time, per spec.md §4.2.
    pub async fn process_alert_at(&self, alert: AlertPayload, ts: chrono::DateTime<Utc>) -> Result<Outcome, JarvisError> {
        let instance_key = alert.instance_key();

        // Step 2: status split.
        if !alert.firing {
            self.store
                .clear_attempts(&alert.alert_name, &instance_key, self.config.attempt_window_hours)
                .await?;
            info!(alert_name = %alert.alert_name, instance_key, "alert resolved, attempts cleared");
            return Ok(Outcome::Resolved);
        }

        let host = alert.label_host();

        // Step 4: maintenance check.
        if self.store.in_maintenance_window(Utc::now()).await? {
            info!(alert_name = %alert.alert_name, instance_key, "inside maintenance window, skipping");
            return Ok(Outcome::SkippedMaintenance);
        }

        // Step 5: suppression check.
        if self.suppressor.is_suppressed(&alert.alert_name, &host).await? {
            info!(alert_name = %alert.alert_name, host, "alert suppressed by active root cause");
            return Ok(Outcome::Suppressed);
        }

        // A root-cause alert firing against an offline host opens a new
        // suppression window for its suppressible children.
        if suppressor::is_root_cause_type(&alert.alert_name) && !self.host_monitor.is_online(&host).await {
            self.suppressor
                .suppress_host(&alert.alert_name, &host, "root cause alert fired against an offline host")
                .await?;
            self.notifier.notify_suppression_summary(&host, 0).await;
        }

        // Step 6: attempt count vs N_max.
        let n = self
            .store
            .count_attempts(&alert.alert_name, &instance_key, self.config.attempt_window_hours)
            .await?;
        if n >= self.config.max_attempts_per_alert {
            self.escalate(&alert, &instance_key, n, "max_attempts_exceeded").await?;
            return Ok(Outcome::Escalated);
        }

        // Step 7-8: learner decision, then plan acquisition.
        let fingerprint = learner::symptom_fingerprint(&alert.alert_name, &alert.labels);
        let candidates = self.store.find_patterns(&alert.alert_name).await?;
        let decision = learner::decide(
            &candidates,
            &fingerprint,
            self.config.learner_high_confidence,
            self.config.learner_medium_confidence,
        );

        let recent_attempts = self
            .store
            .get_previous_attempts(&alert.alert_name, &instance_key, 3)
            .await?;

        // `matched_pattern` carries whichever pattern informed this plan
        // (bypass or hint) so step 14 can update its outcome either way, per
        // spec.md §4.7: "If bypass/hint -> update_pattern_outcome(...)".
        // `is_bypass_host_override` is narrower: only a bypassed pattern's
        // `target_host` overrides host selection in step 11.
        let (plan, matched_pattern, is_bypass_host_override) = match &decision {
            Decision::Bypass(pattern) => (RemediationPlan::from_pattern(pattern), Some(pattern.clone()), true),
            Decision::Hint(pattern) => {
                let plan = self.analyzer.analyze(&alert, &recent_attempts, Some(pattern)).await?;
                (plan, Some(pattern.clone()), false)
            }
            Decision::Miss => {
                let plan = self.analyzer.analyze(&alert, &recent_attempts, None).await?;
                (plan, None, false)
            }
        };

        // Step 9: validation — any rejected command escalates immediately.
        for command in &plan.commands {
            let verdict = validator::validate(command);
            if !verdict.ok {
                let reason = verdict.reason.unwrap_or_else(|| "rejected".to_string());
                warn!(command, reason, "plan command rejected by validator");
                self.notifier
                    .notify_rejection(&NotificationPayload {
                        alert_name: alert.alert_name.clone(),
                        instance_key: instance_key.clone(),
                        severity: alert.severity.clone(),
                        attempt_n: n + 1,
                        max_attempts: self.config.max_attempts_per_alert,
                        commands: plan.commands.clone(),
                        analysis: plan.analysis.clone(),
                        reasoning: plan.reasoning.clone(),
                        error: Some(format!("dangerous_command: {reason}")),
                        ..Default::default()
                    })
                    .await;
                return Ok(Outcome::Rejected);
            }
        }

        // Step 10: classify into diagnostic vs actionable.
        let (diagnostics, actionable): (Vec<String>, Vec<String>) =
            plan.commands.iter().cloned().partition(|c| !validator::is_actionable(c));
        if actionable.is_empty() {
            info!(alert_name = %alert.alert_name, instance_key, "plan has no actionable commands, diagnostic only");
            return Ok(Outcome::DiagnosticOnly);
        }

        // Step 11: host selection.
        let target_host = plan
            .expected_host
            .clone()
            .or_else(|| {
                is_bypass_host_override
                    .then(|| matched_pattern.as_ref().and_then(|p| p.target_host.clone()))
                    .flatten()
            })
            .unwrap_or_else(|| host.clone());

        if !self.host_monitor.is_online(&target_host).await {
            let attempt = NewRemediationAttempt {
                ts,
                alert_name: alert.alert_name.clone(),
                instance_key: instance_key.clone(),
                severity: alert.severity.clone(),
                labels: alert.labels.clone(),
                annotations: alert.annotations.clone(),
                attempt_number: n + 1,
                analysis: plan.analysis.clone(),
                reasoning: plan.reasoning.clone(),
                commands: plan.commands.clone(),
                success: false,
                error: Some(format!("host {target_host} is offline")),
                duration_s: 0.0,
                ssh_host: target_host.clone(),
                pattern_id: matched_pattern.as_ref().map(|p| p.id),
            };
            self.store.record_attempt(&attempt).await?;
            self.notify_outcome(&alert, &instance_key, n + 1, &plan, false, 0.0, Some("host offline".to_string())).await;
            return Ok(Outcome::HostOffline);
        }

        // Step 12: execution — diagnostics best-effort, then actionable in
        // order, short-circuiting on the first actionable failure.
        let started = Instant::now();
        for command in &diagnostics {
            let _ = self.executor.execute(&target_host, command).await;
        }

        let mut success = true;
        let mut error = None;
        for command in &actionable {
            match self.executor.execute(&target_host, command).await {
                Ok(_) => {}
                Err(e) => {
                    success = false;
                    error = Some(e.to_string());
                    break;
                }
            }
        }
        let duration_s = started.elapsed().as_secs_f64();

        // Step 13: persist attempt.
        let attempt = NewRemediationAttempt {
            ts,
            alert_name: alert.alert_name.clone(),
            instance_key: instance_key.clone(),
            severity: alert.severity.clone(),
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            attempt_number: n + 1,
            analysis: plan.analysis.clone(),
            reasoning: plan.reasoning.clone(),
            commands: plan.commands.clone(),
            success,
            error: error.clone(),
            duration_s,
            ssh_host: target_host.clone(),
            pattern_id: matched_pattern.as_ref().map(|p| p.id),
        };
        self.store.record_attempt(&attempt).await?;

        // Step 14: learner update. Bypass and hint both update the matched
        // pattern's outcome; only a miss that succeeded extracts a new one.
        if let Some(pattern) = &matched_pattern {
            self.store.update_pattern_outcome(pattern.id, success, duration_s).await?;
        } else if success {
            self.store
                .upsert_pattern(&NewRemediationPattern {
                    alert_name: alert.alert_name.clone(),
                    category: "auto".to_string(),
                    symptom_fingerprint: fingerprint.clone(),
                    root_cause: plan.analysis.clone(),
                    solution_commands: actionable.clone(),
                    target_host: Some(target_host.clone()),
                    risk_level: "medium".to_string(),
                    confidence: 0.8,
                    created_by: "learner".to_string(),
                })
                .await?;
        }

        // Step 15: notify.
        self.notify_outcome(&alert, &instance_key, n + 1, &plan, success, duration_s, error).await;

        // Step 16: escalate if needed.
        if !success {
            let updated_n = n + 1;
            if updated_n >= self.config.max_attempts_per_alert {
                self.escalate(&alert, &instance_key, updated_n, "repeated_failure").await?;
                return Ok(Outcome::Escalated);
            }
        }

        Ok(if success { Outcome::Success } else { Outcome::Failure })
    }

    async fn notify_outcome(
        &self,
        alert: &AlertPayload,
        instance_key: &str,
        attempt_n: i64,
        plan: &RemediationPlan,
        success: bool,
        duration_s: f64,
        error: Option<String>,
    ) {
        let payload = NotificationPayload {
            alert_name: alert.alert_name.clone(),
            instance_key: instance_key.to_string(),
            severity: alert.severity.clone(),
            attempt_n,
            max_attempts: self.config.max_attempts_per_alert,
            duration_s,
            commands: plan.commands.clone(),
            analysis: plan.analysis.clone(),
            reasoning: plan.reasoning.clone(),
            error,
        };
        if success {
            self.notifier.notify_success(&payload).await;
        } else {
            self.notifier.notify_failure(&payload).await;
        }
    }

    /// Posts an escalation notification summarizing the last three
    /// attempts and marks this (alert_name, instance_key) as requiring a
    /// human — future occurrences keep escalating until a `resolved`
    /// status naturally clears the attempt history.
    async fn escalate(
        &self,
        alert: &AlertPayload,
        instance_key: &str,
        attempt_n: i64,
        reason: &str,
    ) -> Result<(), JarvisError> {
        let recent = self.store.get_previous_attempts(&alert.alert_name, instance_key, 3).await?;
        let summary = recent
            .iter()
            .map(|a| format!("attempt {}: success={} error={:?}", a.attempt_number, a.success, a.error))
            .collect::<Vec<_>>()
            .join("; ");

        warn!(alert_name = %alert.alert_name, instance_key, reason, "escalating to a human operator");
        self.notifier
            .notify_escalation(&NotificationPayload {
                alert_name: alert.alert_name.clone(),
                instance_key: instance_key.to_string(),
                severity: alert.severity.clone(),
                attempt_n,
                max_attempts: self.config.max_attempts_per_alert,
                analysis: format!("human required: {reason}"),
                reasoning: summary,
                ..Default::default()
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Store;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(llm_base_url: String) -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            llm_api_key: "key".into(),
            llm_model: "model".into(),
            llm_base_url,
            ssh_key_path: "/nonexistent".into(),
            hosts: Default::default(),
            notifier_webhook_url: None,
            notifier_enabled: false,
            orchestrator_webhook_url: None,
            webhook_auth_username: "u".into(),
            webhook_auth_password: "p".into(),
            max_attempts_per_alert: 20,
            attempt_window_hours: 2,
            command_execution_timeout: 5,
            learner_high_confidence: 0.75,
            learner_medium_confidence: 0.5,
            self_restart_timeout_minutes: 15,
            bind_addr: "127.0.0.1:0".into(),
            self_base_url: "http://127.0.0.1:0".into(),
            log_level: "info".into(),
            log_format: crate::config::LogFormat::Text,
        }
    }

    fn alert(labels: serde_json::Value, firing: bool) -> AlertPayload {
        let status = if firing { "firing" } else { "resolved" };
        serde_json::from_value::<crate::webhook::WebhookEnvelope>(json!({
            "status": status,
            "alerts": [{
                "status": status,
                "labels": labels,
                "annotations": {},
                "startsAt": "2026-01-01T00:00:00Z",
                "fingerprint": "fp",
            }]
        }))
        .unwrap()
        .into_alerts()
        .remove(0)
    }

    async fn test_pipeline(server: &MockServer) -> Pipeline {
        let config = Arc::new(test_config(format!("{}/chat", server.uri())));
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        let host_monitor = Arc::new(HostMonitor::new(store.clone()));
        let suppressor = Arc::new(Suppressor::new(store.clone()));
        let executor = Arc::new(SshExecutor::new(config.clone(), host_monitor.clone()));
        let analyzer = Arc::new(Analyzer::new(config.clone(), executor.clone()));
        let notifier = Arc::new(Notifier::new(None, false));
        Pipeline::new(config, store, host_monitor, suppressor, analyzer, executor, notifier)
    }

    #[tokio::test]
    async fn resolved_alert_clears_attempts_and_stops() {
        let server = MockServer::start().await;
        let pipeline = test_pipeline(&server).await;
        let a = alert(json!({"alertname": "DiskFull", "instance": "db-1"}), false);
        let outcome = pipeline.process_alert(a).await.unwrap();
        assert_eq!(outcome, Outcome::Resolved);
    }

    #[tokio::test]
    async fn executes_self_host_plan_end_to_end_and_records_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "propose_plan",
                                "arguments": json!({
                                    "commands": ["echo remediated"],
                                    "reasoning": "restart fixes it",
                                    "analysis": "container crashed",
                                    "expected_host": crate::ssh::SELF_HOST,
                                    "expected_outcome": "container healthy",
                                }).to_string(),
                            },
                        }],
                    },
                }],
            })))
            .mount(&server)
            .await;

        let pipeline = test_pipeline(&server).await;
        let a = alert(
            json!({"alertname": "ContainerDown", "host": crate::ssh::SELF_HOST, "container": "demo", "instance": crate::ssh::SELF_HOST}),
            true,
        );
        let outcome = pipeline.process_alert(a).await.unwrap();
        assert_eq!(outcome, Outcome::Success);

        let attempts = pipeline
            .store
            .get_previous_attempts("ContainerDown", &format!("{}:demo", crate::ssh::SELF_HOST), 10)
            .await
            .unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
    }

    #[tokio::test]
    async fn dangerous_command_is_rejected_before_execution() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "propose_plan",
                                "arguments": json!({
                                    "commands": ["rm -rf /"],
                                    "reasoning": "nuke it",
                                    "analysis": "bad idea",
                                    "expected_outcome": "gone",
                                }).to_string(),
                            },
                        }],
                    },
                }],
            })))
            .mount(&server)
            .await;

        let pipeline = test_pipeline(&server).await;
        let a = alert(json!({"alertname": "DiskFull", "instance": "db-1"}), true);
        let outcome = pipeline.process_alert(a).await.unwrap();
        assert_eq!(outcome, Outcome::Rejected);
    }

    #[tokio::test]
    async fn max_attempts_exceeded_escalates_without_calling_analyzer() {
        let server = MockServer::start().await;
        let pipeline = test_pipeline(&server).await;

        for i in 0..pipeline.config.max_attempts_per_alert {
            pipeline
                .store
                .record_attempt(&NewRemediationAttempt {
                    ts: Utc::now(),
                    alert_name: "DiskFull".to_string(),
                    instance_key: "db-1".to_string(),
                    severity: "critical".to_string(),
                    labels: json!({}),
                    annotations: json!({}),
                    attempt_number: i + 1,
                    analysis: String::new(),
                    reasoning: String::new(),
                    commands: vec![],
                    success: false,
                    error: None,
                    duration_s: 0.0,
                    ssh_host: "db-1".to_string(),
                    pattern_id: None,
                })
                .await
                .unwrap();
        }

        let a = alert(json!({"alertname": "DiskFull", "instance": "db-1"}), true);
        let outcome = pipeline.process_alert(a).await.unwrap();
        assert_eq!(outcome, Outcome::Escalated);
    }

    /// spec.md §4.7 step 14: a hint (not just a bypass) must still update
    /// the matched pattern's outcome on success, or its confidence never
    /// converges toward the bypass threshold no matter how often it hints.
    #[tokio::test]
    async fn hint_pattern_outcome_is_updated_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "propose_plan",
                                "arguments": json!({
                                    "commands": ["echo remediated"],
                                    "reasoning": "hinted fix",
                                    "analysis": "container crashed",
                                    "expected_host": crate::ssh::SELF_HOST,
                                    "expected_outcome": "container healthy",
                                }).to_string(),
                            },
                        }],
                    },
                }],
            })))
            .mount(&server)
            .await;

        let pipeline = test_pipeline(&server).await;

        let labels = json!({
            "alertname": "ContainerUnhealthy",
            "host": crate::ssh::SELF_HOST,
            "container": "frigate",
            "instance": crate::ssh::SELF_HOST,
        });
        let fingerprint = crate::learner::symptom_fingerprint("ContainerUnhealthy", &labels);

        // effective_confidence = 0.6 (pattern) * 1.0 (identical fingerprint)
        // lands in the hint band [0.5, 0.75), not the bypass band.
        let now = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO remediation_patterns (
                alert_name, category, symptom_fingerprint, root_cause, solution_commands,
                target_host, risk_level, confidence, success_count, failure_count,
                usage_count, avg_execution_time_s, enabled, created_by, created_at, updated_at,
                last_used_at, metadata
            ) VALUES ('ContainerUnhealthy', 'container', ?, 'flaky container', '[\"docker restart frigate\"]',
                NULL, 'low', 0.6, 4, 0, 4, 1.0, 1, 'operator', ?, ?, ?, '{}')",
        )
        .bind(&fingerprint)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(pipeline.store.pool())
        .await
        .unwrap();
        let pattern_id = inserted.last_insert_rowid();

        let a = alert(labels, true);
        let outcome = pipeline.process_alert(a).await.unwrap();
        assert_eq!(outcome, Outcome::Success);

        let pattern = pipeline.store.get_pattern(pattern_id).await.unwrap().unwrap();
        assert_eq!(pattern.usage_count, 5, "hint must still bump usage_count");
        assert_eq!(pattern.success_count, 5, "hint success must still increment success_count");
        assert!(
            (pattern.confidence - 1.0).abs() < 1e-9,
            "confidence should converge to 5/5 = 1.00, got {}",
            pattern.confidence
        );
    }

    /// spec.md §4.2: a queued alert drained and replayed must persist its
    /// attempt under the original enqueue time, not the replay time.
    #[tokio::test]
    async fn process_alert_at_stamps_attempt_with_the_given_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "propose_plan",
                                "arguments": json!({
                                    "commands": ["docker restart disk-cleaner"],
                                    "reasoning": "clear disk space",
                                    "analysis": "disk nearly full",
                                    "expected_host": "unreachable-host",
                                    "expected_outcome": "disk usage drops",
                                }).to_string(),
                            },
                        }],
                    },
                }],
            })))
            .mount(&server)
            .await;

        let pipeline = test_pipeline(&server).await;

        // Drive the host offline first so this hits the step-11
        // "host offline" path, which persists an attempt without needing a
        // real SSH connection.
        for _ in 0..crate::constants::retry::HOST_FAILURE_THRESHOLD {
            pipeline.host_monitor.record_failure("unreachable-host", "unreachable").await.unwrap();
        }

        let original_enqueue_time = Utc::now() - chrono::Duration::hours(1);
        let a = alert(
            json!({"alertname": "DiskFull", "host": "unreachable-host", "instance": "unreachable-host"}),
            true,
        );
        let outcome = pipeline.process_alert_at(a, original_enqueue_time).await.unwrap();
        assert_eq!(outcome, Outcome::HostOffline);

        let attempts = pipeline
            .store
            .get_previous_attempts("DiskFull", "unreachable-host", 1)
            .await
            .unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].ts, original_enqueue_time);
    }
}
