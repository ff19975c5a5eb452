//! LLM tool-calling agent loop (C6).
//!
//! The Analyzer is an opaque-provider chat loop, same shape as the
//! teacher's `http::agent_manager` request/response pattern but generalized
//! to OpenAI-style function calling: each turn sends the running transcript
//! plus the fixed tool schema, and either gets back more tool calls to
//! execute or a `propose_plan` that ends the loop. `K_max` iterations
//! (`ANALYZER_MAX_ITERATIONS`) without a `propose_plan` is "no safe plan",
//! not a crash (spec.md B2).

pub mod tools;

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::constants::{defaults, timeouts};
use crate::database::{RemediationAttempt, RemediationPattern};
use crate::errors::JarvisError;
use crate::ssh::SshExecutor;
use crate::webhook::AlertPayload;

use tools::{execute_tool, parse_tool_call, tool_schemas, ToolCall};

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRaw>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self { role: "system", content: Some(content), tool_calls: None, tool_call_id: None }
    }
    fn user(content: String) -> Self {
        Self { role: "user", content: Some(content), tool_calls: None, tool_call_id: None }
    }
    fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRaw>) -> Self {
        let tool_calls = if tool_calls.is_empty() { None } else { Some(tool_calls) };
        Self { role: "assistant", content, tool_calls, tool_call_id: None }
    }
    fn tool(tool_call_id: String, content: String) -> Self {
        Self { role: "tool", content: Some(content), tool_calls: None, tool_call_id: Some(tool_call_id) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRaw {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallRaw>,
}

/// The structured output of a successful analysis, per spec.md §4.6.
#[derive(Debug, Clone)]
pub struct RemediationPlan {
    pub analysis: String,
    pub reasoning: String,
    pub commands: Vec<String>,
    pub expected_host: Option<String>,
    pub expected_outcome: String,
}

impl RemediationPlan {
    /// Builds a plan directly from a bypassed high-confidence pattern,
    /// skipping the LLM entirely (spec.md §4.7 step 4).
    pub fn from_pattern(pattern: &RemediationPattern) -> Self {
        Self {
            analysis: format!("bypassed via learned pattern #{}", pattern.id),
            reasoning: pattern.root_cause.clone(),
            commands: pattern.solution_commands.clone(),
            expected_host: pattern.target_host.clone(),
            expected_outcome: "matches the learned pattern's prior successful outcome".to_string(),
        }
    }
}

pub struct Analyzer {
    config: Arc<AppConfig>,
    client: Client,
    executor: Arc<SshExecutor>,
}

impl Analyzer {
    pub fn new(config: Arc<AppConfig>, executor: Arc<SshExecutor>) -> Self {
        let client = Client::builder()
            .timeout(timeouts::LLM)
            .build()
            .expect("failed to build LLM HTTP client");
        Self { config, client, executor }
    }

    /// Runs the bounded agent loop for `alert`, optionally primed with a
    /// medium-confidence hint pattern from the Learner. Returns `NoSafePlan`
    /// both when the loop exhausts `K_max` and when the LLM provider itself
    /// fails twice in a row (spec.md's `LLMError` → one retry → `NoSafePlan`).
    pub async fn analyze(
        &self,
        alert: &AlertPayload,
        recent_attempts: &[RemediationAttempt],
        hint: Option<&RemediationPattern>,
    ) -> Result<RemediationPlan, JarvisError> {
        let mut messages = vec![
            ChatMessage::system(self.system_prompt(alert, recent_attempts, hint)),
            ChatMessage::user(self.alert_prompt(alert)),
        ];

        for iteration in 0..defaults::ANALYZER_MAX_ITERATIONS {
            let response = match self.chat_with_retry(&messages).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "analyzer LLM call failed after retry, no safe plan");
                    return Err(JarvisError::NoSafePlan);
                }
            };

            messages.push(ChatMessage::assistant(response.content.clone(), response.tool_calls.clone()));

            if response.tool_calls.is_empty() {
                debug!(iteration, "analyzer turn produced no tool call, continuing loop");
                continue;
            }

            for raw_call in &response.tool_calls {
                let parsed = match parse_tool_call(raw_call) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "analyzer received an unparseable tool call");
                        messages.push(ChatMessage::tool(raw_call.id.clone(), format!("error: {e}")));
                        continue;
                    }
                };

                if let ToolCall::ProposePlan { commands, reasoning, analysis, expected_host, expected_outcome } = parsed {
                    return Ok(RemediationPlan { analysis, reasoning, commands, expected_host, expected_outcome });
                }

                let result = execute_tool(&parsed, &self.executor).await;
                messages.push(ChatMessage::tool(raw_call.id.clone(), result));
            }
        }

        warn!(alert_name = %alert.alert_name, "analyzer exhausted K_max iterations without a plan");
        Err(JarvisError::NoSafePlan)
    }

    fn system_prompt(
        &self,
        alert: &AlertPayload,
        recent_attempts: &[RemediationAttempt],
        hint: Option<&RemediationPattern>,
    ) -> String {
        let hosts: Vec<&str> = self.config.hosts.keys().map(String::as_str).collect();
        let mut prompt = format!(
            "You are Jarvis, an autonomous remediation agent for a small self-hosted infrastructure. \
             Known hosts: {hosts:?}. You investigate alerts by calling the provided tools, then call \
             propose_plan with the exact shell commands to run. Only propose commands that address the \
             alert; diagnostic tool calls do not count against the attempt budget."
        );

        if !recent_attempts.is_empty() {
            prompt.push_str("\n\nRecent attempts for this alert and instance:\n");
            for a in recent_attempts {
                prompt.push_str(&format!(
                    "- attempt {}: success={} commands={:?} error={:?}\n",
                    a.attempt_number, a.success, a.commands, a.error
                ));
            }
        }

        if let Some(pattern) = hint {
            prompt.push_str(&format!(
                "\n\nA previously learned pattern partially matches this alert (confidence {:.2}): \
                 root cause '{}', suggested commands {:?}. Use it as a hint, not a certainty.",
                pattern.confidence, pattern.root_cause, pattern.solution_commands
            ));
        }

        prompt
    }

    fn alert_prompt(&self, alert: &AlertPayload) -> String {
        json!({
            "alert_name": alert.alert_name,
            "severity": alert.severity,
            "instance_key": alert.instance_key(),
            "host": alert.label_host(),
            "labels": alert.labels,
            "annotations": alert.annotations,
        })
        .to_string()
    }

    async fn chat_once(&self, messages: &[ChatMessage]) -> Result<ResponseMessage, JarvisError> {
        let body = json!({
            "model": self.config.llm_model,
            "messages": messages,
            "tools": tool_schemas(),
            "tool_choice": "auto",
        });

        let resp = self
            .client
            .post(&self.config.llm_base_url)
            .bearer_auth(&self.config.llm_api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| JarvisError::LlmError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(JarvisError::LlmError(format!("provider returned status {}", resp.status())));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| JarvisError::LlmError(format!("malformed provider response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| JarvisError::LlmError("provider returned no choices".to_string()))
    }

    async fn chat_with_retry(&self, messages: &[ChatMessage]) -> Result<ResponseMessage, JarvisError> {
        match self.chat_once(messages).await {
            Ok(r) => Ok(r),
            Err(e) => {
                warn!(error = %e, "llm call failed, retrying once");
                self.chat_once(messages).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Store;
    use crate::host_monitor::HostMonitor;
    use serde_json::json as jsonv;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            llm_api_key: "key".into(),
            llm_model: "test-model".into(),
            llm_base_url: base_url,
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

    fn test_alert() -> AlertPayload {
        serde_json::from_value::<crate::webhook::WebhookEnvelope>(jsonv!({
            "status": "firing",
            "alerts": [{
                "status": "firing",
                "labels": {"alertname": "ContainerDown", "host": "nexus", "container": "omada", "instance": "nexus"},
                "annotations": {},
                "startsAt": "2026-01-01T00:00:00Z",
                "fingerprint": "abc",
            }]
        }))
        .unwrap()
        .into_alerts()
        .remove(0)
    }

    async fn analyzer_against(server: &MockServer) -> Analyzer {
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        let monitor = Arc::new(HostMonitor::new(store));
        let config = Arc::new(test_config(format!("{}/chat", server.uri())));
        let executor = Arc::new(SshExecutor::new(config.clone(), monitor));
        Analyzer::new(config, executor)
    }

    #[tokio::test]
    async fn propose_plan_on_first_turn_returns_plan_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jsonv!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "propose_plan",
                                "arguments": jsonv!({
                                    "commands": ["docker restart omada"],
                                    "reasoning": "container unhealthy",
                                    "analysis": "omada crashed",
                                    "expected_host": "nexus",
                                    "expected_outcome": "container comes back healthy",
                                }).to_string(),
                            },
                        }],
                    },
                }],
            })))
            .mount(&server)
            .await;

        let analyzer = analyzer_against(&server).await;
        let plan = analyzer.analyze(&test_alert(), &[], None).await.unwrap();
        assert_eq!(plan.commands, vec!["docker restart omada".to_string()]);
        assert_eq!(plan.expected_host.as_deref(), Some("nexus"));
    }

    #[tokio::test]
    async fn exhausting_k_max_without_propose_plan_is_no_safe_plan() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jsonv!({
                "choices": [{"message": {"role": "assistant", "content": "still thinking", "tool_calls": []}}],
            })))
            .mount(&server)
            .await;

        let analyzer = analyzer_against(&server).await;
        let result = analyzer.analyze(&test_alert(), &[], None).await;
        assert!(matches!(result, Err(JarvisError::NoSafePlan)));
    }

    #[tokio::test]
    async fn provider_failure_after_retry_is_no_safe_plan() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let analyzer = analyzer_against(&server).await;
        let result = analyzer.analyze(&test_alert(), &[], None).await;
        assert!(matches!(result, Err(JarvisError::NoSafePlan)));
    }

    #[test]
    fn plan_from_pattern_uses_the_patterns_solution() {
        let pattern = RemediationPattern {
            id: 7,
            alert_name: "ContainerUnhealthy".into(),
            category: "container".into(),
            symptom_fingerprint: "fp".into(),
            root_cause: "memory leak".into(),
            solution_commands: vec!["docker restart frigate".into()],
            target_host: Some("nexus".into()),
            risk_level: "low".into(),
            confidence: 0.9,
            success_count: 3,
            failure_count: 0,
            usage_count: 3,
            avg_execution_time_s: 1.0,
            enabled: true,
            created_by: "learner".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            last_used_at: Some(chrono::Utc::now()),
            metadata: serde_json::Value::Null,
        };
        let plan = RemediationPlan::from_pattern(&pattern);
        assert_eq!(plan.commands, vec!["docker restart frigate".to_string()]);
        assert_eq!(plan.expected_host.as_deref(), Some("nexus"));
    }
}
