//! The Analyzer's fixed tool schema: the function definitions sent to the
//! LLM, the tagged-variant parse of its tool calls, and their execution
//! against [`SshExecutor`]. Mirrors the teacher's `http::agent_manager`
//! dispatch-by-name idiom, generalized to an OpenAI-style function-calling
//! transcript instead of a bespoke agent RPC.

use serde_json::{json, Value};

use crate::errors::JarvisError;
use crate::ssh::SshExecutor;
use crate::validator;

use super::ToolCallRaw;

#[derive(Debug, Clone)]
pub enum ToolCall {
    GatherLogs { host: String, service: String, kind: String, tail_lines: u32 },
    CheckServiceStatus { host: String, service: String },
    GetContainerDiagnostics { host: String, container: String },
    GetSystemState { host: String },
    RunDiagnosticCommand { host: String, command: String },
    ProposePlan {
        commands: Vec<String>,
        reasoning: String,
        analysis: String,
        expected_host: Option<String>,
        expected_outcome: String,
    },
}

/// The fixed tool schema advertised to the LLM every turn, per spec.md §4.6.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "gather_logs",
                "description": "Fetch recent log lines for a service on a host.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "host": {"type": "string"},
                        "service": {"type": "string"},
                        "kind": {"type": "string", "enum": ["docker", "systemd"]},
                        "tail_lines": {"type": "integer", "minimum": 1, "maximum": 1000},
                    },
                    "required": ["host", "service", "kind", "tail_lines"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "check_service_status",
                "description": "Check whether a service is up/down and its health.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "host": {"type": "string"},
                        "service": {"type": "string"},
                    },
                    "required": ["host", "service"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "get_container_diagnostics",
                "description": "Structured container diagnostics: state, health, recent logs, restart count.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "host": {"type": "string"},
                        "container": {"type": "string"},
                    },
                    "required": ["host", "container"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "get_system_state",
                "description": "Disk, memory, CPU load, and container runtime summary for a host.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "host": {"type": "string"},
                    },
                    "required": ["host"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "run_diagnostic_command",
                "description": "Run a read-only diagnostic command (docker ps/logs/inspect, systemctl status, journalctl, curl -I, ps, df, free, ls, cat). Rejected if not read-only.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "host": {"type": "string"},
                        "command": {"type": "string"},
                    },
                    "required": ["host", "command"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "propose_plan",
                "description": "Terminate the analysis and propose a remediation plan.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "commands": {"type": "array", "items": {"type": "string"}},
                        "reasoning": {"type": "string"},
                        "analysis": {"type": "string"},
                        "expected_host": {"type": "string"},
                        "expected_outcome": {"type": "string"},
                    },
                    "required": ["commands", "reasoning", "analysis", "expected_outcome"],
                },
            },
        }),
    ]
}

pub fn parse_tool_call(raw: &ToolCallRaw) -> Result<ToolCall, JarvisError> {
    let args: Value = serde_json::from_str(&raw.function.arguments)
        .map_err(|e| JarvisError::LlmError(format!("malformed tool arguments: {e}")))?;

    let str_field = |key: &str| -> Result<String, JarvisError> {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| JarvisError::LlmError(format!("tool call missing '{key}'")))
    };

    match raw.function.name.as_str() {
        "gather_logs" => Ok(ToolCall::GatherLogs {
            host: str_field("host")?,
            service: str_field("service")?,
            kind: str_field("kind")?,
            tail_lines: args.get("tail_lines").and_then(Value::as_u64).unwrap_or(200) as u32,
        }),
        "check_service_status" => Ok(ToolCall::CheckServiceStatus {
            host: str_field("host")?,
            service: str_field("service")?,
        }),
        "get_container_diagnostics" => Ok(ToolCall::GetContainerDiagnostics {
            host: str_field("host")?,
            container: str_field("container")?,
        }),
        "get_system_state" => Ok(ToolCall::GetSystemState { host: str_field("host")? }),
        "run_diagnostic_command" => Ok(ToolCall::RunDiagnosticCommand {
            host: str_field("host")?,
            command: str_field("command")?,
        }),
        "propose_plan" => Ok(ToolCall::ProposePlan {
            commands: args
                .get("commands")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            reasoning: str_field("reasoning").unwrap_or_default(),
            analysis: str_field("analysis").unwrap_or_default(),
            expected_host: args.get("expected_host").and_then(Value::as_str).map(str::to_string),
            expected_outcome: str_field("expected_outcome").unwrap_or_default(),
        }),
        other => Err(JarvisError::LlmError(format!("unknown tool call '{other}'"))),
    }
}

/// Executes a non-terminal tool call over SSH and returns the string fed
/// back into the transcript as the tool result. Failures are not
/// propagated as `Err` — they become a descriptive string the LLM sees and
/// can reason around, same as a failed `run_diagnostic_command` would look
/// to a human operator.
pub async fn execute_tool(call: &ToolCall, executor: &SshExecutor) -> String {
    match call {
        ToolCall::GatherLogs { host, service, kind, tail_lines } => {
            let command = match kind.as_str() {
                "docker" => format!("docker logs --tail {tail_lines} {service}"),
                _ => format!("journalctl -u {service} -n {tail_lines} --no-pager"),
            };
            run(executor, host, &command).await
        }
        ToolCall::CheckServiceStatus { host, service } => {
            let command = format!(
                "docker ps --filter name={service} --format '{{{{.Status}}}}' || systemctl status {service}"
            );
            run(executor, host, &command).await
        }
        ToolCall::GetContainerDiagnostics { host, container } => {
            let state = run(executor, host, &format!("docker inspect {container}")).await;
            let logs = run(executor, host, &format!("docker logs --tail 50 {container}")).await;
            json!({"inspect": state, "recent_logs": logs}).to_string()
        }
        ToolCall::GetSystemState { host } => {
            let disk = run(executor, host, "df -h").await;
            let memory = run(executor, host, "free -m").await;
            let cpu = run(executor, host, "cat /proc/loadavg").await;
            let runtime = run(executor, host, "docker ps").await;
            json!({
                "disk": disk,
                "memory": memory,
                "cpu": cpu,
                "container_runtime": runtime,
            })
            .to_string()
        }
        ToolCall::RunDiagnosticCommand { host, command } => {
            let verdict = validator::validate_diagnostic(command);
            if !verdict.ok {
                return format!(
                    "rejected: {}",
                    verdict.reason.unwrap_or_else(|| "not a recognized diagnostic".to_string())
                );
            }
            tracing::info!(host, command, "diagnostic execution (not counted as an attempt)");
            run(executor, host, command).await
        }
        ToolCall::ProposePlan { .. } => {
            unreachable!("propose_plan terminates the loop before execute_tool is called")
        }
    }
}

async fn run(executor: &SshExecutor, host: &str, command: &str) -> String {
    match executor.execute(host, command).await {
        Ok(output) => output,
        Err(e) => format!("error: {e}"),
    }
}
