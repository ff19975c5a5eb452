//! Database record types (entities).
//!
//! JSON-valued columns (`labels`, `annotations`, `commands`,
//! `solution_commands`, `context`, `metadata`) are stored as serialized
//! text and decoded at the call site — sqlx's sqlite driver has no native
//! JSON column type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAttempt {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub alert_name: String,
    pub instance_key: String,
    pub severity: String,
    pub labels: serde_json::Value,
    pub annotations: serde_json::Value,
    pub attempt_number: i64,
    pub analysis: String,
    pub reasoning: String,
    pub commands: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_s: f64,
    pub ssh_host: String,
    pub pattern_id: Option<i64>,
}

/// A not-yet-persisted attempt; `Store::record_attempt` assigns `id`.
#[derive(Debug, Clone)]
pub struct NewRemediationAttempt {
    pub ts: DateTime<Utc>,
    pub alert_name: String,
    pub instance_key: String,
    pub severity: String,
    pub labels: serde_json::Value,
    pub annotations: serde_json::Value,
    pub attempt_number: i64,
    pub analysis: String,
    pub reasoning: String,
    pub commands: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_s: f64,
    pub ssh_host: String,
    pub pattern_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationPattern {
    pub id: i64,
    pub alert_name: String,
    pub category: String,
    pub symptom_fingerprint: String,
    pub root_cause: String,
    pub solution_commands: Vec<String>,
    pub target_host: Option<String>,
    pub risk_level: String,
    pub confidence: f64,
    pub success_count: i64,
    pub failure_count: i64,
    pub usage_count: i64,
    pub avg_execution_time_s: f64,
    pub enabled: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewRemediationPattern {
    pub alert_name: String,
    pub category: String,
    pub symptom_fingerprint: String,
    pub root_cause: String,
    pub solution_commands: Vec<String>,
    pub target_host: Option<String>,
    pub risk_level: String,
    pub confidence: f64,
    pub created_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Online,
    Offline,
    Checking,
}

impl HostState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Online => "online",
            HostState::Offline => "offline",
            HostState::Checking => "checking",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "online" => HostState::Online,
            "offline" => HostState::Offline,
            _ => HostState::Checking,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatus {
    pub host_name: String,
    pub status: HostState,
    pub consecutive_failures: i64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suppression {
    pub id: i64,
    pub root_cause_alert: String,
    pub root_cause_instance: String,
    pub suppressed_until: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl HandoffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffStatus::Pending => "pending",
            HandoffStatus::InProgress => "in_progress",
            HandoffStatus::Completed => "completed",
            HandoffStatus::Failed => "failed",
            HandoffStatus::Timeout => "timeout",
            HandoffStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => HandoffStatus::Pending,
            "in_progress" => HandoffStatus::InProgress,
            "completed" => HandoffStatus::Completed,
            "failed" => HandoffStatus::Failed,
            "timeout" => HandoffStatus::Timeout,
            _ => HandoffStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, HandoffStatus::Pending | HandoffStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfRestartHandoff {
    pub handoff_id: String,
    pub restart_target: String,
    pub reason: String,
    pub context: serde_json::Value,
    pub status: HandoffStatus,
    pub callback_url: Option<String>,
    pub executor_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: String,
    pub created_by: String,
}
