//! Application-wide constants for timeouts, limits, and configuration defaults.
//!
//! Organizes magic numbers by category, same shape as the rest of the
//! timeout/limit tables scattered through the pipeline.

#![allow(dead_code)]

use std::time::Duration;

/// Wall-clock timeouts for outbound calls.
pub mod timeouts {
    use super::Duration;

    /// Time allowed to establish an SSH connection.
    pub const SSH_CONNECT: Duration = Duration::from_secs(15);

    /// Default per-command execution deadline (overridable via config).
    pub const COMMAND_DEFAULT: Duration = Duration::from_secs(60);

    /// The webhook handler must return well inside this budget.
    pub const WEBHOOK_RESPONSE_BUDGET_MS: u64 = 100;

    /// Outbound notifier webhook timeout.
    pub const NOTIFIER: Duration = Duration::from_secs(10);

    /// LLM provider HTTP call timeout.
    pub const LLM: Duration = Duration::from_secs(60);

    /// Self-restart orchestrator webhook timeout.
    pub const ORCHESTRATOR: Duration = Duration::from_secs(10);
}

/// Retry/backoff schedules.
pub mod retry {
    /// SSH connection-layer retries before giving up.
    pub const SSH_MAX_RETRIES: u32 = 3;

    /// Delay before each SSH connection retry, in seconds.
    pub const SSH_RETRY_DELAYS_S: [u64; 3] = [2, 4, 8];

    /// Store connect backoff schedule, in seconds.
    pub const STORE_CONNECT_BACKOFF_S: [u64; 6] = [1, 2, 4, 8, 16, 30];

    /// Store connect attempts before giving up at startup.
    pub const STORE_CONNECT_MAX_ATTEMPTS: u32 = 10;

    /// Consecutive SSH failures before HostMonitor flips a host offline.
    pub const HOST_FAILURE_THRESHOLD: u32 = 3;
}

/// Background task cadence.
pub mod intervals {
    /// How often the degraded-mode queue drainer runs.
    pub const QUEUE_DRAIN_SECONDS: u64 = 30;

    /// How often an offline host is probed for recovery.
    pub const HOST_PROBE_SECONDS: u64 = 300;

    /// How often the handoff-timeout sweep runs.
    pub const HANDOFF_SWEEP_SECONDS: u64 = 60;

    /// How often suppression TTLs are swept for expiry.
    pub const SUPPRESSION_SWEEP_SECONDS: u64 = 60;
}

/// Policy defaults, overridable via environment variables (see `config`).
pub mod defaults {
    pub const MAX_ATTEMPTS_PER_ALERT: i64 = 20;
    pub const ATTEMPT_WINDOW_HOURS: i64 = 2;
    pub const COMMAND_EXECUTION_TIMEOUT_SECONDS: u64 = 60;
    pub const LEARNER_HIGH_CONFIDENCE: f64 = 0.75;
    pub const LEARNER_MEDIUM_CONFIDENCE: f64 = 0.50;
    pub const SUPPRESSION_TTL_MINUTES: i64 = 15;
    pub const ANALYZER_MAX_ITERATIONS: u32 = 5;
    pub const SELF_RESTART_TIMEOUT_MINUTES: i64 = 15;
    pub const HTTP_BIND_ADDR: &str = "0.0.0.0:8080";
    pub const LLM_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
    pub const SSH_PORT: u16 = 22;
    pub const SSH_USER: &str = "root";
}

/// Hard limits.
pub mod limits {
    /// Capacity of the in-memory degraded-mode queue.
    pub const QUEUE_CAPACITY: usize = 500;

    /// Number of prior attempts summarized into an escalation notification.
    pub const ESCALATION_ATTEMPT_SUMMARY: usize = 3;
}
