//! Remote command execution (C4: SSHExecutor).
//!
//! `connection` wraps a single `async_ssh2_tokio` client (or local
//! execution for the `self` pseudo-host); `executor` pools connections
//! per host, bounds per-host concurrency, and retries transient
//! connection failures with backoff.

pub mod connection;
pub mod executor;

pub use connection::SELF_HOST;
pub use executor::SshExecutor;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::database::Store;
    use crate::host_monitor::HostMonitor;

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            llm_api_key: "key".into(),
            llm_model: "model".into(),
            llm_base_url: "http://localhost".into(),
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

    #[tokio::test]
    async fn executes_locally_for_self_pseudo_host() {
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        let monitor = Arc::new(HostMonitor::new(store));
        let executor = SshExecutor::new(Arc::new(test_config()), monitor);

        let output = executor.execute(SELF_HOST, "echo hello").await.unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn unreachable_host_returns_ssh_connect_error() {
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        let monitor = Arc::new(HostMonitor::new(store));
        let mut config = test_config();
        config.hosts.insert(
            "ghost".into(),
            crate::config::HostConfig {
                address: "203.0.113.1".into(),
                user: "root".into(),
                port: 22,
                key_path: "/nonexistent".into(),
            },
        );
        let executor = SshExecutor::new(Arc::new(config), monitor);

        let result = executor.execute_with_timeout("ghost", "echo hi", 1).await;
        assert!(result.is_err());
    }
}
