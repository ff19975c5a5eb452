//! Runtime configuration, loaded once at startup from the environment.
//!
//! Unlike the DB/TOML-backed configuration of earlier services, Jarvis's
//! deployment surface is entirely environment-variable driven (no hot
//! reload, no per-server config files) — see the recognized-options table
//! in the external-interfaces section of the design doc.
//! `AppConfig` is built once in `main` and handed around as `Arc<AppConfig>`.

use std::collections::HashMap;
use std::env;

use anyhow::{anyhow, Context, Result};

use crate::constants::defaults;

/// Per-host SSH credentials, assembled from `SSH_<HOST>_*` variables.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub address: String,
    pub user: String,
    pub port: u16,
    pub key_path: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,

    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_base_url: String,

    pub ssh_key_path: String,
    pub hosts: HashMap<String, HostConfig>,

    pub notifier_webhook_url: Option<String>,
    pub notifier_enabled: bool,

    pub orchestrator_webhook_url: Option<String>,

    pub webhook_auth_username: String,
    pub webhook_auth_password: String,

    pub max_attempts_per_alert: i64,
    pub attempt_window_hours: i64,
    pub command_execution_timeout: u64,
    pub learner_high_confidence: f64,
    pub learner_medium_confidence: f64,
    pub self_restart_timeout_minutes: i64,

    pub bind_addr: String,
    /// Base URL this instance is reachable at, used to build the
    /// `/resume` callback URL handed to the self-restart orchestrator.
    /// Defaults from `bind_addr` when unset, which is only correct for a
    /// loopback deployment — anything fronted by a reverse proxy needs
    /// `SELF_BASE_URL` set explicitly.
    pub self_base_url: String,

    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl AppConfig {
    /// Loads and validates every recognized variable. Fails fast with a
    /// readable error naming the missing/invalid field rather than letting
    /// the service start half-configured.
    pub fn from_env() -> Result<Self> {
        let database_url = require("DATABASE_URL")?;
        let llm_api_key = require("LLM_API_KEY")?;
        let llm_model = require("LLM_MODEL")?;
        let llm_base_url = optional("LLM_BASE_URL", defaults::LLM_BASE_URL);

        let ssh_key_path = require("SSH_KEY_PATH")?;
        let hosts = discover_hosts(&ssh_key_path)?;

        let notifier_webhook_url = env::var("NOTIFIER_WEBHOOK_URL").ok().filter(|s| !s.is_empty());
        let notifier_enabled = match env::var("NOTIFIER_ENABLED") {
            Ok(v) => parse_bool(&v).context("NOTIFIER_ENABLED")?,
            Err(_) => notifier_webhook_url.is_some(),
        };

        let orchestrator_webhook_url = env::var("ORCHESTRATOR_WEBHOOK_URL")
            .ok()
            .filter(|s| !s.is_empty());

        let webhook_auth_username = require("WEBHOOK_AUTH_USERNAME")?;
        let webhook_auth_password = require("WEBHOOK_AUTH_PASSWORD")?;

        let max_attempts_per_alert = optional_parse(
            "MAX_ATTEMPTS_PER_ALERT",
            defaults::MAX_ATTEMPTS_PER_ALERT,
        )?;
        let attempt_window_hours =
            optional_parse("ATTEMPT_WINDOW_HOURS", defaults::ATTEMPT_WINDOW_HOURS)?;
        let command_execution_timeout = optional_parse(
            "COMMAND_EXECUTION_TIMEOUT",
            defaults::COMMAND_EXECUTION_TIMEOUT_SECONDS,
        )?;
        let learner_high_confidence = optional_parse(
            "LEARNER_HIGH_CONFIDENCE",
            defaults::LEARNER_HIGH_CONFIDENCE,
        )?;
        let learner_medium_confidence = optional_parse(
            "LEARNER_MEDIUM_CONFIDENCE",
            defaults::LEARNER_MEDIUM_CONFIDENCE,
        )?;
        let self_restart_timeout_minutes = optional_parse(
            "SELF_RESTART_TIMEOUT_MINUTES",
            defaults::SELF_RESTART_TIMEOUT_MINUTES,
        )?;

        let bind_addr = optional("HTTP_BIND_ADDR", defaults::HTTP_BIND_ADDR);
        let self_base_url =
            optional("SELF_BASE_URL", &format!("http://{}", bind_addr.replace("0.0.0.0", "127.0.0.1")));

        let log_level = optional("LOG_LEVEL", "info");
        let log_format = match optional("LOG_FORMAT", "text").as_str() {
            "json" => LogFormat::Json,
            "text" => LogFormat::Text,
            other => return Err(anyhow!("LOG_FORMAT must be 'json' or 'text', got '{other}'")),
        };

        if learner_medium_confidence > learner_high_confidence {
            return Err(anyhow!(
                "LEARNER_MEDIUM_CONFIDENCE ({learner_medium_confidence}) must not exceed LEARNER_HIGH_CONFIDENCE ({learner_high_confidence})"
            ));
        }

        Ok(Self {
            database_url,
            llm_api_key,
            llm_model,
            llm_base_url,
            ssh_key_path,
            hosts,
            notifier_webhook_url,
            notifier_enabled,
            orchestrator_webhook_url,
            webhook_auth_username,
            webhook_auth_password,
            max_attempts_per_alert,
            attempt_window_hours,
            command_execution_timeout,
            learner_high_confidence,
            learner_medium_confidence,
            self_restart_timeout_minutes,
            bind_addr,
            self_base_url,
            log_level,
            log_format,
        })
    }

    /// Resolves the host-specific SSH credentials, falling back to a
    /// bare-minimum record (default user/port, shared key) for hosts that
    /// never got a `SSH_<HOST>_*` block — matching the alert label as the
    /// address directly.
    pub fn host_config(&self, host: &str) -> HostConfig {
        self.hosts.get(host).cloned().unwrap_or_else(|| HostConfig {
            address: host.to_string(),
            user: defaults::SSH_USER.to_string(),
            port: defaults::SSH_PORT,
            key_path: self.ssh_key_path.clone(),
        })
    }
}

fn require(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("missing required environment variable {key}"))
}

fn optional(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{other}'")),
    }
}

/// Scans `SSH_<HOST>_HOST` variables to assemble the per-host credential
/// table; `SSH_<HOST>_USER`/`SSH_<HOST>_PORT` are optional per host.
fn discover_hosts(default_key_path: &str) -> Result<HashMap<String, HostConfig>> {
    let mut names = std::collections::BTreeSet::new();
    for (key, _) in env::vars() {
        if let Some(rest) = key.strip_prefix("SSH_") {
            if let Some(name) = rest.strip_suffix("_HOST") {
                if !name.is_empty() {
                    names.insert(name.to_string());
                }
            }
        }
    }

    let mut hosts = HashMap::new();
    for name in names {
        let address = env::var(format!("SSH_{name}_HOST"))?;
        let user = optional(&format!("SSH_{name}_USER"), defaults::SSH_USER);
        let port = optional_parse(&format!("SSH_{name}_PORT"), defaults::SSH_PORT)?;
        let key_path = optional(&format!("SSH_{name}_KEY_PATH"), default_key_path);

        hosts.insert(
            name.to_ascii_lowercase(),
            HostConfig {
                address,
                user,
                port,
                key_path,
            },
        );
    }
    Ok(hosts)
}
