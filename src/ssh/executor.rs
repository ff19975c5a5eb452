//! Pooled, retrying SSH command execution (C4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::constants::retry;
use crate::errors::JarvisError;
use crate::host_monitor::HostMonitor;

use super::connection::Connection;

const DEFAULT_HOST_CONCURRENCY: usize = 2;

pub struct SshExecutor {
    config: Arc<AppConfig>,
    host_monitor: Arc<HostMonitor>,
    connections: Arc<RwLock<HashMap<String, Arc<Mutex<Connection>>>>>,
    semaphores: Arc<RwLock<HashMap<String, Arc<Semaphore>>>>,
}

impl SshExecutor {
    pub fn new(config: Arc<AppConfig>, host_monitor: Arc<HostMonitor>) -> Self {
        Self {
            config,
            host_monitor,
            connections: Arc::new(RwLock::new(HashMap::new())),
            semaphores: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Runs `command` on `host`, retrying connection failures with the
    /// [2s, 4s, 8s] backoff schedule before giving up. A command that
    /// connects but then times out is not retried — the command may have
    /// had a side effect, so blindly re-running it is unsafe; the caller
    /// sees `CommandTimeout` and decides what to do next.
    pub async fn execute(&self, host: &str, command: &str) -> Result<String, JarvisError> {
        self.execute_with_timeout(host, command, self.config.command_execution_timeout)
            .await
    }

    pub async fn execute_with_timeout(
        &self,
        host: &str,
        command: &str,
        timeout_s: u64,
    ) -> Result<String, JarvisError> {
        let semaphore = self.semaphore_for(host).await;
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| JarvisError::Other(anyhow::anyhow!("semaphore closed for {host}: {e}")))?;

        let mut last_err = None;
        for attempt in 0..=retry::SSH_MAX_RETRIES {
            match self.try_execute(host, command, timeout_s).await {
                Ok(output) => {
                    let _ = self.host_monitor.record_success(host).await;
                    return Ok(output);
                }
                Err(JarvisError::CommandTimeout { host, timeout_s }) => {
                    // Ran but didn't finish in time: do not retry.
                    return Err(JarvisError::CommandTimeout { host, timeout_s });
                }
                Err(JarvisError::CommandFailed { host, exit_status, stderr }) => {
                    // The connection is fine and the command ran to
                    // completion; it just exited non-zero. Spec §4.4 retries
                    // connection-layer errors only, so the pooled connection
                    // stays and this isn't treated as a host failure.
                    return Err(JarvisError::CommandFailed { host, exit_status, stderr });
                }
                Err(e) => {
                    warn!(host, attempt, error = %e, "ssh attempt failed");
                    self.remove_connection(host).await;
                    let _ = self.host_monitor.record_failure(host, &e.to_string()).await;
                    last_err = Some(e);
                    if attempt < retry::SSH_MAX_RETRIES {
                        let delay = retry::SSH_RETRY_DELAYS_S[attempt as usize];
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| JarvisError::SshConnect {
            host: host.to_string(),
            reason: "exhausted retries".to_string(),
        }))
    }

    async fn try_execute(&self, host: &str, command: &str, timeout_s: u64) -> Result<String, JarvisError> {
        let conn = self.get_or_create_connection(host).await?;

        let result = tokio::time::timeout(Duration::from_secs(timeout_s), async {
            let mut conn = conn.lock().await;
            conn.execute(command).await
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => {
                error!(host, timeout_s, "command timed out");
                self.remove_connection(host).await;
                Err(JarvisError::CommandTimeout {
                    host: host.to_string(),
                    timeout_s,
                })
            }
        }
    }

    async fn get_or_create_connection(&self, host: &str) -> Result<Arc<Mutex<Connection>>, JarvisError> {
        {
            let connections = self.connections.read().await;
            if let Some(conn) = connections.get(host) {
                return Ok(conn.clone());
            }
        }

        let host_config = self.config.host_config(host);
        let connection = Connection::connect(
            &host_config.address,
            &host_config.user,
            &host_config.key_path,
            host_config.port,
        )
        .await?;
        let conn_arc = Arc::new(Mutex::new(connection));

        let mut connections = self.connections.write().await;
        connections.insert(host.to_string(), conn_arc.clone());
        info!(host, "ssh connection established and pooled");
        Ok(conn_arc)
    }

    async fn remove_connection(&self, host: &str) {
        let mut connections = self.connections.write().await;
        if connections.remove(host).is_some() {
            debug!(host, "dropped pooled connection after failure");
        }
    }

    async fn semaphore_for(&self, host: &str) -> Arc<Semaphore> {
        {
            let semaphores = self.semaphores.read().await;
            if let Some(s) = semaphores.get(host) {
                return s.clone();
            }
        }
        let mut semaphores = self.semaphores.write().await;
        semaphores
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(DEFAULT_HOST_CONCURRENCY)))
            .clone()
    }

    pub async fn active_connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
