//! A single SSH connection and its command-execution surface.

use std::net::SocketAddr;

use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::constants::timeouts;
use crate::errors::JarvisError;

/// The pseudo-host name meaning "run on the Jarvis host itself" — used by
/// the self-preservation flow and a handful of diagnostic tool calls that
/// don't target a remote fleet member.
pub const SELF_HOST: &str = "self";

pub enum Connection {
    Remote { client: Client, host: String },
    Local,
}

impl Connection {
    pub async fn connect(host: &str, username: &str, key_path: &str, port: u16) -> Result<Self, JarvisError> {
        if host == SELF_HOST {
            return Ok(Connection::Local);
        }

        debug!(host, username, "establishing SSH connection");

        let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
            JarvisError::SshConnect {
                host: host.to_string(),
                reason: format!("invalid address: {e}"),
            }
        })?;

        let key_content = fs::read_to_string(key_path).await.map_err(|e| JarvisError::SshConnect {
            host: host.to_string(),
            reason: format!("failed to read key at {key_path}: {e}"),
        })?;
        let auth_method = AuthMethod::with_key(&key_content, None);

        let client = tokio::time::timeout(
            timeouts::SSH_CONNECT,
            Client::connect(addr, username, auth_method, ServerCheckMethod::NoCheck),
        )
        .await
        .map_err(|_| JarvisError::SshConnect {
            host: host.to_string(),
            reason: "connection timed out".to_string(),
        })?
        .map_err(|e| JarvisError::SshConnect {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        debug!(host, "SSH connection established");
        Ok(Connection::Remote { client, host: host.to_string() })
    }

    pub async fn execute(&mut self, command: &str) -> Result<String, JarvisError> {
        match self {
            Connection::Local => execute_locally(command).await,
            Connection::Remote { client, host } => {
                let result = client
                    .execute(command)
                    .await
                    .map_err(|e| JarvisError::Other(anyhow::anyhow!("ssh execute on {host}: {e}")))?;

                if result.exit_status != 0 {
                    warn!(
                        host = host.as_str(),
                        exit_status = result.exit_status,
                        "command exited non-zero"
                    );
                    return Err(JarvisError::CommandFailed {
                        host: host.clone(),
                        exit_status: result.exit_status as i32,
                        stderr: result.stderr.trim().to_string(),
                    });
                }

                Ok(result.stdout.trim().to_string())
            }
        }
    }
}

async fn execute_locally(command: &str) -> Result<String, JarvisError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|e| JarvisError::Other(anyhow::anyhow!("local execution failed: {e}")))?;

    if !output.status.success() {
        return Err(JarvisError::CommandFailed {
            host: SELF_HOST.to_string(),
            exit_status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connection::Local => write!(f, "Connection::Local"),
            Connection::Remote { host, .. } => write!(f, "Connection::Remote({host})"),
        }
    }
}
