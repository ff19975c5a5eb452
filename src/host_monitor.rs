//! Per-host reachability tracking.
//!
//! Caches host state in memory — `Arc<RwLock<HashMap<...>>>`, the same
//! shape the maintenance tracker elsewhere in this codebase uses for
//! host-keyed state — and persists every transition through the `Store`
//! so `/health` and a restarted process both see consistent state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::constants::retry::HOST_FAILURE_THRESHOLD;
use crate::database::{HostState, Store};
use crate::errors::JarvisError;

pub struct HostMonitor {
    store: Arc<Store>,
    cache: Arc<RwLock<HashMap<String, HostState>>>,
}

impl HostMonitor {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Cached state, defaulting to `Online` for a host never seen before —
    /// an unknown host is assumed reachable until proven otherwise.
    pub async fn state(&self, host: &str) -> HostState {
        if let Some(state) = self.cache.read().await.get(host).copied() {
            return state;
        }
        let persisted = self.store.get_host_status(host).await.ok().flatten();
        let state = persisted.map(|s| s.status).unwrap_or(HostState::Online);
        self.cache.write().await.insert(host.to_string(), state);
        state
    }

    pub async fn is_online(&self, host: &str) -> bool {
        self.state(host).await != HostState::Offline
    }

    /// Resets the failure streak and marks `host` online.
    pub async fn record_success(&self, host: &str) -> Result<(), JarvisError> {
        self.store.record_host_success(host).await?;
        let was_offline = self
            .cache
            .write()
            .await
            .insert(host.to_string(), HostState::Online)
            == Some(HostState::Offline);
        if was_offline {
            info!(host, "host recovered");
        }
        Ok(())
    }

    /// Records a failure; once `HOST_FAILURE_THRESHOLD` consecutive
    /// failures accumulate, flips the host offline and returns `true` so
    /// the caller can react (e.g. suppress further attempts).
    pub async fn record_failure(&self, host: &str, error: &str) -> Result<bool, JarvisError> {
        let current = self.state(host).await;
        let probing_state = if current == HostState::Offline {
            HostState::Offline
        } else {
            HostState::Checking
        };

        let failures = self.store.record_host_failure(host, probing_state, error).await?;
        let now_offline = failures as u32 >= HOST_FAILURE_THRESHOLD;

        if now_offline {
            self.store.set_host_status(host, HostState::Offline).await?;
            self.cache.write().await.insert(host.to_string(), HostState::Offline);
            warn!(host, failures, "host marked offline after consecutive failures");
        } else {
            self.cache
                .write()
                .await
                .insert(host.to_string(), HostState::Checking);
        }
        Ok(now_offline)
    }

    pub async fn all_statuses(&self) -> Result<Vec<crate::database::HostStatus>, JarvisError> {
        self.store.list_host_statuses().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_monitor() -> HostMonitor {
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        HostMonitor::new(store)
    }

    #[tokio::test]
    async fn unknown_host_defaults_online() {
        let monitor = test_monitor().await;
        assert!(monitor.is_online("nexus").await);
    }

    #[tokio::test]
    async fn goes_offline_after_threshold_failures() {
        let monitor = test_monitor().await;
        for _ in 0..(HOST_FAILURE_THRESHOLD - 1) {
            let offline = monitor.record_failure("nexus", "timeout").await.unwrap();
            assert!(!offline);
        }
        let offline = monitor.record_failure("nexus", "timeout").await.unwrap();
        assert!(offline);
        assert!(!monitor.is_online("nexus").await);
    }

    #[tokio::test]
    async fn success_clears_offline_state() {
        let monitor = test_monitor().await;
        for _ in 0..HOST_FAILURE_THRESHOLD {
            monitor.record_failure("nexus", "timeout").await.unwrap();
        }
        assert!(!monitor.is_online("nexus").await);
        monitor.record_success("nexus").await.unwrap();
        assert!(monitor.is_online("nexus").await);
    }
}
