//! Cascading suppression (C8).
//!
//! A static root-cause → suppressible-children table plus a `*` wildcard
//! rule (`HostMaintenance` suppresses everything). When a known root-cause
//! alert fires against an offline host, a `Suppression` row is written with
//! a TTL; while active, any suppressible-child alert on the same host is
//! dropped. Follows the same hot-cache-over-a-table shape as
//! [`crate::host_monitor::HostMonitor`] and the teacher's
//! `MaintenanceTracker`: an `Arc<RwLock<HashMap<...>>>` rehydrated from the
//! `Store` at startup, mutated through narrow async methods that never hold
//! the lock across I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::constants::defaults::SUPPRESSION_TTL_MINUTES;
use crate::database::Store;
use crate::errors::JarvisError;

/// Static cascading table: a root-cause alert name suppresses these child
/// alert names when both fire for the same host. `HostMaintenance` is a
/// wildcard root cause that suppresses every other alert type.
const WILDCARD_ROOT_CAUSE: &str = "HostMaintenance";

fn cascade_table() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("HostDown", &["ContainerDown", "ContainerUnhealthy", "ServiceUnreachable", "HighLatency"]),
        ("NetworkUnreachable", &["ContainerDown", "ContainerUnhealthy", "ServiceUnreachable"]),
        (WILDCARD_ROOT_CAUSE, &[]),
    ]
}

fn is_suppressible(root_cause: &str, child: &str) -> bool {
    if root_cause == WILDCARD_ROOT_CAUSE {
        return child != WILDCARD_ROOT_CAUSE;
    }
    cascade_table()
        .iter()
        .find(|(rc, _)| *rc == root_cause)
        .is_some_and(|(_, children)| children.contains(&child))
}

pub fn is_root_cause_type(alert_name: &str) -> bool {
    cascade_table().iter().any(|(rc, _)| *rc == alert_name)
}

pub struct Suppressor {
    store: Arc<Store>,
    /// host -> set of root-cause alert names currently suppressing it.
    active: RwLock<HashMap<String, HashSet<String>>>,
}

impl Suppressor {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Rehydrates the in-memory cache from the `suppressions` table —
    /// called once at startup so a restart doesn't silently drop active
    /// suppressions.
    pub async fn rehydrate(&self) -> Result<(), JarvisError> {
        let rows = self.store.list_active_suppressions().await?;
        let mut cache = self.active.write().await;
        cache.clear();
        for row in &rows {
            cache
                .entry(row.root_cause_instance.clone())
                .or_default()
                .insert(row.root_cause_alert.clone());
        }
        info!(restored = rows.len(), "suppressor cache rehydration complete");
        Ok(())
    }

    /// Starts a suppression window for every suppressible child of
    /// `root_cause_alert` on `host`, persisting a row per cascade entry and
    /// populating the in-memory cache. Called when a root-cause alert type
    /// fires against a host HostMonitor reports offline.
    pub async fn suppress_host(
        &self,
        root_cause_alert: &str,
        host: &str,
        reason: &str,
    ) -> Result<(), JarvisError> {
        let until = Utc::now() + Duration::minutes(SUPPRESSION_TTL_MINUTES);
        self.store
            .create_suppression(root_cause_alert, host, until, reason)
            .await?;

        let mut cache = self.active.write().await;
        cache
            .entry(host.to_string())
            .or_default()
            .insert(root_cause_alert.to_string());
        info!(host, root_cause_alert, "host suppression window opened");
        Ok(())
    }

    /// Whether `alert_name` on `host` should be silently dropped right now
    /// because a root cause active on that host suppresses it. Consults the
    /// in-memory cache first (cheap), and falls back to the durable table
    /// when the cache has nothing for `host` — covering the window right
    /// after a restart before `rehydrate` has observed every active row, or
    /// a multi-instance deployment's cache divergence.
    pub async fn is_suppressed(&self, alert_name: &str, host: &str) -> Result<bool, JarvisError> {
        {
            let cache = self.active.read().await;
            if let Some(root_causes) = cache.get(host) {
                if root_causes.iter().any(|rc| is_suppressible(rc, alert_name)) {
                    return Ok(true);
                }
            }
        }

        let rows = self.store.active_suppressions(host).await?;
        Ok(rows.iter().any(|s| is_suppressible(&s.root_cause_alert, alert_name)))
    }

    /// Clears every suppression tracked for `host` — called when
    /// `HostMonitor` signals `host_recovered`. Deletes unconditionally
    /// (not just expired rows): a suppression opened moments before
    /// recovery can still have most of its TTL left.
    pub async fn clear_host(&self, host: &str) -> Result<u64, JarvisError> {
        let mut cache = self.active.write().await;
        cache.remove(host);
        drop(cache);
        self.store.clear_suppressions_for_host(host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_suppressor() -> Suppressor {
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        Suppressor::new(store)
    }

    #[tokio::test]
    async fn host_down_suppresses_container_alerts() {
        let suppressor = test_suppressor().await;
        suppressor.suppress_host("HostDown", "nexus", "host offline").await.unwrap();
        assert!(suppressor.is_suppressed("ContainerDown", "nexus").await.unwrap());
        assert!(!suppressor.is_suppressed("ContainerDown", "other-host").await.unwrap());
    }

    #[tokio::test]
    async fn host_down_does_not_suppress_unrelated_alert_types() {
        let suppressor = test_suppressor().await;
        suppressor.suppress_host("HostDown", "nexus", "host offline").await.unwrap();
        assert!(!suppressor.is_suppressed("DiskFull", "nexus").await.unwrap());
    }

    #[tokio::test]
    async fn host_maintenance_wildcard_suppresses_everything() {
        let suppressor = test_suppressor().await;
        suppressor
            .suppress_host("HostMaintenance", "nexus", "scheduled maintenance")
            .await
            .unwrap();
        assert!(suppressor.is_suppressed("DiskFull", "nexus").await.unwrap());
        assert!(suppressor.is_suppressed("ContainerDown", "nexus").await.unwrap());
    }

    #[tokio::test]
    async fn rehydrate_restores_cache_from_the_store() {
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        let first = Suppressor::new(store.clone());
        first.suppress_host("HostDown", "nexus", "host offline").await.unwrap();

        // A freshly constructed suppressor has an empty cache until it
        // rehydrates from the same durable store.
        let second = Suppressor::new(store.clone());
        assert!(second.active.read().await.is_empty());
        second.rehydrate().await.unwrap();
        assert!(second.is_suppressed("ContainerDown", "nexus").await.unwrap());
    }

    #[tokio::test]
    async fn clear_host_removes_suppression() {
        let suppressor = test_suppressor().await;
        suppressor.suppress_host("HostDown", "nexus", "host offline").await.unwrap();
        suppressor.clear_host("nexus").await.unwrap();
        assert!(!suppressor.is_suppressed("ContainerDown", "nexus").await.unwrap());
    }
}
