//! Self-restart orchestration (C11).
//!
//! Jarvis never kills itself (or its database, or the runtime underneath
//! it) directly — it hands the restart off to an external orchestrator and
//! waits to be told the outcome via `/resume`. The single-active-handoff
//! mutex is enforced entirely by the `Store`'s partial unique index (see
//! `database::initialize_tables`), not by any lock in this module — per
//! spec.md §9, Pipeline and SelfPreserver only interact through the Store,
//! never directly, so there is no back-reference to `Pipeline` here.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::constants::timeouts;
use crate::database::{HandoffStatus, SelfRestartHandoff, Store};
use crate::errors::JarvisError;

pub struct SelfPreserver {
    store: Arc<Store>,
    client: Client,
    orchestrator_webhook_url: Option<String>,
    timeout_minutes: i64,
    self_base_url: String,
}

impl SelfPreserver {
    pub fn new(
        store: Arc<Store>,
        orchestrator_webhook_url: Option<String>,
        timeout_minutes: i64,
        self_base_url: String,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeouts::ORCHESTRATOR)
            .build()
            .expect("failed to build self-restart orchestrator HTTP client");
        Self {
            store,
            client,
            orchestrator_webhook_url,
            timeout_minutes,
            self_base_url,
        }
    }

    /// Creates a handoff row (enforcing the single-active invariant at the
    /// Store layer) and synchronously posts the restart request to the
    /// external orchestrator. A failed post does not roll back the handoff
    /// — it stays `pending` until the timeout sweep reclaims it, since the
    /// orchestrator may have received the request despite a dropped
    /// response.
    pub async fn initiate(
        &self,
        target: &str,
        reason: &str,
        context: serde_json::Value,
        ssh_host: Option<&str>,
    ) -> Result<String, JarvisError> {
        let handoff_id = Uuid::new_v4().to_string();
        let callback_url = format!("{}/resume?handoff_id={handoff_id}", self.self_base_url);

        self.store
            .create_handoff(&handoff_id, target, reason, &context, Some(&callback_url))
            .await?;

        if let Some(url) = &self.orchestrator_webhook_url {
            let body = json!({
                "handoff_id": handoff_id,
                "target": target,
                "reason": reason,
                "callback_url": callback_url,
                "ssh_host": ssh_host,
                "health_url": format!("{}/health", self.self_base_url),
                "timeout": self.timeout_minutes * 60,
            });
            match self.client.post(url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(handoff_id, target, "self-restart handoff posted to orchestrator");
                }
                Ok(resp) => warn!(status = %resp.status(), "orchestrator rejected self-restart handoff"),
                Err(e) => warn!(error = %e, "failed to reach self-restart orchestrator"),
            }
        } else {
            warn!("no orchestrator webhook configured — handoff will rely on the timeout sweep");
        }

        Ok(handoff_id)
    }

    /// Called by the external orchestrator once the restart attempt is
    /// done (or gave up). Transitions are terminal and irreversible.
    pub async fn resume(
        &self,
        handoff_id: &str,
        status: HandoffStatus,
        error: Option<&str>,
    ) -> Result<(), JarvisError> {
        self.store
            .update_handoff_status(handoff_id, status, None, error)
            .await
    }

    pub async fn cancel(&self, handoff_id: &str, reason: Option<&str>) -> Result<(), JarvisError> {
        let handoff = self
            .store
            .get_handoff(handoff_id)
            .await?
            .ok_or(JarvisError::NotFound)?;
        if handoff.status.is_terminal() {
            return Err(JarvisError::NotFound);
        }
        self.store
            .update_handoff_status(handoff_id, HandoffStatus::Cancelled, None, reason)
            .await
    }

    pub async fn current_handoff(&self) -> Result<Option<SelfRestartHandoff>, JarvisError> {
        self.store.active_handoff().await
    }

    /// Marks the single active handoff (if any) as `timeout` once it has
    /// outlived `timeout_minutes`, and emits an operator notification via
    /// the returned handoff so the caller can relay it to the `Notifier`.
    pub async fn sweep_timeouts(&self) -> Result<Option<SelfRestartHandoff>, JarvisError> {
        let Some(active) = self.store.active_handoff().await? else {
            return Ok(None);
        };
        let age = Utc::now() - active.created_at;
        if age > Duration::minutes(self.timeout_minutes) {
            self.store
                .update_handoff_status(&active.handoff_id, HandoffStatus::Timeout, None, Some("handoff exceeded timeout"))
                .await?;
            warn!(handoff_id = active.handoff_id, "self-restart handoff timed out");
            return Ok(Some(active));
        }
        Ok(None)
    }

    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(crate::constants::intervals::HANDOFF_SWEEP_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_preserver() -> SelfPreserver {
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        SelfPreserver::new(store, None, 15, "http://localhost:8080".to_string())
    }

    #[tokio::test]
    async fn initiate_creates_pending_handoff() {
        let preserver = test_preserver().await;
        let id = preserver
            .initiate("service", "memory leak", json!({}), Some("nexus"))
            .await
            .unwrap();
        let handoff = preserver.current_handoff().await.unwrap().unwrap();
        assert_eq!(handoff.handoff_id, id);
        assert_eq!(handoff.status, HandoffStatus::Pending);
    }

    /// I6: two concurrent initiate calls yield exactly one success, one conflict.
    #[tokio::test]
    async fn second_concurrent_initiate_is_rejected() {
        let preserver = test_preserver().await;
        preserver
            .initiate("service", "first", json!({}), None)
            .await
            .unwrap();
        let second = preserver.initiate("service", "second", json!({}), None).await;
        assert!(matches!(second, Err(JarvisError::HandoffConflict)));
    }

    #[tokio::test]
    async fn resume_clears_the_active_slot_for_a_new_initiate() {
        let preserver = test_preserver().await;
        let id = preserver.initiate("service", "first", json!({}), None).await.unwrap();
        preserver.resume(&id, HandoffStatus::Completed, None).await.unwrap();
        assert!(preserver.current_handoff().await.unwrap().is_none());

        let second = preserver.initiate("service", "second", json!({}), None).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn sweep_times_out_stale_pending_handoff() {
        let preserver = test_preserver().await;
        let id = preserver.initiate("service", "stuck", json!({}), None).await.unwrap();

        // Force the created_at far enough into the past to exceed the timeout.
        let store = &preserver.store;
        sqlx::query("UPDATE self_preservation_handoffs SET created_at = ? WHERE handoff_id = ?")
            .bind(Utc::now() - Duration::minutes(30))
            .bind(&id)
            .execute(store.pool())
            .await
            .unwrap();

        let swept = preserver.sweep_timeouts().await.unwrap();
        assert!(swept.is_some());
        assert!(preserver.current_handoff().await.unwrap().is_none());
    }
}
