//! Outbound notifications (C9).
//!
//! Jarvis owns the HTTP delivery of remediation outcomes; the chat-side
//! formatting (embed colors, emoji, channel routing) is an external
//! collaborator's concern per spec.md §1. Shaped like the teacher's
//! `AlertService`: a `reqwest::Client` behind an `is_enabled()` gate, one
//! `send_*` method per outcome kind, and a best-effort connectivity check
//! callable once at startup.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::constants::timeouts;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Failure,
    Escalation,
    Rejection,
    Recovery,
    SuppressionSummary,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct NotificationPayload {
    pub alert_name: String,
    pub instance_key: String,
    pub severity: String,
    pub attempt_n: i64,
    pub max_attempts: i64,
    pub duration_s: f64,
    pub commands: Vec<String>,
    pub analysis: String,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Notifier {
    webhook_url: Option<String>,
    client: Client,
    enabled: bool,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>, enabled: bool) -> Self {
        let client = Client::builder()
            .timeout(timeouts::NOTIFIER)
            .build()
            .expect("failed to build notifier HTTP client");

        let enabled = enabled && webhook_url.as_deref().is_some_and(|u| !u.trim().is_empty());
        if !enabled {
            warn!("notifier disabled — remediation outcomes will not be posted externally");
        }

        Self { webhook_url, client, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Posts `kind` + `payload` as one flat JSON body. Failures are logged
    /// and swallowed — a notifier outage must never fail an alert's
    /// processing (it already completed before notification is attempted).
    pub async fn notify(&self, kind: NotificationKind, payload: &NotificationPayload) {
        if !self.enabled {
            return;
        }
        let Some(url) = self.webhook_url.as_deref() else { return };

        let mut body = serde_json::to_value(payload).unwrap_or_else(|_| json!({}));
        if let Some(obj) = body.as_object_mut() {
            obj.insert("kind".to_string(), json!(kind));
        }

        match self.client.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(alert_name = %payload.alert_name, ?kind, "notification delivered");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "notifier webhook returned non-success status");
            }
            Err(e) => {
                warn!(error = %e, "failed to deliver notification");
            }
        }
    }

    pub async fn notify_success(&self, payload: &NotificationPayload) {
        self.notify(NotificationKind::Success, payload).await;
    }

    pub async fn notify_failure(&self, payload: &NotificationPayload) {
        self.notify(NotificationKind::Failure, payload).await;
    }

    pub async fn notify_escalation(&self, payload: &NotificationPayload) {
        self.notify(NotificationKind::Escalation, payload).await;
    }

    pub async fn notify_rejection(&self, payload: &NotificationPayload) {
        self.notify(NotificationKind::Rejection, payload).await;
    }

    pub async fn notify_recovery(&self, host: &str) {
        let payload = NotificationPayload {
            alert_name: "HostRecovered".to_string(),
            instance_key: host.to_string(),
            ..Default::default()
        };
        self.notify(NotificationKind::Recovery, &payload).await;
    }

    pub async fn notify_suppression_summary(&self, host: &str, suppressed_count: usize) {
        let payload = NotificationPayload {
            alert_name: "SuppressionSummary".to_string(),
            instance_key: host.to_string(),
            analysis: format!("{suppressed_count} alerts suppressed due to host {host} offline"),
            ..Default::default()
        };
        self.notify(NotificationKind::SuppressionSummary, &payload).await;
    }

    /// Best-effort reachability probe, called once at startup; logs a
    /// warning on failure rather than stopping the service — Jarvis should
    /// still run with a broken notifier, just noisily degraded.
    pub async fn test_webhook(&self) {
        if !self.enabled {
            return;
        }
        let Some(url) = self.webhook_url.as_deref() else { return };
        let probe = self
            .client
            .head(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match probe {
            Ok(_) => debug!("notifier webhook reachable"),
            Err(e) => warn!(error = %e, "notifier webhook unreachable at startup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn disabled_without_webhook_url() {
        let notifier = Notifier::new(None, true);
        assert!(!notifier.is_enabled());
    }

    #[tokio::test]
    async fn posts_flat_json_payload_with_kind() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(Some(format!("{}/hook", server.uri())), true);
        assert!(notifier.is_enabled());

        notifier
            .notify_success(&NotificationPayload {
                alert_name: "ContainerDown".to_string(),
                instance_key: "nexus:omada".to_string(),
                ..Default::default()
            })
            .await;
    }
}
