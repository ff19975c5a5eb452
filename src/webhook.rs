//! Inbound alert-router webhook shape and its normalized form.
//!
//! The wire payload nests the firing/resolved alerts an alert-router
//! batches together in one POST; everything downstream of the handler
//! (queue, pipeline, store) works with the flattened, per-alert
//! [`AlertPayload`] instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    /// Informational only — the effective status is per-alert.
    #[allow(dead_code)]
    pub status: String,
    pub alerts: Vec<RawAlert>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAlert {
    pub status: String,
    pub labels: serde_json::Value,
    pub annotations: serde_json::Value,
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    pub fingerprint: String,
}

/// A single normalized alert, the unit the queue and pipeline operate on.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub alert_name: String,
    pub severity: String,
    /// Raw `instance` label, exactly as the router sent it.
    pub instance: String,
    /// `host` label, present on container alerts (and most others).
    pub host: Option<String>,
    /// `container` label, present only on container alerts.
    pub container: Option<String>,
    pub labels: serde_json::Value,
    pub annotations: serde_json::Value,
    pub starts_at: DateTime<Utc>,
    pub fingerprint: String,
    pub firing: bool,
}

impl AlertPayload {
    pub fn alert_name(&self) -> &str {
        &self.alert_name
    }

    /// Derives the instance key attempt accounting keys on, per the
    /// instance-key invariant:
    ///
    /// 1. if `instance` already has the form `host:container`, use it
    ///    verbatim;
    /// 2. else if both `host` and `container` labels are present, compose
    ///    `host:container`;
    /// 3. else use the raw `instance` label.
    pub fn instance_key(&self) -> String {
        if self.instance.contains(':') {
            return self.instance.clone();
        }
        match (&self.host, &self.container) {
            (Some(host), Some(container)) => format!("{host}:{container}"),
            _ => self.instance.clone(),
        }
    }

    /// The host a plan should target absent any more specific override
    /// (`plan.expected_host`, or a bypassed pattern's `target_host`) — the
    /// `host` label if present, else whatever precedes the first `:` in
    /// `instance`, else `instance` itself.
    pub fn label_host(&self) -> String {
        if let Some(host) = &self.host {
            return host.clone();
        }
        match self.instance.split_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.instance.clone(),
        }
    }
}

impl From<RawAlert> for AlertPayload {
    fn from(raw: RawAlert) -> Self {
        let label = |key: &str| -> Option<String> {
            raw.labels.get(key).and_then(|v| v.as_str()).map(str::to_string)
        };

        let alert_name = label("alertname").unwrap_or_else(|| "unknown".to_string());
        let severity = label("severity").unwrap_or_else(|| "warning".to_string());
        let instance = label("instance").unwrap_or_else(|| "unknown".to_string());
        let host = label("host");
        let container = label("container");

        Self {
            alert_name,
            severity,
            instance,
            host,
            container,
            labels: raw.labels,
            annotations: raw.annotations,
            starts_at: raw.starts_at,
            fingerprint: raw.fingerprint,
            firing: raw.status == "firing",
        }
    }
}

impl WebhookEnvelope {
    pub fn into_alerts(self) -> Vec<AlertPayload> {
        self.alerts.into_iter().map(AlertPayload::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(status: &str, labels: serde_json::Value) -> AlertPayload {
        let raw = json!({
            "status": status,
            "alerts": [{
                "status": status,
                "labels": labels,
                "annotations": {},
                "startsAt": "2026-01-01T00:00:00Z",
                "fingerprint": "abc123",
            }]
        });
        let envelope: WebhookEnvelope = serde_json::from_value(raw).unwrap();
        envelope.into_alerts().remove(0)
    }

    #[test]
    fn parses_alertmanager_shaped_envelope() {
        let alert = envelope(
            "firing",
            json!({"alertname": "DiskFull", "severity": "critical", "instance": "db-1"}),
        );
        assert_eq!(alert.alert_name, "DiskFull");
        assert_eq!(alert.instance, "db-1");
        assert!(alert.firing);
        assert_eq!(alert.instance_key(), "db-1");
    }

    #[test]
    fn resolved_status_clears_firing_flag() {
        let alert = envelope("resolved", json!({"alertname": "DiskFull", "instance": "db-1"}));
        assert!(!alert.firing);
    }

    /// I4(a): host+container labels, plain instance label -> compose host:container.
    #[test]
    fn instance_key_composes_host_and_container() {
        let alert = envelope(
            "firing",
            json!({"alertname": "ContainerDown", "host": "nexus", "container": "omada", "instance": "nexus"}),
        );
        assert_eq!(alert.instance_key(), "nexus:omada");
    }

    /// I4(b): router already sent `host:container` as instance -> used verbatim.
    #[test]
    fn instance_key_uses_prebaked_instance_verbatim() {
        let alert = envelope(
            "firing",
            json!({"alertname": "ContainerDown", "host": "nexus", "container": "omada", "instance": "nexus:omada"}),
        );
        assert_eq!(alert.instance_key(), "nexus:omada");
    }

    /// I4(c): no container label -> bare instance is the key.
    #[test]
    fn instance_key_falls_back_to_bare_instance() {
        let alert = envelope(
            "firing",
            json!({"alertname": "HostDown", "instance": "ha.local"}),
        );
        assert_eq!(alert.instance_key(), "ha.local");
    }

    #[test]
    fn label_host_prefers_host_label_over_instance() {
        let alert = envelope(
            "firing",
            json!({"alertname": "ContainerDown", "host": "nexus", "container": "omada", "instance": "nexus:omada"}),
        );
        assert_eq!(alert.label_host(), "nexus");
    }

    #[test]
    fn label_host_splits_colon_form_instance_when_host_label_absent() {
        let alert = envelope(
            "firing",
            json!({"alertname": "ContainerDown", "instance": "nexus:omada"}),
        );
        assert_eq!(alert.label_host(), "nexus");
    }
}
