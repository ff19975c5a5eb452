//! HTTP surface (C12): the axum router over the webhook, health,
//! patterns, analytics, maintenance, and self-restart endpoints of
//! spec.md §6.1.

pub mod handlers;
pub mod server;

pub use server::{build_router, start_web_server};

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::AppConfig;
use crate::database::Store;
use crate::host_monitor::HostMonitor;
use crate::pipeline::Pipeline;
use crate::queue::AlertQueue;
use crate::self_preserver::SelfPreserver;

/// Everything a handler needs, shared behind `Arc`s and handed to axum via
/// `with_state`. Collaborators the handlers never touch directly
/// (Suppressor, Analyzer, SshExecutor, Notifier) stay inside `Pipeline`
/// rather than being duplicated onto `AppState`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<Store>,
    pub queue: Arc<AlertQueue>,
    pub host_monitor: Arc<HostMonitor>,
    pub pipeline: Arc<Pipeline>,
    pub self_preserver: Arc<SelfPreserver>,
}

/// Response envelope matching the teacher's `ApiResponse<T>` shape —
/// `{success, data, message, timestamp}`.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), message: None, timestamp: Utc::now().to_rfc3339() }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self { success: false, data: None, message: Some(message.into()), timestamp: Utc::now().to_rfc3339() }
    }
}
