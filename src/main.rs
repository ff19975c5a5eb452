//! Jarvis: autonomous alert-remediation service.
//!
//! Wires every component (C0-C12) together, spawns the background sweeps,
//! and starts the HTTP surface. Mirrors the teacher's own `main.rs`
//! composition-root shape: load config, construct collaborators bottom-up,
//! hand them to the web server, then block on the background tasks
//! alongside it via a final `tokio::try_join!`.

mod analyzer;
mod config;
mod constants;
mod database;
mod errors;
mod host_monitor;
mod learner;
mod notifier;
mod pipeline;
mod queue;
mod self_preserver;
mod ssh;
mod suppressor;
mod validator;
mod web;
mod webhook;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use analyzer::Analyzer;
use config::{AppConfig, LogFormat};
use database::Store;
use host_monitor::HostMonitor;
use notifier::{NotificationPayload, Notifier};
use pipeline::Pipeline;
use queue::AlertQueue;
use self_preserver::SelfPreserver;
use ssh::SshExecutor;
use suppressor::Suppressor;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(AppConfig::from_env()?);
    init_tracing(&config);

    info!(bind_addr = %config.bind_addr, "starting jarvis");

    let store = Arc::new(Store::connect(&config.database_url).await?);
    let queue = Arc::new(AlertQueue::new());
    let host_monitor = Arc::new(HostMonitor::new(store.clone()));
    let suppressor = Arc::new(Suppressor::new(store.clone()));
    suppressor.rehydrate().await?;

    let executor = Arc::new(SshExecutor::new(config.clone(), host_monitor.clone()));
    let analyzer = Arc::new(Analyzer::new(config.clone(), executor.clone()));
    let notifier = Arc::new(Notifier::new(config.notifier_webhook_url.clone(), config.notifier_enabled));
    notifier.test_webhook().await;

    let self_preserver = Arc::new(SelfPreserver::new(
        store.clone(),
        config.orchestrator_webhook_url.clone(),
        config.self_restart_timeout_minutes,
        config.self_base_url.clone(),
    ));

    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        store.clone(),
        host_monitor.clone(),
        suppressor.clone(),
        analyzer,
        executor.clone(),
        notifier.clone(),
    ));

    let state = web::AppState {
        config: config.clone(),
        store: store.clone(),
        queue: queue.clone(),
        host_monitor: host_monitor.clone(),
        pipeline: pipeline.clone(),
        self_preserver: self_preserver.clone(),
    };

    let hosts: Vec<String> = config.hosts.keys().cloned().collect();

    tokio::try_join!(
        async { web::start_web_server(state).await },
        flatten(spawn_queue_drain(queue.clone(), pipeline.clone())),
        flatten(spawn_host_probe(host_monitor.clone(), suppressor.clone(), notifier.clone(), executor, hosts)),
        flatten(spawn_handoff_sweep(self_preserver.clone(), notifier.clone())),
        flatten(spawn_suppression_sweep(store.clone())),
    )?;

    Ok(())
}

async fn flatten(handle: tokio::task::JoinHandle<()>) -> Result<()> {
    handle.await.map_err(|e| anyhow::anyhow!("background task panicked: {e}"))
}

/// Periodically drains the in-memory overflow/retry queue back through the
/// pipeline, the same interval-spawned background-task shape the teacher
/// uses in its own `main.rs` for health checks and maintenance cleanup.
fn spawn_queue_drain(queue: Arc<AlertQueue>, pipeline: Arc<Pipeline>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            constants::intervals::QUEUE_DRAIN_SECONDS,
        ));
        loop {
            ticker.tick().await;
            for item in queue.drain().await {
                let alert_name = item.payload.alert_name().to_string();
                match pipeline.process_alert_at(item.payload.clone(), item.enqueued_at).await {
                    Ok(outcome) => info!(alert_name, ?outcome, "drained queued alert"),
                    Err(errors::JarvisError::StoreUnavailable(_)) => {
                        warn!(alert_name, "store still unavailable, re-queuing");
                        queue.push_queued(item).await;
                    }
                    Err(e) => error!(alert_name, error = %e, "failed to process queued alert"),
                }
            }
        }
    })
}

/// Probes every configured host currently marked offline with a trivial
/// remote command; a successful probe clears its suppressions and fires a
/// recovery notification — the `host_recovered` edge spec.md §4.3/§4.8
/// describe, since `HostMonitor::record_success` itself only updates state
/// and doesn't report the offline-to-online transition to its caller.
fn spawn_host_probe(
    host_monitor: Arc<HostMonitor>,
    suppressor: Arc<Suppressor>,
    notifier: Arc<Notifier>,
    executor: Arc<SshExecutor>,
    hosts: Vec<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            constants::intervals::HOST_PROBE_SECONDS,
        ));
        loop {
            ticker.tick().await;
            for host in &hosts {
                if host_monitor.is_online(host).await {
                    continue;
                }
                if executor.execute_with_timeout(host, "true", 5).await.is_ok() {
                    let _ = host_monitor.record_success(host).await;
                    let _ = suppressor.clear_host(host).await;
                    notifier.notify_recovery(host).await;
                }
            }
        }
    })
}

fn spawn_handoff_sweep(self_preserver: Arc<SelfPreserver>, notifier: Arc<Notifier>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(self_preserver.sweep_interval());
        loop {
            ticker.tick().await;
            match self_preserver.sweep_timeouts().await {
                Ok(Some(handoff)) => {
                    warn!(handoff_id = handoff.handoff_id, "self-restart handoff timed out");
                    notifier
                        .notify_escalation(&NotificationPayload {
                            alert_name: "SelfRestartTimeout".to_string(),
                            instance_key: handoff.restart_target.clone(),
                            analysis: format!("self-restart handoff {} timed out", handoff.handoff_id),
                            ..Default::default()
                        })
                        .await;
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "handoff timeout sweep failed"),
            }
        }
    })
}

/// Prunes expired suppression rows on an interval — without this, a
/// suppression with a past `suppressed_until` stays in the durable table
/// forever (the in-memory cache already forgets it once `clear_host`
/// runs, but nothing else ever deletes the row).
fn spawn_suppression_sweep(store: Arc<Store>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            constants::intervals::SUPPRESSION_SWEEP_SECONDS,
        ));
        loop {
            ticker.tick().await;
            match store.prune_expired_suppressions().await {
                Ok(pruned) if pruned > 0 => info!(pruned, "expired suppressions pruned"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "suppression sweep failed"),
            }
        }
    })
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}
