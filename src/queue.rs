//! Bounded in-memory alert queue.
//!
//! Used as a shock absorber when inbound alert volume outpaces the
//! pipeline (or while the store is briefly unreachable), the same role
//! `Arc<RwLock<HashMap<...>>>` buffering plays for host state elsewhere in
//! this codebase — here a `VecDeque` behind a `Mutex` since order matters
//! and there is no per-key lookup.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::constants::limits;
use crate::webhook::AlertPayload;

/// An alert sitting in the queue, paired with the time it was originally
/// enqueued. spec.md §4.2 requires that a drained alert "re-enter Pipeline
/// exactly as if freshly received, but the processing timestamp reflects
/// original enqueue time" — `enqueued_at` is what lets the drain loop honor
/// that instead of stamping the replay time.
#[derive(Debug, Clone)]
pub struct QueuedAlert {
    pub payload: AlertPayload,
    pub enqueued_at: DateTime<Utc>,
}

struct Inner {
    items: Mutex<VecDeque<QueuedAlert>>,
    notify: Notify,
}

/// FIFO queue of pending alerts, capacity-bounded at
/// [`limits::QUEUE_CAPACITY`]. When full, the oldest entry is dropped to
/// admit the new one — a queue that blocks producers would stall the
/// webhook handler's response budget.
#[derive(Clone)]
pub struct AlertQueue {
    inner: Arc<Inner>,
}

impl AlertQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(limits::QUEUE_CAPACITY)),
                notify: Notify::new(),
            }),
        }
    }

    /// Pushes `payload` as freshly received, stamping `enqueued_at` with the
    /// current time. Drops the oldest queued alert if at capacity.
    pub async fn push(&self, payload: AlertPayload) {
        self.push_queued(QueuedAlert { payload, enqueued_at: Utc::now() }).await;
    }

    /// Pushes an already-queued alert back in, preserving its original
    /// `enqueued_at` — used when a drained alert fails to process (e.g. the
    /// store is still unavailable) and needs to go back on the queue without
    /// losing its original enqueue time. Drops the oldest queued alert if at
    /// capacity.
    pub async fn push_queued(&self, item: QueuedAlert) {
        let mut items = self.inner.items.lock().await;
        if items.len() >= limits::QUEUE_CAPACITY {
            let dropped = items.pop_front();
            warn!(
                alert = dropped.as_ref().map(|d| d.payload.alert_name()).unwrap_or_default(),
                "queue at capacity, dropping oldest alert"
            );
        }
        items.push_back(item);
        drop(items);
        self.inner.notify.notify_one();
    }

    /// Pops the oldest alert, waiting if the queue is empty.
    pub async fn pop(&self) -> QueuedAlert {
        loop {
            {
                let mut items = self.inner.items.lock().await;
                if let Some(item) = items.pop_front() {
                    return item;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Pops every currently queued alert without waiting, for the periodic
    /// drain task.
    pub async fn drain(&self) -> Vec<QueuedAlert> {
        let mut items = self.inner.items.lock().await;
        items.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for AlertQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::AlertPayload;
    use chrono::Utc;

    fn sample_alert(name: &str) -> AlertPayload {
        AlertPayload {
            alert_name: name.to_string(),
            severity: "warning".to_string(),
            instance: "host-1".to_string(),
            host: None,
            container: None,
            labels: serde_json::json!({}),
            annotations: serde_json::json!({}),
            starts_at: Utc::now(),
            fingerprint: "fp".to_string(),
            firing: true,
        }
    }

    #[tokio::test]
    async fn push_and_pop_preserves_fifo_order() {
        let queue = AlertQueue::new();
        queue.push(sample_alert("a")).await;
        queue.push(sample_alert("b")).await;
        assert_eq!(queue.pop().await.payload.alert_name(), "a");
        assert_eq!(queue.pop().await.payload.alert_name(), "b");
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let queue = AlertQueue::new();
        for i in 0..(limits::QUEUE_CAPACITY + 5) {
            queue.push(sample_alert(&format!("alert-{i}"))).await;
        }
        assert_eq!(queue.len().await, limits::QUEUE_CAPACITY);
        let first = queue.pop().await;
        assert_eq!(first.payload.alert_name(), "alert-5");
    }

    /// The drain-then-requeue path must not reset `enqueued_at` to "now" —
    /// spec.md §4.2 requires the original enqueue time to survive a requeue
    /// after a failed drain attempt.
    #[tokio::test]
    async fn push_queued_preserves_original_enqueue_time() {
        let queue = AlertQueue::new();
        queue.push(sample_alert("a")).await;
        let drained = queue.drain().await;
        assert_eq!(drained.len(), 1);
        let original_enqueued_at = drained[0].enqueued_at;

        queue.push_queued(drained.into_iter().next().unwrap()).await;
        let popped = queue.pop().await;
        assert_eq!(popped.enqueued_at, original_enqueued_at);
    }
}
