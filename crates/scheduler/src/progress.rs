//! Progress events and the listener registry that fans them out.
//!
//! Every state transition the scheduler makes is published as a
//! [`ProgressEvent`]. Listeners run synchronously, in registration order,
//! on whichever task produced the event. A panicking listener is logged and
//! skipped; it never stops delivery to the listeners after it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::task::TaskError;

/// Lifecycle status of a task as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether no further events follow for this task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Snapshot of one task's observable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub task_id: String,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Build an event stamped with the current time. Out-of-range or NaN
    /// progress values are clamped into `[0, 100]`.
    pub fn new(task_id: impl Into<String>, progress: f64, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            progress: clamp_progress(progress),
            status,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: TaskError) -> Self {
        self.error = Some(error);
        self
    }

    pub(crate) fn started(task_id: &str) -> Self {
        Self::new(task_id, 0.0, TaskStatus::Running)
    }

    pub(crate) fn completed(task_id: &str) -> Self {
        Self::new(task_id, 100.0, TaskStatus::Completed)
    }

    pub(crate) fn attempt_failed(task_id: &str, error: TaskError) -> Self {
        Self::new(task_id, 0.0, TaskStatus::Running).with_error(error)
    }

    pub(crate) fn failed(task_id: &str, error: TaskError) -> Self {
        Self::new(task_id, 0.0, TaskStatus::Failed).with_error(error)
    }

    pub(crate) fn cancelled(task_id: &str) -> Self {
        Self::new(task_id, 0.0, TaskStatus::Cancelled)
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

/// A progress callback.
pub type ProgressListener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

type ListenerId = u64;

/// Ordered set of progress listeners owned by one scheduler.
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, ProgressListener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is explicitly unsubscribed; dropping the handle does
    /// not remove it.
    pub fn subscribe(self: &Arc<Self>, listener: ProgressListener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().push((id, listener));
        Subscription {
            registry: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Deliver `event` to every registered listener.
    ///
    /// The listener list is snapshotted first so listeners may (un)register
    /// from inside their callback without deadlocking.
    pub fn broadcast(&self, event: &ProgressEvent) {
        let snapshot: Vec<ProgressListener> =
            self.read().iter().map(|(_, l)| Arc::clone(l)).collect();

        for listener in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if outcome.is_err() {
                warn!(
                    task_id = %event.task_id,
                    status = %event.status,
                    "progress listener panicked; continuing delivery"
                );
            }
        }
    }

    // Listeners never run under these locks; recover from poisoning regardless.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(ListenerId, ProgressListener)>> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(ListenerId, ProgressListener)>> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `on_progress`; removes exactly one listener.
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    id: ListenerId,
}

impl Subscription {
    /// Remove the listener. Safe to call repeatedly; returns `true` only on
    /// the call that actually removed it.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.unsubscribe(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (ProgressListener, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: ProgressListener = Arc::new(move |e: &ProgressEvent| {
            sink.lock().unwrap().push(format!("{}:{}", e.task_id, e.status));
        });
        (listener, seen)
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(ProgressEvent::new("t", 140.0, TaskStatus::Running).progress, 100.0);
        assert_eq!(ProgressEvent::new("t", -3.0, TaskStatus::Running).progress, 0.0);
        assert_eq!(ProgressEvent::new("t", f64::NAN, TaskStatus::Running).progress, 0.0);
        assert_eq!(ProgressEvent::new("t", 42.5, TaskStatus::Running).progress, 42.5);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn event_wire_shape() {
        let event = ProgressEvent::failed("upload-1", TaskError::execution("disk full"));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["taskId"], "upload-1");
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["progress"], 0.0);
        assert_eq!(json["error"]["message"], "disk full");
        assert!(json["timestamp"].is_string());

        let ok = serde_json::to_value(ProgressEvent::completed("upload-1")).unwrap();
        assert!(ok.get("error").is_none());
        assert_eq!(ok["progress"], 100.0);
    }

    #[test]
    fn broadcast_in_registration_order() {
        let registry = Arc::new(ListenerRegistry::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            registry.subscribe(Arc::new(move |_e: &ProgressEvent| {
                order.lock().unwrap().push(n);
            }));
        }

        registry.broadcast(&ProgressEvent::started("a"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_targeted() {
        let registry = Arc::new(ListenerRegistry::new());
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();

        let sub = registry.subscribe(first);
        registry.subscribe(second);
        assert_eq!(registry.len(), 2);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert_eq!(registry.len(), 1);

        registry.broadcast(&ProgressEvent::started("a"));
        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(*second_seen.lock().unwrap(), vec!["a:RUNNING".to_string()]);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let registry = Arc::new(ListenerRegistry::new());
        registry.subscribe(Arc::new(|_e: &ProgressEvent| panic!("listener bug")));
        let (ok, seen) = recorder();
        registry.subscribe(ok);

        registry.broadcast(&ProgressEvent::completed("a"));
        registry.broadcast(&ProgressEvent::completed("b"));

        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_broadcast() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_inner = slot.clone();
        let sub = registry.subscribe(Arc::new(move |_e: &ProgressEvent| {
            if let Some(sub) = slot_inner.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        }));
        *slot.lock().unwrap() = Some(sub);

        registry.broadcast(&ProgressEvent::started("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let registry = Arc::new(ListenerRegistry::new());
        let (listener, _) = recorder();
        let sub = registry.subscribe(listener);
        drop(registry);
        assert!(!sub.unsubscribe());
    }
}
