use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler operational metrics, snapshotted by `Scheduler::metrics()`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Configured slot count.
    pub concurrency: usize,
    /// Tasks currently waiting for a slot.
    pub pending: usize,
    /// Tasks currently holding a slot (executing or backing off).
    pub running: usize,
    /// Tasks sitting in the failed list.
    pub failed: usize,
    /// Total tasks admitted, including re-enqueued failures.
    pub tasks_enqueued: u64,
    pub tasks_completed: u64,
    /// Tasks that exhausted their retries.
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    /// Failed attempts that were followed by a retry.
    pub retries_scheduled: u64,
    /// Running mean of successful-attempt durations.
    pub avg_task_duration: Duration,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Fraction of slots currently occupied (0.0 - 1.0).
    pub fn slot_utilization(&self) -> f64 {
        if self.concurrency == 0 {
            0.0
        } else {
            self.running as f64 / self.concurrency as f64
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    /// Record a successful attempt.
    pub fn record_completion(&mut self, duration: Duration) {
        self.tasks_completed += 1;
        self.last_completed_at = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_task_duration = if self.tasks_completed == 1 {
            duration
        } else {
            let prev_nanos = self.avg_task_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.tasks_completed as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_completion() {
        let mut m = SchedulerMetrics::default();
        m.record_completion(Duration::from_millis(100));

        assert_eq!(m.tasks_completed, 1);
        assert!(m.last_completed_at.is_some());
        assert_eq!(m.avg_task_duration, Duration::from_millis(100));
    }

    #[test]
    fn average_is_incremental() {
        let mut m = SchedulerMetrics::default();
        m.record_completion(Duration::from_millis(100));
        m.record_completion(Duration::from_millis(200));
        m.record_completion(Duration::from_millis(300));

        assert_eq!(m.tasks_completed, 3);
        let avg = m.avg_task_duration.as_millis();
        assert!((195..=205).contains(&avg), "expected ~200ms, got {}ms", avg);
    }

    #[test]
    fn utilization_and_idle() {
        let mut m = SchedulerMetrics {
            concurrency: 4,
            ..Default::default()
        };
        assert!(m.is_idle());
        assert_eq!(m.slot_utilization(), 0.0);

        m.running = 3;
        assert!(!m.is_idle());
        assert_eq!(m.slot_utilization(), 0.75);
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.slot_utilization(), 0.0);
        assert_eq!(m.avg_task_duration, Duration::ZERO);
        assert!(m.last_completed_at.is_none());
        assert_eq!(m.retries_scheduled, 0);
    }
}
