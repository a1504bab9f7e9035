use std::time::Duration;

use tokio::sync::watch;

use crate::scheduler::table::JobCounts;

/// Point-in-time view of a batch, published on every job state change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub elapsed: Duration,
    /// Completed jobs per second
    pub throughput: f64,
    /// Remaining time at the current completion rate
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn new(counts: JobCounts, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            counts.completed as f64 / secs
        } else {
            0.0
        };
        let remaining = counts.pending + counts.running;
        let eta = if remaining == 0 {
            Some(Duration::ZERO)
        } else if throughput > 0.0 {
            Some(Duration::from_secs_f64(remaining as f64 / throughput))
        } else {
            None
        };

        Self {
            total: counts.total,
            pending: counts.pending,
            running: counts.running,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            elapsed,
            throughput,
            eta,
        }
    }

    pub fn resolved(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.resolved() == self.total
    }
}

/// Periodically logs the latest progress snapshot.
pub struct ProgressReporter {
    interval: Duration,
}

impl ProgressReporter {
    /// `interval_ms` is clamped to at least 1 ms.
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    /// Log every interval until the batch finishes or the publisher is dropped.
    pub async fn run(&self, mut rx: watch::Receiver<ProgressSnapshot>) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.total > 0 {
                tracing::info!(
                    completed = snapshot.completed,
                    failed = snapshot.failed,
                    running = snapshot.running,
                    pending = snapshot.pending,
                    total = snapshot.total,
                    throughput = %format!("{:.2}/s", snapshot.throughput),
                    eta = ?snapshot.eta,
                    "Batch progress"
                );
                if snapshot.is_finished() {
                    break;
                }
            }
            if rx.has_changed().is_err() {
                // Publisher dropped
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(total: usize, pending: usize, running: usize, completed: usize) -> JobCounts {
        JobCounts {
            total,
            pending,
            running,
            completed,
            failed: total - pending - running - completed,
            cancelled: 0,
        }
    }

    #[test]
    fn throughput_and_eta_follow_completion_rate() {
        let snapshot = ProgressSnapshot::new(counts(10, 4, 2, 4), Duration::from_secs(8));
        assert!((snapshot.throughput - 0.5).abs() < 1e-9);
        assert_eq!(snapshot.eta, Some(Duration::from_secs(12)));
        assert!(!snapshot.is_finished());
    }

    #[test]
    fn eta_unknown_before_first_completion() {
        let snapshot = ProgressSnapshot::new(counts(3, 1, 2, 0), Duration::from_secs(5));
        assert_eq!(snapshot.throughput, 0.0);
        assert!(snapshot.eta.is_none());
    }

    #[test]
    fn finished_when_everything_resolved() {
        let snapshot = ProgressSnapshot::new(counts(3, 0, 0, 2), Duration::from_secs(1));
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.eta, Some(Duration::ZERO));
        assert!(snapshot.is_finished());
    }

    #[tokio::test]
    async fn reporter_stops_when_publisher_dropped() {
        let (tx, rx) = watch::channel(ProgressSnapshot::default());
        drop(tx);
        let reporter = ProgressReporter::new(5);
        tokio::time::timeout(Duration::from_secs(1), reporter.run(rx))
            .await
            .expect("reporter should exit");
    }

    #[tokio::test]
    async fn zero_interval_is_clamped() {
        let (tx, rx) = watch::channel(ProgressSnapshot::default());
        drop(tx);
        let reporter = ProgressReporter::new(0);
        assert_eq!(reporter.interval, Duration::from_millis(1));
        tokio::time::timeout(Duration::from_secs(1), reporter.run(rx))
            .await
            .expect("reporter should exit");
    }
}
