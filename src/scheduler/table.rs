use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;

use crate::job::spec::JobSpec;
use crate::scheduler::job::{JobState, JobStatus};

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Status of every job in a batch, in submission order.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<String, JobStatus>,
    order: Vec<String>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Returns false if the id is already present.
    pub fn add_job(&mut self, spec: JobSpec, output_dir: PathBuf) -> bool {
        if self.jobs.contains_key(&spec.id) {
            return false;
        }
        self.order.push(spec.id.clone());
        self.jobs
            .insert(spec.id.clone(), JobStatus::new(spec, output_dir));
        true
    }

    pub fn get_job(&self, id: &str) -> Option<&JobStatus> {
        self.jobs.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn mark_running(&mut self, id: &str) -> bool {
        self.update(id, |job| {
            job.state = JobState::Running;
            if job.started_at.is_none() {
                job.started_at = Some(Utc::now());
            }
        })
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, id: &str, error: String) -> bool {
        self.update(id, |job| {
            job.retry_count += 1;
            job.last_error = Some(error);
        })
    }

    pub fn mark_backoff(&mut self, id: &str) -> bool {
        self.update(id, |job| job.state = JobState::Backoff)
    }

    pub fn mark_completed(&mut self, id: &str) -> bool {
        self.finish(id, JobState::Completed)
    }

    pub fn mark_failed(&mut self, id: &str) -> bool {
        self.finish(id, JobState::Failed)
    }

    pub fn mark_cancelled(&mut self, id: &str) -> bool {
        self.finish(id, JobState::Cancelled)
    }

    /// Jobs whose task ended without reaching a final state.
    pub fn unfinished_jobs(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.jobs
                    .get(*id)
                    .is_some_and(|job| !job.state.is_finished())
            })
            .cloned()
            .collect()
    }

    /// All jobs in submission order
    pub fn all_jobs(&self) -> Vec<&JobStatus> {
        self.order.iter().filter_map(|id| self.jobs.get(id)).collect()
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts {
            total: self.jobs.len(),
            ..Default::default()
        };
        for job in self.jobs.values() {
            match job.state {
                JobState::Pending => counts.pending += 1,
                JobState::Running | JobState::Backoff => counts.running += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn finish(&mut self, id: &str, state: JobState) -> bool {
        self.update(id, |job| {
            job.state = state;
            job.ended_at = Some(Utc::now());
        })
    }

    fn update(&mut self, id: &str, f: impl FnOnce(&mut JobStatus)) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }
}
