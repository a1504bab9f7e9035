use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifacts::relative_to;
use crate::scheduler::job::JobState;
use crate::scheduler::table::JobTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub preset: String,
    /// Output directory relative to the batch root
    pub path: String,
    pub state: JobState,
    pub retry_count: u32,
}

/// Batch summary persisted as `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchIndex {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub jobs: Vec<IndexEntry>,
}

impl BatchIndex {
    pub fn from_table(
        batch_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        elapsed_secs: f64,
        table: &JobTable,
        output_root: &Path,
    ) -> Self {
        let counts = table.counts();
        let jobs = table
            .all_jobs()
            .into_iter()
            .map(|job| IndexEntry {
                id: job.id.clone(),
                preset: job.spec.preset.clone(),
                path: relative_to(&job.output_dir, output_root),
                state: job.state,
                retry_count: job.retry_count,
            })
            .collect();

        Self {
            batch_id,
            started_at,
            finished_at,
            elapsed_secs,
            total: counts.total,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            jobs,
        }
    }
}

/// Written as `error.json` when a job exhausts its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub job_id: String,
    pub preset: String,
    pub error: String,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}
