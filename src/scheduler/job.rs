use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::spec::JobSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    /// Waiting out the retry delay after a failed attempt
    Backoff,
    Completed,
    Failed,
    /// Never started because the batch was cancelled
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Backoff => write!(f, "backoff"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Execution record of one job within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub spec: JobSpec,
    pub output_dir: PathBuf,
    pub state: JobState,
    /// Number of failed attempts so far
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobStatus {
    pub fn new(spec: JobSpec, output_dir: PathBuf) -> Self {
        Self {
            id: spec.id.clone(),
            spec,
            output_dir,
            state: JobState::Pending,
            retry_count: 0,
            started_at: None,
            ended_at: None,
            last_error: None,
        }
    }
}
