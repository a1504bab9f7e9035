use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{PoolConfig, RetryPolicy, RunnerConfig, SchedulerConfig};
use crate::error::{Result, SimError};
use crate::job::generator::{generate, GenerationRequest};
use crate::job::spec::JobSpec;

/// Where a batch's jobs come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    Jobs(Vec<JobSpec>),
    Generate(GenerationRequest),
}

/// Input document describing one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub output_root: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(flatten)]
    pub source: JobSource,
}

fn default_concurrency() -> usize {
    SchedulerConfig::default().concurrency
}

impl BatchRequest {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            SimError::InvalidJob(format!("cannot read batch request {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Concrete job list, expanding a generation request if needed.
    pub fn jobs(&self) -> Result<Vec<JobSpec>> {
        match &self.source {
            JobSource::Jobs(jobs) => Ok(jobs.clone()),
            JobSource::Generate(request) => generate(request),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.output_root.clone(), self.concurrency).with_retry(self.retry)
    }
}
