use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How to spawn one renderer process.
///
/// The process is expected to speak the line-delimited JSON control protocol
/// on its stdin/stdout (see [`crate::renderer::stdio`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererCommand {
    /// Executable to launch
    pub program: String,
    /// Arguments passed to every worker process
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for RendererCommand {
    fn default() -> Self {
        Self {
            program: "simforge-renderer".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of renderer processes kept alive
    pub size: usize,
    /// Leases a process may serve before it is torn down and respawned
    pub recycle_threshold: u32,
    /// How long shutdown waits for outstanding leases before killing workers
    pub shutdown_timeout_ms: u64,
    pub renderer: RendererCommand,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            recycle_threshold: 50,
            shutdown_timeout_ms: 10_000,
            renderer: RendererCommand::default(),
        }
    }
}

impl PoolConfig {
    pub fn new(size: usize, recycle_threshold: u32) -> Self {
        Self {
            size,
            recycle_threshold,
            ..Default::default()
        }
    }

    pub fn with_renderer(mut self, renderer: RendererCommand) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Per-step deadlines used by the session runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Deadline for the renderer to signal readiness after a preset load
    pub ready_timeout_ms: u64,
    /// Deadline for every other control-API round trip
    pub call_timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 30_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl RunnerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Linear retry policy: attempt `n` failing waits `base * (n + 1)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base_backoff_ms,
        }
    }

    /// Total number of tries a job gets.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the zero-based `attempt` failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(u64::from(attempt) + 1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of jobs executing at once
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Root directory for `index.json` and default job output locations
    pub output_root: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
            output_root: PathBuf::from("output"),
        }
    }
}

impl SchedulerConfig {
    pub fn new(output_root: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            concurrency,
            output_root: output_root.into(),
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_default() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.size, 4);
        assert_eq!(cfg.recycle_threshold, 50);
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.renderer.program, "simforge-renderer");
        assert!(cfg.renderer.args.is_empty());
    }

    #[test]
    fn pool_config_new_keeps_other_defaults() {
        let cfg = PoolConfig::new(1, 2);
        assert_eq!(cfg.size, 1);
        assert_eq!(cfg.recycle_threshold, 2);
        assert_eq!(cfg.shutdown_timeout_ms, 10_000);
    }

    #[test]
    fn runner_config_default() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.ready_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.call_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn retry_backoff_is_linear() {
        let policy = RetryPolicy::new(3, 200);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(2), Duration::from_millis(600));
    }

    #[test]
    fn scheduler_config_with_retry() {
        let cfg = SchedulerConfig::new("/tmp/out", 2).with_retry(RetryPolicy::new(0, 10));
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.output_root, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.retry.max_attempts(), 1);
    }

    #[test]
    fn pool_config_deserializes_partial_document() {
        let cfg: PoolConfig =
            serde_json::from_str(r#"{"size": 2, "renderer": {"program": "node"}}"#).unwrap();
        assert_eq!(cfg.size, 2);
        assert_eq!(cfg.recycle_threshold, 50);
        assert_eq!(cfg.renderer.program, "node");
    }
}
