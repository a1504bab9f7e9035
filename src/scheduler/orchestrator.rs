use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifacts::{write_json, JobLayout, INDEX_FILE};
use crate::config::{PoolConfig, RetryPolicy, RunnerConfig, SchedulerConfig};
use crate::error::{Result, SimError};
use crate::job::metadata::SimulationMetadata;
use crate::job::request::BatchRequest;
use crate::job::spec::{validate_batch, JobSpec};
use crate::renderer::RendererLauncher;
use crate::scheduler::index::{BatchIndex, ErrorRecord};
use crate::scheduler::progress::{ProgressReporter, ProgressSnapshot};
use crate::scheduler::table::JobTable;
use crate::worker::{SessionRunner, WorkerPool};

/// Runs batches of jobs on a worker pool under bounded concurrency with
/// linear retry backoff.
pub struct Orchestrator {
    pool: WorkerPool,
    config: SchedulerConfig,
    runner: SessionRunner,
    progress: Arc<watch::Sender<ProgressSnapshot>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(pool: WorkerPool, config: SchedulerConfig, runner: RunnerConfig) -> Self {
        let (progress, _) = watch::channel(ProgressSnapshot::default());
        Self {
            pool,
            config,
            runner: SessionRunner::new(runner),
            progress: Arc::new(progress),
            cancel: CancellationToken::new(),
        }
    }

    /// Initialize a worker pool and build an orchestrator on top of it.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::PoolInitialization`] if any worker fails to spawn;
    /// no job can run in that case.
    pub async fn launch(
        pool_config: PoolConfig,
        launcher: Arc<dyn RendererLauncher>,
        config: SchedulerConfig,
        runner: RunnerConfig,
    ) -> Result<Self> {
        if config.concurrency > pool_config.size {
            tracing::warn!(
                concurrency = config.concurrency,
                pool_size = pool_config.size,
                "Concurrency exceeds pool size, session acquisition will be the limiting factor"
            );
        }
        let pool = WorkerPool::initialize(pool_config, launcher).await?;
        Ok(Self::new(pool, config, runner))
    }

    /// Run a whole batch request: start the pool, run every job, stop the
    /// pool.
    ///
    /// A pool that fails to start is fatal and no job is attempted. When
    /// `reporter` is given it logs progress for the duration of the batch.
    pub async fn execute(
        request: &BatchRequest,
        launcher: Arc<dyn RendererLauncher>,
        cancel: CancellationToken,
        reporter: Option<ProgressReporter>,
    ) -> Result<BatchIndex> {
        let jobs = request.jobs()?;
        let orchestrator = Self::launch(
            request.pool.clone(),
            launcher,
            request.scheduler_config(),
            request.runner.clone(),
        )
        .await?
        .with_cancellation(cancel);

        let reporting = reporter.map(|reporter| {
            let progress = orchestrator.progress();
            tokio::spawn(async move { reporter.run(progress).await })
        });

        let result = orchestrator.run_batch(jobs).await;
        orchestrator.shutdown().await;
        if let Some(handle) = reporting {
            handle.abort();
        }
        result
    }

    /// Cancelling `token` stops admitting jobs and shuts the pool down.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// Run every job to completion or permanent failure and write the batch
    /// index.
    ///
    /// One job's failure never stops the others. Jobs that exhaust their
    /// attempts get an `error.json`.
    ///
    /// # Errors
    ///
    /// Fails before running anything if the batch is invalid, and afterwards
    /// only if the index itself cannot be written.
    pub async fn run_batch(&self, jobs: Vec<JobSpec>) -> Result<BatchIndex> {
        validate_batch(&jobs)?;

        let output_root = self.config.output_root.clone();
        tokio::fs::create_dir_all(&output_root)
            .await
            .map_err(|e| SimError::artifact(&output_root, e))?;

        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();

        let mut table = JobTable::new();
        for job in jobs {
            let dir = job.output_dir(&output_root);
            table.add_job(job, dir);
        }
        let ids = table.ids();

        let ctx = Arc::new(BatchContext {
            pool: self.pool.clone(),
            runner: self.runner.clone(),
            retry: self.config.retry,
            table: RwLock::new(table),
            progress: self.progress.clone(),
            started,
            cancel: self.cancel.clone(),
        });
        ctx.publish().await;

        let concurrency = self.config.concurrency.max(1);
        tracing::info!(
            batch_id = %batch_id,
            jobs = ids.len(),
            concurrency,
            max_retries = self.config.retry.max_retries,
            output = %output_root.display(),
            "Batch started"
        );

        let watcher = {
            let pool = self.pool.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                tracing::warn!("Batch cancelled, shutting down worker pool");
                let timeout = pool.config().shutdown_timeout();
                pool.shutdown(timeout).await;
            })
        };

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        for id in ids {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit,
                    _ = ctx.cancel.cancelled() => {
                        ctx.cancelled(&id).await;
                        return;
                    }
                };
                let Ok(_permit) = permit else {
                    ctx.cancelled(&id).await;
                    return;
                };
                ctx.run_with_retry(&id).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Job task terminated abnormally");
            }
        }
        if self.cancel.is_cancelled() {
            // Let the pool finish shutting down
            let _ = watcher.await;
        } else {
            watcher.abort();
        }

        {
            let mut table = ctx.table.write().await;
            for id in table.unfinished_jobs() {
                tracing::error!(job_id = %id, "Job task ended without a result, marking failed");
                table.record_failure(&id, "job task terminated abnormally".to_string());
                table.mark_failed(&id);
            }
        }
        ctx.publish().await;

        let index = {
            let table = ctx.table.read().await;
            BatchIndex::from_table(
                batch_id,
                started_at,
                Utc::now(),
                started.elapsed().as_secs_f64(),
                &table,
                &output_root,
            )
        };
        write_json(&output_root.join(INDEX_FILE), &index).await?;

        tracing::info!(
            batch_id = %batch_id,
            total = index.total,
            completed = index.completed,
            failed = index.failed,
            cancelled = index.cancelled,
            elapsed_secs = index.elapsed_secs,
            "Batch finished"
        );
        Ok(index)
    }

    /// Drain and terminate the worker pool.
    pub async fn shutdown(&self) {
        let timeout = self.pool.config().shutdown_timeout();
        self.pool.shutdown(timeout).await;
    }
}

/// State shared by the tasks of one batch.
struct BatchContext {
    pool: WorkerPool,
    runner: SessionRunner,
    retry: RetryPolicy,
    table: RwLock<JobTable>,
    progress: Arc<watch::Sender<ProgressSnapshot>>,
    started: Instant,
    cancel: CancellationToken,
}

impl BatchContext {
    async fn publish(&self) {
        let counts = self.table.read().await.counts();
        self.progress
            .send_replace(ProgressSnapshot::new(counts, self.started.elapsed()));
    }

    async fn cancelled(&self, id: &str) {
        tracing::info!(job_id = %id, "Job cancelled before it started");
        self.table.write().await.mark_cancelled(id);
        self.publish().await;
    }

    /// Attempt the job up to `max_retries + 1` times.
    async fn run_with_retry(&self, id: &str) {
        let Some((spec, output_dir)) = self
            .table
            .read()
            .await
            .get_job(id)
            .map(|job| (job.spec.clone(), job.output_dir.clone()))
        else {
            return;
        };

        let max_attempts = self.retry.max_attempts();
        let mut attempts = 0;
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if self.cancel.is_cancelled() {
                break;
            }
            attempts += 1;
            self.table.write().await.mark_running(id);
            self.publish().await;

            match self.attempt(&spec, &output_dir).await {
                Ok(_) => {
                    self.table.write().await.mark_completed(id);
                    self.publish().await;
                    tracing::info!(job_id = %id, attempt = attempt + 1, "Job completed");
                    return;
                }
                Err(SimError::Cancelled) => {
                    // Cancelled while waiting for a session, nothing ran
                    attempts -= 1;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %id,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Job attempt failed"
                    );
                    let terminal = e.is_terminal();
                    self.table.write().await.record_failure(id, e.to_string());
                    last_error = Some(e);
                    if terminal || attempt + 1 == max_attempts {
                        break;
                    }

                    self.table.write().await.mark_backoff(id);
                    self.publish().await;
                    let delay = self.retry.backoff(attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
            }
        }

        if attempts == 0 || last_error.is_none() {
            self.cancelled(id).await;
            return;
        }

        let error = last_error.unwrap_or(SimError::Cancelled);
        let retry_count = self
            .table
            .read()
            .await
            .get_job(id)
            .map(|job| job.retry_count)
            .unwrap_or(attempts);
        let record = ErrorRecord {
            job_id: spec.id.clone(),
            preset: spec.preset.clone(),
            error: error.to_string(),
            retry_count,
            timestamp: Utc::now(),
        };
        if let Err(e) = JobLayout::new(&output_dir).write_error(&record).await {
            tracing::error!(job_id = %id, error = %e, "Failed to write error record");
        }

        self.table.write().await.mark_failed(id);
        self.publish().await;
        tracing::error!(job_id = %id, retry_count, error = %error, "Job permanently failed");
    }

    /// One attempt: lease a session, run the job, hand the session back.
    async fn attempt(&self, spec: &JobSpec, output_dir: &Path) -> Result<SimulationMetadata> {
        let acquired = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SimError::Cancelled),
            lease = self.pool.acquire() => lease,
        };
        let mut lease = match acquired {
            Ok(lease) => lease,
            // The cancel watcher shut the pool down under us; nothing ran
            Err(SimError::PoolShuttingDown) if self.cancel.is_cancelled() => {
                return Err(SimError::Cancelled)
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(job_id = %spec.id, worker_id = lease.worker_id(), "Session acquired");

        let result = self.runner.run(spec, output_dir, lease.session()).await;
        self.pool.release(lease).await;
        result
    }
}
