use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::config::PoolConfig;
use crate::error::{Result, SimError};
use crate::renderer::{RenderSession, RendererLauncher, RendererProcess};

/// A renderer process owned by the pool.
pub struct WorkerRecord {
    pub id: usize,
    process: Box<dyn RendererProcess>,
    /// Leases served since the last (re)spawn
    pub leases: u32,
    /// Number of times this worker has been respawned
    pub generation: u32,
}

/// Read-only view of a worker for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: usize,
    pub pid: Option<u32>,
    pub leases: u32,
    pub generation: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub live: usize,
    pub available: usize,
    pub busy: usize,
    pub recycles: u64,
    pub lost: usize,
    pub draining: bool,
}

struct Slot {
    worker_id: usize,
    session: Box<dyn RenderSession>,
}

#[derive(Default)]
struct PoolState {
    available: VecDeque<Slot>,
    busy: HashSet<usize>,
    workers: HashMap<usize, WorkerRecord>,
    /// Workers taken out of `workers` while their session is reset or respawned
    in_transit: usize,
    draining: bool,
    terminated: bool,
    recycles: u64,
    lost: usize,
}

struct PoolShared {
    config: PoolConfig,
    launcher: Arc<dyn RendererLauncher>,
    state: Mutex<PoolState>,
    /// Signalled whenever a session becomes available, a lease ends, or the
    /// pool starts draining.
    changed: Notify,
}

/// Fixed-size pool of renderer processes, each backing one session.
///
/// Sessions are lent out exclusively through [`SessionLease`]. A process is
/// torn down and respawned once it has served `recycle_threshold` leases,
/// which bounds memory growth in long-lived renderers.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Spawn `config.size` processes and open one session on each.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::PoolInitialization`] if any worker cannot be
    /// spawned; workers started before the failure are terminated.
    pub async fn initialize(config: PoolConfig, launcher: Arc<dyn RendererLauncher>) -> Result<Self> {
        if config.size == 0 {
            return Err(SimError::PoolInitialization(
                "pool size must be at least 1".to_string(),
            ));
        }
        if config.recycle_threshold == 0 {
            return Err(SimError::PoolInitialization(
                "recycle threshold must be at least 1".to_string(),
            ));
        }

        let mut state = PoolState::default();
        for id in 0..config.size {
            match spawn_worker(launcher.as_ref(), id).await {
                Ok((process, session)) => {
                    state.workers.insert(
                        id,
                        WorkerRecord {
                            id,
                            process,
                            leases: 0,
                            generation: 0,
                        },
                    );
                    state.available.push_back(Slot {
                        worker_id: id,
                        session,
                    });
                }
                Err(e) => {
                    tracing::error!(worker_id = id, error = %e, "Failed to spawn worker");
                    state.available.clear();
                    for record in state.workers.values_mut() {
                        if let Err(e) = record.process.terminate().await {
                            tracing::warn!(worker_id = record.id, error = %e, "Failed to terminate worker");
                        }
                    }
                    return Err(SimError::PoolInitialization(format!("worker {}: {}", id, e)));
                }
            }
        }

        tracing::info!(
            size = config.size,
            recycle_threshold = config.recycle_threshold,
            "Worker pool initialized"
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                launcher,
                state: Mutex::new(state),
                changed: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Take an available session, waiting while every session is leased.
    ///
    /// # Errors
    ///
    /// - [`SimError::PoolShuttingDown`] once [`Self::shutdown`] has started,
    ///   including for callers already waiting.
    /// - [`SimError::PoolExhausted`] if every worker has been lost.
    pub async fn acquire(&self) -> Result<SessionLease> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock().await;
                if state.draining {
                    return Err(SimError::PoolShuttingDown);
                }
                if let Some(slot) = state.available.pop_front() {
                    state.busy.insert(slot.worker_id);
                    tracing::debug!(worker_id = slot.worker_id, busy = state.busy.len(), "Session leased");
                    return Ok(SessionLease {
                        worker_id: slot.worker_id,
                        session: Some(slot.session),
                        pool: self.shared.clone(),
                    });
                }
                if state.workers.is_empty() && state.in_transit == 0 {
                    return Err(SimError::PoolExhausted);
                }
            }

            notified.await;
        }
    }

    /// Return a leased session to the pool, resetting or recycling its worker.
    pub async fn release(&self, mut lease: SessionLease) {
        if let Some(session) = lease.session.take() {
            self.shared.release_slot(lease.worker_id, session).await;
        }
    }

    /// Stop lending sessions, wait up to `timeout` for outstanding leases,
    /// then terminate every process whether or not it is still leased.
    pub async fn shutdown(&self, timeout: Duration) {
        {
            let mut state = self.shared.state.lock().await;
            if state.terminated {
                return;
            }
            state.draining = true;
            tracing::info!(busy = state.busy.len(), "Worker pool draining");
        }
        self.shared.changed.notify_waiters();

        if tokio::time::timeout(timeout, self.wait_idle()).await.is_err() {
            let busy = self.shared.state.lock().await.busy.len();
            tracing::warn!(busy, ?timeout, "Leases still outstanding, forcing worker termination");
        }

        let records: Vec<WorkerRecord> = {
            let mut state = self.shared.state.lock().await;
            state.terminated = true;
            state.available.clear();
            state.workers.drain().map(|(_, record)| record).collect()
        };
        for mut record in records {
            if let Err(e) = record.process.terminate().await {
                tracing::warn!(worker_id = record.id, error = %e, "Failed to terminate worker");
            }
        }
        self.shared.changed.notify_waiters();
        tracing::info!("Worker pool shut down");
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.state.lock().await;
                if state.busy.is_empty() && state.in_transit == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().await;
        PoolStats {
            size: self.shared.config.size,
            live: state.workers.len() + state.in_transit,
            available: state.available.len(),
            busy: state.busy.len(),
            recycles: state.recycles,
            lost: state.lost,
            draining: state.draining,
        }
    }

    /// Workers currently resident in the pool, ordered by id.
    pub async fn workers(&self) -> Vec<WorkerInfo> {
        let state = self.shared.state.lock().await;
        let mut workers: Vec<WorkerInfo> = state
            .workers
            .values()
            .map(|w| WorkerInfo {
                id: w.id,
                pid: w.process.pid(),
                leases: w.leases,
                generation: w.generation,
            })
            .collect();
        workers.sort_by_key(|w| w.id);
        workers
    }
}

impl PoolShared {
    async fn release_slot(&self, worker_id: usize, session: Box<dyn RenderSession>) {
        let (mut record, recycle) = {
            let mut state = self.state.lock().await;
            if state.terminated {
                state.busy.remove(&worker_id);
                drop(state);
                self.changed.notify_waiters();
                return;
            }
            let Some(mut record) = state.workers.remove(&worker_id) else {
                tracing::warn!(worker_id, "Released session for unknown worker");
                state.busy.remove(&worker_id);
                drop(state);
                self.changed.notify_waiters();
                return;
            };
            record.leases += 1;
            if state.draining {
                // Returned untouched so shutdown can terminate it
                state.workers.insert(worker_id, record);
                state.busy.remove(&worker_id);
                state.available.push_back(Slot { worker_id, session });
                drop(state);
                self.changed.notify_waiters();
                return;
            }
            state.in_transit += 1;
            let recycle = record.leases >= self.config.recycle_threshold;
            (record, recycle)
        };

        let (session, recycled) = if recycle {
            drop(session);
            (self.recycle(&mut record).await, true)
        } else {
            match self.refresh(&mut record, session).await {
                Some(session) => (Some(session), false),
                None => (self.recycle(&mut record).await, true),
            }
        };

        let mut orphan = None;
        {
            let mut state = self.state.lock().await;
            state.in_transit -= 1;
            state.busy.remove(&worker_id);
            match session {
                Some(session) if !state.terminated => {
                    if recycled {
                        state.recycles += 1;
                    }
                    state.workers.insert(worker_id, record);
                    state.available.push_back(Slot { worker_id, session });
                }
                Some(_) => orphan = Some(record),
                None => {
                    state.lost += 1;
                    tracing::error!(
                        worker_id,
                        live = state.workers.len() + state.in_transit,
                        "Worker lost, pool capacity reduced"
                    );
                }
            }
        }
        self.changed.notify_waiters();

        // Shutdown finished while this worker was being respawned
        if let Some(mut record) = orphan {
            if let Err(e) = record.process.terminate().await {
                tracing::warn!(worker_id, error = %e, "Failed to terminate worker");
            }
        }
    }

    /// Bring a session back to a neutral state, opening a new session on the
    /// same process if that fails.
    async fn refresh(
        &self,
        record: &mut WorkerRecord,
        mut session: Box<dyn RenderSession>,
    ) -> Option<Box<dyn RenderSession>> {
        let cleared = session.clear().await;
        match cleared {
            Ok(()) => return Some(session),
            Err(e) => {
                tracing::warn!(worker_id = record.id, error = %e, "Session reset failed, opening a new session");
            }
        }
        drop(session);
        match record.process.open_session().await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(worker_id = record.id, error = %e, "Reopening session failed, recycling worker");
                None
            }
        }
    }

    /// Tear the worker's process down and start a fresh one in its place.
    async fn recycle(&self, record: &mut WorkerRecord) -> Option<Box<dyn RenderSession>> {
        tracing::info!(
            worker_id = record.id,
            leases = record.leases,
            generation = record.generation,
            "Recycling worker"
        );
        if let Err(e) = record.process.terminate().await {
            tracing::warn!(worker_id = record.id, error = %e, "Failed to terminate worker");
        }
        match spawn_worker(self.launcher.as_ref(), record.id).await {
            Ok((process, session)) => {
                record.process = process;
                record.leases = 0;
                record.generation += 1;
                Some(session)
            }
            Err(e) => {
                tracing::error!(worker_id = record.id, error = %e, "Failed to respawn worker");
                None
            }
        }
    }
}

async fn spawn_worker(
    launcher: &dyn RendererLauncher,
    id: usize,
) -> Result<(Box<dyn RendererProcess>, Box<dyn RenderSession>)> {
    let mut process = launcher.launch(id).await?;
    let opened = process.open_session().await;
    match opened {
        Ok(session) => Ok((process, session)),
        Err(e) => {
            if let Err(term) = process.terminate().await {
                tracing::warn!(worker_id = id, error = %term, "Failed to terminate worker");
            }
            Err(e)
        }
    }
}

/// Exclusive use of one pooled session.
///
/// Hand it back with [`WorkerPool::release`]. A lease dropped without being
/// released (for example when its task is cancelled) is released on a
/// background task instead, so every acquire is matched by one release.
pub struct SessionLease {
    worker_id: usize,
    session: Option<Box<dyn RenderSession>>,
    pool: Arc<PoolShared>,
}

impl SessionLease {
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn session(&mut self) -> &mut dyn RenderSession {
        self.session
            .as_deref_mut()
            .expect("lease holds its session until released")
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let worker_id = self.worker_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(worker_id, "Lease dropped without release, releasing in background");
                let pool = self.pool.clone();
                handle.spawn(async move {
                    pool.release_slot(worker_id, session).await;
                });
            }
            Err(_) => {
                tracing::error!(worker_id, "Lease dropped outside a runtime, session discarded");
            }
        }
    }
}
