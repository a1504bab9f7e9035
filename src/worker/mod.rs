//! Renderer workers and the per-job execution protocol.
//!
//! - [`WorkerPool`]: owns the renderer processes, lends out sessions and
//!   recycles processes after a lease threshold
//! - [`SessionRunner`]: runs one job on one leased session and writes its
//!   frames and metadata
//!
//! # Lease lifecycle
//!
//! 1. [`WorkerPool::acquire`] hands out an exclusive [`SessionLease`]
//! 2. [`SessionRunner::run`] drives the session through the job
//! 3. [`WorkerPool::release`] clears the session, or respawns the worker once
//!    its lease counter reaches the recycle threshold

pub mod pool;
pub mod runner;

pub use pool::{PoolStats, SessionLease, WorkerInfo, WorkerPool};
pub use runner::SessionRunner;
