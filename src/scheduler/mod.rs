//! Batch scheduling: bounded concurrency, retries and batch reporting.
//!
//! - [`Orchestrator`]: admits a batch, runs each job through the retry
//!   wrapper and writes the batch index
//! - [`JobTable`]: the status of every job in the running batch
//! - [`ProgressSnapshot`]/[`ProgressReporter`]: live counts, throughput and ETA
//! - [`BatchIndex`]/[`ErrorRecord`]: documents persisted at the end of a job or batch

pub mod index;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod table;

pub use index::{BatchIndex, ErrorRecord, IndexEntry};
pub use job::{JobState, JobStatus};
pub use orchestrator::Orchestrator;
pub use progress::{ProgressReporter, ProgressSnapshot};
pub use table::{JobCounts, JobTable};
