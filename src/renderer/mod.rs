//! Control surface of the external renderer.
//!
//! The core only talks to renderers through these capability traits:
//!
//! - [`RenderSession`]: one exclusive, stateful handle to a running renderer
//! - [`RendererProcess`]: a renderer process hosting sessions
//! - [`RendererLauncher`]: spawns renderer processes for the worker pool
//!
//! [`stdio`] provides the default transport, a child process speaking
//! line-delimited JSON on its standard streams.

pub mod stdio;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::job::spec::LocalizedEdit;

pub use stdio::StdioLauncher;

#[async_trait]
pub trait RenderSession: Send {
    /// Load a preset. Completion is signalled through [`Self::await_ready`].
    async fn load_preset(&mut self, preset: &str) -> Result<()>;

    /// Wait for the renderer's readiness signal, failing after `deadline`.
    async fn await_ready(&mut self, deadline: Duration) -> Result<()>;

    /// Must be called before anything that consumes randomness.
    async fn set_seed(&mut self, seed: u64) -> Result<()>;

    async fn set_option(&mut self, key: &str, value: &serde_json::Value) -> Result<()>;

    async fn recompute_derived_parameters(&mut self) -> Result<()>;

    /// Reset simulation state to the configured initial conditions.
    async fn reset(&mut self) -> Result<()>;

    async fn step(&mut self, steps: u32) -> Result<()>;

    async fn render(&mut self) -> Result<()>;

    /// Encoded still image (PNG) of the last render.
    async fn capture_frame(&mut self) -> Result<Vec<u8>>;

    async fn get_simulation_time(&mut self) -> Result<f64>;

    async fn get_options_snapshot(&mut self) -> Result<serde_json::Value>;

    async fn apply_localized_edit(&mut self, edit: &LocalizedEdit) -> Result<()>;

    /// Return to a neutral state with no preset or overrides loaded.
    async fn clear(&mut self) -> Result<()>;
}

#[async_trait]
pub trait RendererProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Create a fresh session on this process.
    async fn open_session(&mut self) -> Result<Box<dyn RenderSession>>;

    /// Stop the process. Sessions opened on it stop working.
    async fn terminate(&mut self) -> Result<()>;
}

#[async_trait]
pub trait RendererLauncher: Send + Sync {
    async fn launch(&self, worker_id: usize) -> Result<Box<dyn RendererProcess>>;
}
