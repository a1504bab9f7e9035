//! In-memory renderer used by the integration tests.
//!
//! [`FakeRenderer`] implements [`RendererLauncher`]; every process and session
//! it creates reports into one shared [`FakeState`], so tests can inspect the
//! calls made, count launches and terminations, and inject failures.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use simforge::config::{PoolConfig, RetryPolicy, RunnerConfig, SchedulerConfig};
use simforge::job::{ApplyMode, EditShape, Intervention, JobSpec, LocalizedEdit};
use simforge::renderer::{RenderSession, RendererLauncher, RendererProcess};
use simforge::{Result, SimError};

/// Simulation time added per solver step.
pub const STEP_DT: f64 = 0.5;

pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Failure injection knobs.
#[derive(Debug, Default, Clone)]
pub struct Behavior {
    /// Preset -> number of `load_preset` calls that fail before it succeeds
    pub fail_loads: HashMap<String, usize>,
    /// Presets that never signal readiness
    pub never_ready: HashSet<String>,
    /// Presets whose `step` always fails
    pub fail_steps: HashSet<String>,
    /// Launches with this zero-based index or later fail
    pub fail_launch_from: Option<usize>,
    /// `clear` always fails
    pub fail_clear: bool,
    /// Time spent inside each `step`
    pub step_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Zero-based launch number of the hosting process
    pub process: usize,
    pub session: u64,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub behavior: Behavior,
    pub launches: usize,
    pub terminations: usize,
    pub sessions_opened: usize,
    pub calls: Vec<Call>,
    pub active_steps: usize,
    pub max_active_steps: usize,
}

#[derive(Clone, Default)]
pub struct FakeRenderer {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        let renderer = Self::default();
        renderer.state.lock().unwrap().behavior = behavior;
        renderer
    }

    pub fn launcher(&self) -> Arc<dyn RendererLauncher> {
        Arc::new(self.clone())
    }

    /// A session on a detached process, for driving the runner directly.
    pub fn session(&self) -> FakeSession {
        self.state.lock().unwrap().sessions_opened += 1;
        FakeSession::new(self.state.clone(), usize::MAX, 0, Arc::new(AtomicBool::new(true)))
    }

    pub fn launches(&self) -> usize {
        self.state.lock().unwrap().launches
    }

    pub fn terminations(&self) -> usize {
        self.state.lock().unwrap().terminations
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().unwrap().sessions_opened
    }

    pub fn max_active_steps(&self) -> usize {
        self.state.lock().unwrap().max_active_steps
    }

    pub fn call_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.name == name)
            .count()
    }
}

#[async_trait]
impl RendererLauncher for FakeRenderer {
    async fn launch(&self, _worker_id: usize) -> Result<Box<dyn RendererProcess>> {
        let mut state = self.state.lock().unwrap();
        let index = state.launches;
        if state.behavior.fail_launch_from.is_some_and(|from| index >= from) {
            return Err(SimError::remote("spawn", "renderer binary crashed on start"));
        }
        state.launches += 1;
        Ok(Box::new(FakeProcess {
            state: self.state.clone(),
            launch: index,
            next_session: 0,
            alive: Arc::new(AtomicBool::new(true)),
        }))
    }
}

pub struct FakeProcess {
    state: Arc<Mutex<FakeState>>,
    launch: usize,
    next_session: u64,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl RendererProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(10_000 + self.launch as u32)
    }

    async fn open_session(&mut self) -> Result<Box<dyn RenderSession>> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(SimError::remote("openSession", "renderer disconnected"));
        }
        self.state.lock().unwrap().sessions_opened += 1;
        let session = self.next_session;
        self.next_session += 1;
        Ok(Box::new(FakeSession::new(
            self.state.clone(),
            self.launch,
            session,
            self.alive.clone(),
        )))
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.state.lock().unwrap().terminations += 1;
        }
        Ok(())
    }
}

pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    process: usize,
    session: u64,
    alive: Arc<AtomicBool>,
    preset: Option<String>,
    ready: bool,
    seed: Option<u64>,
    options: BTreeMap<String, Value>,
    time: f64,
    rendered: u32,
}

impl FakeSession {
    fn new(state: Arc<Mutex<FakeState>>, process: usize, session: u64, alive: Arc<AtomicBool>) -> Self {
        Self {
            state,
            process,
            session,
            alive,
            preset: None,
            ready: false,
            seed: None,
            options: BTreeMap::new(),
            time: 0.0,
            rendered: 0,
        }
    }

    fn record(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if !self.alive.load(Ordering::SeqCst) {
            return Err(SimError::remote(name, "renderer disconnected"));
        }
        self.state.lock().unwrap().calls.push(Call {
            process: self.process,
            session: self.session,
            name,
        });
        Ok(())
    }

    fn behavior(&self) -> Behavior {
        self.state.lock().unwrap().behavior.clone()
    }
}

#[async_trait]
impl RenderSession for FakeSession {
    async fn load_preset(&mut self, preset: &str) -> Result<()> {
        self.record("loadPreset")?;
        {
            let mut state = self.state.lock().unwrap();
            if let Some(remaining) = state.behavior.fail_loads.get_mut(preset) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SimError::remote("loadPreset", format!("preset {} crashed", preset)));
                }
            }
        }
        self.preset = Some(preset.to_string());
        self.ready = !self.behavior().never_ready.contains(preset);
        Ok(())
    }

    async fn await_ready(&mut self, _deadline: Duration) -> Result<()> {
        self.record("awaitReady")?;
        if !self.ready {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn set_seed(&mut self, seed: u64) -> Result<()> {
        self.record("setSeed")?;
        self.seed = Some(seed);
        Ok(())
    }

    async fn set_option(&mut self, key: &str, value: &Value) -> Result<()> {
        self.record(format!("setOption:{}", key))?;
        self.options.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn recompute_derived_parameters(&mut self) -> Result<()> {
        self.record("recomputeDerivedParameters")
    }

    async fn reset(&mut self) -> Result<()> {
        self.record("reset")?;
        self.time = 0.0;
        Ok(())
    }

    async fn step(&mut self, steps: u32) -> Result<()> {
        self.record("step")?;
        let behavior = self.behavior();
        if self
            .preset
            .as_ref()
            .is_some_and(|p| behavior.fail_steps.contains(p))
        {
            return Err(SimError::remote("step", "solver diverged"));
        }

        {
            let mut state = self.state.lock().unwrap();
            state.active_steps += 1;
            state.max_active_steps = state.max_active_steps.max(state.active_steps);
        }
        if !behavior.step_delay.is_zero() {
            tokio::time::sleep(behavior.step_delay).await;
        }
        self.state.lock().unwrap().active_steps -= 1;

        self.time += f64::from(steps) * STEP_DT;
        Ok(())
    }

    async fn render(&mut self) -> Result<()> {
        self.record("render")?;
        self.rendered += 1;
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Vec<u8>> {
        self.record("captureFrame")?;
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&self.rendered.to_be_bytes());
        Ok(png)
    }

    async fn get_simulation_time(&mut self) -> Result<f64> {
        self.record("getSimulationTime")?;
        Ok(self.time)
    }

    async fn get_options_snapshot(&mut self) -> Result<Value> {
        self.record("getOptionsSnapshot")?;
        Ok(json!({
            "equations": {"u": "D_u*lap(u) - u*v^2 + F*(1-u)"},
            "parameters": self.options,
            "resolution": self.options.get("resolution").cloned().unwrap_or(json!([256, 256])),
            "preset": self.preset,
            "seed": self.seed,
        }))
    }

    async fn apply_localized_edit(&mut self, edit: &LocalizedEdit) -> Result<()> {
        self.record(format!("applyLocalizedEdit:{}", edit.field))
    }

    async fn clear(&mut self) -> Result<()> {
        self.record("clear")?;
        if self.behavior().fail_clear {
            return Err(SimError::remote("clear", "navigation failed"));
        }
        self.preset = None;
        self.ready = false;
        self.seed = None;
        self.options.clear();
        self.time = 0.0;
        Ok(())
    }
}

pub fn edit(field: &str) -> LocalizedEdit {
    LocalizedEdit {
        x: 0.5,
        y: 0.5,
        field: field.to_string(),
        value: 1.0,
        radius: 0.1,
        shape: EditShape::Circle,
        mode: ApplyMode::Replace,
    }
}

pub fn job(id: &str, preset: &str, frames: u32) -> JobSpec {
    JobSpec::new(id, preset, 42).with_frames(frames, 2)
}

pub fn intervention(frame: u32, field: &str) -> Intervention {
    Intervention::localized_edit(frame, edit(field))
}

pub fn test_runner_config() -> RunnerConfig {
    RunnerConfig {
        ready_timeout_ms: 100,
        call_timeout_ms: 1_000,
    }
}

pub fn test_pool_config(size: usize, recycle_threshold: u32) -> PoolConfig {
    PoolConfig {
        shutdown_timeout_ms: 200,
        ..PoolConfig::new(size, recycle_threshold)
    }
}

pub fn test_scheduler_config(root: &Path, concurrency: usize, max_retries: u32) -> SchedulerConfig {
    SchedulerConfig::new(root, concurrency).with_retry(RetryPolicy::new(max_retries, 10))
}

/// Sorted frame file names of a job directory.
pub fn frame_files(job_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(job_dir.join("frames"))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

pub fn expected_frames(count: u32) -> Vec<String> {
    (0..count).map(|i| format!("{:06}.png", i)).collect()
}

pub fn read_json(path: &Path) -> Value {
    let raw = std::fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
    serde_json::from_str(&raw).unwrap()
}
