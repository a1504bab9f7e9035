use std::future::Future;
use std::path::Path;
use std::time::Duration;

use serde_json::json;

use crate::artifacts::JobLayout;
use crate::config::RunnerConfig;
use crate::error::{Result, SimError};
use crate::job::metadata::{AppliedIntervention, FrameAnnotation, SimulationMetadata, SolverSnapshot};
use crate::job::spec::{InterventionKind, JobSpec};
use crate::renderer::RenderSession;

/// Renderer option carrying the canvas size as `[width, height]`.
pub const RESOLUTION_OPTION: &str = "resolution";

/// Executes one job against one leased session.
///
/// The protocol is strictly sequential: load and wait for readiness, seed,
/// apply overrides, reset, then step/render/capture every frame, and finally
/// persist the metadata document. Any failure aborts the run; retrying is the
/// caller's decision.
#[derive(Debug, Clone, Default)]
pub struct SessionRunner {
    config: RunnerConfig,
}

impl SessionRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        &self,
        spec: &JobSpec,
        output_dir: &Path,
        session: &mut dyn RenderSession,
    ) -> Result<SimulationMetadata> {
        spec.validate()?;
        let layout = JobLayout::new(output_dir);
        tracing::info!(
            job_id = %spec.id,
            preset = %spec.preset,
            frames = spec.total_frames,
            timesteps_per_frame = spec.timesteps_per_frame,
            output = %output_dir.display(),
            "Running job"
        );

        layout.prepare().await?;

        self.call("loadPreset", session.load_preset(&spec.preset))
            .await?;
        let ready = self.config.ready_timeout();
        match tokio::time::timeout(ready, session.await_ready(ready)).await {
            Ok(result) => result?,
            Err(_) => return Err(SimError::LoadTimeout(ready)),
        }

        // Seeding precedes everything that may consume randomness
        self.call("setSeed", session.set_seed(spec.seed)).await?;
        // Canvas size first so an explicit override of it still wins
        let resolution = json!([spec.resolution.width, spec.resolution.height]);
        self.call("setOption", session.set_option(RESOLUTION_OPTION, &resolution))
            .await?;
        for (key, value) in &spec.overrides {
            self.call("setOption", session.set_option(key, value))
                .await?;
        }
        self.call(
            "recomputeDerivedParameters",
            session.recompute_derived_parameters(),
        )
        .await?;
        self.call("reset", session.reset()).await?;

        let schedule = spec.schedule();
        for late in schedule.iter().filter(|i| i.frame >= spec.total_frames) {
            tracing::warn!(
                job_id = %spec.id,
                frame = late.frame,
                total_frames = spec.total_frames,
                "Intervention scheduled past the last frame will not be applied"
            );
        }

        let mut pending = schedule.iter().peekable();
        let mut annotations = Vec::with_capacity(spec.total_frames as usize);

        for frame in 0..spec.total_frames {
            let mut applied = Vec::new();
            while let Some(intervention) = pending.next_if(|i| i.frame == frame) {
                let InterventionKind::LocalizedEdit(edit) = &intervention.kind;
                self.call("applyLocalizedEdit", session.apply_localized_edit(edit))
                    .await?;
                let sim_time = self
                    .call("getSimulationTime", session.get_simulation_time())
                    .await?;
                tracing::debug!(job_id = %spec.id, frame, field = %edit.field, sim_time, "Intervention applied");
                applied.push(AppliedIntervention {
                    intervention: intervention.clone(),
                    sim_time,
                });
            }

            self.call("step", session.step(spec.timesteps_per_frame))
                .await?;
            self.call("render", session.render()).await?;
            let image = self.call("captureFrame", session.capture_frame()).await?;
            layout.write_frame(frame, &image).await?;

            let sim_time = self
                .call("getSimulationTime", session.get_simulation_time())
                .await?;
            annotations.push(FrameAnnotation::new(frame, sim_time, applied));
            tracing::trace!(job_id = %spec.id, frame, sim_time, "Frame captured");
        }

        let snapshot = self
            .call("getOptionsSnapshot", session.get_options_snapshot())
            .await?;
        let metadata =
            SimulationMetadata::new(spec, SolverSnapshot::from_value(snapshot), annotations);
        layout.write_metadata(&metadata).await?;

        tracing::info!(job_id = %spec.id, frames = metadata.frames.len(), "Job artifacts written");
        Ok(metadata)
    }

    /// Bound one control-API round trip by the call timeout.
    async fn call<T>(&self, name: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit: Duration = self.config.call_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(SimError::remote(name, format!("timed out after {:?}", limit))),
        }
    }
}
