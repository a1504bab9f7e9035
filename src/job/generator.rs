//! Expands a high-level generation request into concrete job specifications.
//!
//! Generation is a pure function of the request: all randomness comes from a
//! `StdRng` seeded with [`GenerationRequest::seed`], and every produced job
//! carries its own explicit seed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::job::spec::{
    ApplyMode, EditShape, Intervention, JobSpec, LocalizedEdit, Resolution,
};

/// Inclusive numeric range sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Both bounds and their span must be finite for uniform sampling.
    fn check(&self, name: &str) -> Result<()> {
        if self.min.is_finite() && self.max.is_finite() && (self.max - self.min).is_finite() {
            Ok(())
        } else {
            Err(SimError::InvalidJob(format!(
                "{} range [{}, {}] is not a finite interval",
                name, self.min, self.max
            )))
        }
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        if self.max <= self.min {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    pub count: usize,
    /// Presets assigned round-robin
    pub presets: Vec<String>,
    pub total_frames: u32,
    pub timesteps_per_frame: u32,
    pub resolution: Resolution,
    /// Master seed for the whole request
    pub seed: u64,
    pub randomize_parameters: bool,
    pub parameter_ranges: BTreeMap<String, ValueRange>,
    pub randomize_interventions: bool,
    pub interventions_per_job: CountRange,
    pub intervention_fields: Vec<String>,
    pub value_range: ValueRange,
    pub radius_range: ValueRange,
    pub shapes: Vec<EditShape>,
    pub modes: Vec<ApplyMode>,
    /// When set, jobs get an explicit `<output_root>/<preset>/<id>` location
    pub output_root: Option<PathBuf>,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            count: 1,
            presets: Vec::new(),
            total_frames: 100,
            timesteps_per_frame: 1,
            resolution: Resolution::default(),
            seed: 0,
            randomize_parameters: false,
            parameter_ranges: BTreeMap::new(),
            randomize_interventions: false,
            interventions_per_job: CountRange { min: 0, max: 3 },
            intervention_fields: vec!["u".to_string()],
            value_range: ValueRange::new(0.0, 1.0),
            radius_range: ValueRange::new(0.02, 0.1),
            shapes: vec![EditShape::Circle],
            modes: vec![ApplyMode::Replace],
            output_root: None,
        }
    }
}

pub fn generate(request: &GenerationRequest) -> Result<Vec<JobSpec>> {
    if request.presets.is_empty() {
        return Err(SimError::InvalidJob(
            "generation request names no presets".to_string(),
        ));
    }
    if request.timesteps_per_frame == 0 {
        return Err(SimError::InvalidJob(
            "timesteps_per_frame must be at least 1".to_string(),
        ));
    }

    for (key, range) in &request.parameter_ranges {
        range.check(key)?;
    }
    request.value_range.check("value")?;
    request.radius_range.check("radius")?;

    let mut rng = StdRng::seed_from_u64(request.seed);
    let mut jobs = Vec::with_capacity(request.count);

    for index in 0..request.count {
        let preset = &request.presets[index % request.presets.len()];
        let id = format!("{}-{:05}", preset, index);
        let mut job = JobSpec::new(id, preset.clone(), rng.gen())
            .with_frames(request.total_frames, request.timesteps_per_frame);
        job.resolution = request.resolution;

        if request.randomize_parameters {
            for (key, range) in &request.parameter_ranges {
                job.overrides
                    .insert(key.clone(), serde_json::json!(range.sample(&mut rng)));
            }
        }

        if request.randomize_interventions && request.total_frames > 0 {
            job.interventions = sample_interventions(request, &mut rng);
        }

        if let Some(root) = &request.output_root {
            job.output_dir = Some(root.join(&job.preset).join(&job.id));
        }

        jobs.push(job);
    }

    Ok(jobs)
}

fn sample_interventions(request: &GenerationRequest, rng: &mut StdRng) -> Vec<Intervention> {
    let CountRange { min, max } = request.interventions_per_job;
    let count = if max <= min {
        min
    } else {
        rng.gen_range(min..=max)
    };

    let mut interventions: Vec<Intervention> = (0..count)
        .filter_map(|_| {
            let field = request.intervention_fields.choose(rng)?.clone();
            let shape = *request.shapes.choose(rng)?;
            let mode = *request.modes.choose(rng)?;
            let edit = LocalizedEdit {
                x: rng.gen_range(0.0..=1.0),
                y: rng.gen_range(0.0..=1.0),
                field,
                value: request.value_range.sample(rng),
                radius: request.radius_range.sample(rng).max(0.0),
                shape,
                mode,
            };
            Some(Intervention::localized_edit(
                rng.gen_range(0..request.total_frames),
                edit,
            ))
        })
        .collect();

    interventions.sort_by_key(|i| i.frame);
    interventions
}
