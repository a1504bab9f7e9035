use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::spec::{Intervention, JobSpec, Resolution};

/// An intervention together with the simulation time observed right after
/// it was applied, before the frame's steps run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedIntervention {
    #[serde(flatten)]
    pub intervention: Intervention,
    pub sim_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAnnotation {
    pub frame: u32,
    /// Simulation time at capture
    pub sim_time: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interventions: Vec<AppliedIntervention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl FrameAnnotation {
    pub fn new(frame: u32, sim_time: f64, interventions: Vec<AppliedIntervention>) -> Self {
        let caption = interventions
            .iter()
            .find_map(|a| a.intervention.caption.clone());
        let tags = if interventions.is_empty() {
            Vec::new()
        } else {
            vec!["intervention".to_string()]
        };
        Self {
            frame,
            sim_time,
            interventions,
            caption,
            tags,
        }
    }
}

/// Descriptive state reported by the renderer at the end of a run.
///
/// Well-known sections are lifted into named fields, everything else is kept
/// verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equations: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SolverSnapshot {
    /// Lift a raw options document. Non-object documents are kept under `raw`.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
            other => {
                let mut extra = BTreeMap::new();
                extra.insert("raw".to_string(), other);
                Self {
                    extra,
                    ..Default::default()
                }
            }
        }
    }
}

/// The document persisted as `metadata.json` once a job completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetadata {
    pub job_id: String,
    pub preset: String,
    pub seed: u64,
    pub total_frames: u32,
    pub timesteps_per_frame: u32,
    pub resolution: Resolution,
    pub overrides: BTreeMap<String, serde_json::Value>,
    pub interventions: Vec<Intervention>,
    pub solver: SolverSnapshot,
    pub frames: Vec<FrameAnnotation>,
    pub created_at: DateTime<Utc>,
}

impl SimulationMetadata {
    pub fn new(spec: &JobSpec, solver: SolverSnapshot, frames: Vec<FrameAnnotation>) -> Self {
        Self {
            job_id: spec.id.clone(),
            preset: spec.preset.clone(),
            seed: spec.seed,
            total_frames: spec.total_frames,
            timesteps_per_frame: spec.timesteps_per_frame,
            resolution: spec.resolution,
            overrides: spec.overrides.clone(),
            interventions: spec.schedule(),
            solver,
            frames,
            created_at: Utc::now(),
        }
    }
}
