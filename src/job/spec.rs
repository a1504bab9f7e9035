use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditShape {
    Circle,
    Square,
    Gaussian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    Replace,
    Add,
    Multiply,
}

/// A brush-style edit of one solver field around a normalized position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedEdit {
    /// Horizontal position in `[0, 1]`
    pub x: f64,
    /// Vertical position in `[0, 1]`
    pub y: f64,
    /// Target field identifier (e.g. `"u"`, `"v"`)
    pub field: String,
    pub value: f64,
    /// Radius in normalized canvas units
    pub radius: f64,
    pub shape: EditShape,
    pub mode: ApplyMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterventionKind {
    LocalizedEdit(LocalizedEdit),
}

/// An edit applied immediately before frame `frame` is stepped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub frame: u32,
    #[serde(flatten)]
    pub kind: InterventionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl Intervention {
    pub fn localized_edit(frame: u32, edit: LocalizedEdit) -> Self {
        Self {
            frame,
            kind: InterventionKind::LocalizedEdit(edit),
            caption: None,
        }
    }
}

/// Declarative request to run one simulation to completion and capture it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub preset: String,
    #[serde(default)]
    pub overrides: BTreeMap<String, serde_json::Value>,
    pub total_frames: u32,
    pub timesteps_per_frame: u32,
    #[serde(default)]
    pub resolution: Resolution,
    pub seed: u64,
    #[serde(default)]
    pub interventions: Vec<Intervention>,
    /// Defaults to `<output_root>/<preset>/<id>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, preset: impl Into<String>, seed: u64) -> Self {
        Self {
            id: id.into(),
            preset: preset.into(),
            overrides: BTreeMap::new(),
            total_frames: 0,
            timesteps_per_frame: 1,
            resolution: Resolution::default(),
            seed,
            interventions: Vec::new(),
            output_dir: None,
        }
    }

    pub fn with_frames(mut self, total_frames: u32, timesteps_per_frame: u32) -> Self {
        self.total_frames = total_frames;
        self.timesteps_per_frame = timesteps_per_frame;
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }

    pub fn with_intervention(mut self, intervention: Intervention) -> Self {
        self.interventions.push(intervention);
        self
    }

    pub fn output_dir(&self, output_root: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => output_root.join(&self.preset).join(&self.id),
        }
    }

    /// Interventions ordered by frame; equal frames keep list order.
    pub fn schedule(&self) -> Vec<Intervention> {
        let mut schedule = self.interventions.clone();
        schedule.sort_by_key(|i| i.frame);
        schedule
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SimError::InvalidJob(format!("{}: {}", self.id, msg)));

        if self.id.is_empty() {
            return Err(SimError::InvalidJob("job id is empty".to_string()));
        }
        if !is_path_component(&self.id) {
            return invalid("id must be usable as a directory name".to_string());
        }
        if !is_path_component(&self.preset) {
            return invalid(format!("preset {:?} is not a valid directory name", self.preset));
        }
        if self.timesteps_per_frame == 0 {
            return invalid("timesteps_per_frame must be at least 1".to_string());
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return invalid("resolution must be non-zero".to_string());
        }
        for intervention in &self.interventions {
            let InterventionKind::LocalizedEdit(edit) = &intervention.kind;
            if !(0.0..=1.0).contains(&edit.x) || !(0.0..=1.0).contains(&edit.y) {
                return invalid(format!(
                    "intervention at frame {} has position ({}, {}) outside [0,1]",
                    intervention.frame, edit.x, edit.y
                ));
            }
            if !edit.radius.is_finite() || edit.radius < 0.0 {
                return invalid(format!(
                    "intervention at frame {} has invalid radius {}",
                    intervention.frame, edit.radius
                ));
            }
        }
        Ok(())
    }
}

fn is_path_component(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

/// Validate every job and check ids are unique within the batch.
pub fn validate_batch(jobs: &[JobSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for job in jobs {
        job.validate()?;
        if !seen.insert(job.id.as_str()) {
            return Err(SimError::InvalidJob(format!("duplicate job id {}", job.id)));
        }
    }
    Ok(())
}
