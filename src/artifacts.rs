//! On-disk layout of a batch:
//!
//! ```text
//! <output>/index.json
//! <output>/<preset>/<job-id>/metadata.json
//! <output>/<preset>/<job-id>/frames/NNNNNN.png
//! <output>/<preset>/<job-id>/error.json
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, SimError};

pub const INDEX_FILE: &str = "index.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const ERROR_FILE: &str = "error.json";
pub const FRAMES_DIR: &str = "frames";

pub fn frame_file_name(index: u32) -> String {
    format!("{:06}.png", index)
}

/// Paths of one job's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    root: PathBuf,
}

impl JobLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join(FRAMES_DIR)
    }

    pub fn frame_path(&self, index: u32) -> PathBuf {
        self.frames_dir().join(frame_file_name(index))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn error_path(&self) -> PathBuf {
        self.root.join(ERROR_FILE)
    }

    /// Discard whatever an earlier attempt left behind and create an empty
    /// `frames/` directory.
    pub async fn prepare(&self) -> Result<()> {
        let frames = self.frames_dir();
        match tokio::fs::remove_dir_all(&frames).await {
            Ok(()) => tracing::debug!(path = %frames.display(), "Removed partial frames"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(SimError::artifact(frames, e)),
        }
        remove_if_exists(&self.metadata_path()).await?;
        remove_if_exists(&self.error_path()).await?;
        tokio::fs::create_dir_all(&frames)
            .await
            .map_err(|e| SimError::artifact(frames, e))
    }

    pub async fn write_frame(&self, index: u32, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.frame_path(index);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| SimError::artifact(&path, e))?;
        Ok(path)
    }

    pub async fn write_metadata<T: Serialize>(&self, metadata: &T) -> Result<()> {
        write_json(&self.metadata_path(), metadata).await
    }

    pub async fn write_error<T: Serialize>(&self, record: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SimError::artifact(&self.root, e))?;
        write_json(&self.error_path(), record).await
    }

    /// Sorted frame file names currently on disk.
    pub async fn list_frames(&self) -> Result<Vec<String>> {
        let frames = self.frames_dir();
        let mut entries = match tokio::fs::read_dir(&frames).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SimError::artifact(frames, e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SimError::artifact(&frames, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SimError::artifact(path, e)),
    }
}

/// Write pretty JSON through a temporary file so readers never see a torn
/// document.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| SimError::artifact(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| SimError::artifact(path, e))
}

/// Path of `path` relative to `root`, falling back to the full path.
pub fn relative_to(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
