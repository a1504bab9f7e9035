use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Renderer did not signal ready within {0:?}")]
    LoadTimeout(Duration),

    #[error("Remote call `{call}` failed: {reason}")]
    RemoteCall { call: String, reason: String },

    #[error("No session obtainable, every worker in the pool has been lost")]
    PoolExhausted,

    #[error("Worker pool is shutting down")]
    PoolShuttingDown,

    #[error("Failed to write artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker pool initialization failed: {0}")]
    PoolInitialization(String),

    #[error("Batch cancelled")]
    Cancelled,

    #[error("Invalid job specification: {0}")]
    InvalidJob(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn remote(call: impl Into<String>, reason: impl ToString) -> Self {
        SimError::RemoteCall {
            call: call.into(),
            reason: reason.to_string(),
        }
    }

    pub fn artifact(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimError::ArtifactWrite {
            path: path.into(),
            source,
        }
    }

    /// Errors after which another attempt cannot succeed in this batch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SimError::PoolShuttingDown
                | SimError::PoolExhausted
                | SimError::Cancelled
                | SimError::InvalidJob(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_message_names_the_call() {
        let err = SimError::remote("step", "socket closed");
        assert_eq!(err.to_string(), "Remote call `step` failed: socket closed");
    }

    #[test]
    fn pool_errors_are_terminal() {
        assert!(SimError::PoolShuttingDown.is_terminal());
        assert!(SimError::PoolExhausted.is_terminal());
        assert!(SimError::Cancelled.is_terminal());
        assert!(!SimError::LoadTimeout(Duration::from_secs(1)).is_terminal());
        assert!(!SimError::remote("render", "boom").is_terminal());
    }
}
