//! Engine error types

use crate::download::DownloadError;
use app_fs::FileOpError;
use thiserror::Error;

/// Batch-level errors.
///
/// Individual action failures never surface here; they are recorded on the
/// action itself and retained in the caller's list.
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== Fatal for the batch =====
    #[error("Batch aborted: {0}")]
    BatchAborted(String),

    // ===== Caller errors =====
    #[error("A batch is already running on this engine")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Did the batch itself fail (as opposed to being refused up front)?
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::BatchAborted(_))
    }
}

/// Why a single action did not complete
#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    File(#[from] FileOpError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Not tracked by the download client: {0}")]
    NotTracked(String),

    #[error("Cancelled")]
    Cancelled,
}

impl ActionError {
    /// Cancellation leaves the action pending rather than failed
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ActionError::Cancelled | ActionError::File(FileOpError::Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_cancel_detection() {
        assert!(ActionError::Cancelled.is_cancelled());
        assert!(ActionError::File(FileOpError::Cancelled).is_cancelled());
        assert!(!ActionError::File(FileOpError::NotFound(PathBuf::from("a"))).is_cancelled());
    }

    #[test]
    fn test_transparent_messages() {
        let err = ActionError::from(FileOpError::NotFound(PathBuf::from("/tv/a.mkv")));
        assert_eq!(err.to_string(), "File not found: /tv/a.mkv");
        assert!(EngineError::BatchAborted("x".into()).is_fatal());
        assert!(!EngineError::AlreadyRunning.is_fatal());
    }
}
