//! Pause / cancellation checkpoints for long-running file operations

use crate::{FileOpError, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared control signals observed by long operations at chunk boundaries.
///
/// `pause` carries `true` while the batch is paused. `cancel` is the batch
/// cancellation token.
#[derive(Debug, Clone)]
pub struct OpControl {
    pause: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl OpControl {
    pub fn new(pause: watch::Receiver<bool>, cancel: CancellationToken) -> Self {
        Self { pause, cancel }
    }

    /// A control that is never paused nor cancelled
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(rx, CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Wait while paused. Returns `FileOpError::Cancelled` once cancellation
    /// has been requested, even if the operation is currently paused.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FileOpError::Cancelled);
        }

        if !self.is_paused() {
            return Ok(());
        }

        let mut pause = self.pause.clone();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(FileOpError::Cancelled),
            // A closed channel means nobody can pause us any more
            _ = pause.wait_for(|paused| !*paused) => Ok(()),
        }
    }
}
