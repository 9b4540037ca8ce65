use std::io;

use thiserror::Error;

use crate::runtime::ExecError;

use super::resume::ResumeTokenError;

/// Errors surfaced by a capture session
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The entry point failed and recovery could not make progress
    #[error("entry point {entry_point} failed: {source}")]
    Invocation {
        entry_point: String,
        #[source]
        source: ExecError,
    },
    #[error("capture cancelled")]
    Cancelled,
    #[error("store error: {0}")]
    Store(#[from] io::Error),
    #[error("failed to launch generation {generation}: {source}")]
    Spawn {
        generation: u32,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    ResumeToken(#[from] ResumeTokenError),
    #[error("capture task failed: {0}")]
    Task(String),
    /// Reported by later `wait_for_completion` calls once the first one
    /// has handed out the original error
    #[error("capture already failed: {0}")]
    AlreadyFailed(String),
}

impl CaptureError {
    /// The interpreter error behind an invocation failure, if any
    pub fn exec_error(&self) -> Option<&ExecError> {
        match self {
            CaptureError::Invocation { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for CaptureError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            CaptureError::Cancelled
        } else {
            CaptureError::Task(e.to_string())
        }
    }
}
