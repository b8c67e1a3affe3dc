use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionState;

/// Errors surfaced by the session control surface.
///
/// `ResourceMissing` is fatal to `start` only and leaves the session untouched.
/// `AlreadyRunning` and `StreamUnavailable` are explicit no-op results.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("required resource missing: {what} ({})", path.display())]
    ResourceMissing { what: &'static str, path: PathBuf },
    #[error("capture device {index} unavailable: {reason}")]
    DeviceUnavailable { index: u32, reason: String },
    #[error("detection session already running")]
    AlreadyRunning,
    #[error("no stream available while session is {0}")]
    StreamUnavailable(SessionState),
    #[error("detector failed to load: {0:#}")]
    Detector(anyhow::Error),
    #[error("failed to start session worker: {0}")]
    Worker(#[from] std::io::Error),
}

impl SessionError {
    /// Machine-readable tag used by the control surface.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::ResourceMissing { .. } | SessionError::DeviceUnavailable { .. } => {
                "resource_missing"
            }
            SessionError::AlreadyRunning => "already_running",
            SessionError::StreamUnavailable(_) => "stream_unavailable",
            SessionError::Detector(_) => "detector_failed",
            SessionError::Worker(_) => "worker_failed",
        }
    }
}
