use thiserror::Error;

/// Why a session could not start, or why it ended on its own.
///
/// Transient read failures, detector failures and malformed detections are
/// absorbed inside the capture loop and never surface here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("failed to load detection model: {0}")]
    ModelLoad(String),

    #[error("failed to open video stream {url}: {reason}")]
    SourceUnavailable { url: String, reason: String },

    #[error("stream opened but cannot read frames from {url}: {reason}")]
    SourceUnreadable { url: String, reason: String },

    #[error("failed to start capture worker: {0}")]
    WorkerSpawn(String),

    #[error("connection lost")]
    StreamLost,
}
