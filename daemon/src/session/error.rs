//! Recoverable session failures
//!
//! None of these escape the orchestrator; each becomes a transition back to
//! `Idle` plus a status message.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionError {
    /// The capture device refused to start (permission, missing device)
    #[error("audio capture denied: {0}")]
    CaptureDenied(String),

    /// Capture started but could not be finalized
    #[error("audio capture failed: {0}")]
    CaptureFailed(String),

    /// Transcription returned no text
    #[error("no speech detected")]
    TranscriptionEmpty,

    /// A remote service errored or was unreachable
    #[error("remote call failed: {0}")]
    RemoteCallFailure(String),
}
