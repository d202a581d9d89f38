//! Wire types for the status route and the session socket
//!
//! The trigger socket carries bare text frames (the trigger string) and has
//! no protocol beyond that.

use serde::{Deserialize, Serialize};

use crate::session::{SessionState, StatusView};

/// Frames sent to session clients, JSON-encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionFrame {
    /// Current status projection
    Status(StatusView),

    /// An inbound frame could not be handled
    Error { code: String, message: String },
}

impl SessionFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether the voice session runs in this process
    pub session_enabled: bool,

    pub state: SessionState,

    /// True while a cycle is in flight
    pub busy: bool,

    /// Attached trigger listeners
    pub listeners: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub status: StatusView,
}
