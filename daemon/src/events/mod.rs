//! Events module for session transitions
//!
//! Provides the trigger source tag shared by all input paths and the
//! structured transition events the orchestrator broadcasts.

use serde::{Deserialize, Serialize};

use crate::session::{CycleId, SessionError, SessionState};

/// Where a trigger came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Microcontroller button, relayed by the serial bridge
    Hardware,
    /// Pointer down / touch start on the talk button
    Pointer,
    /// Designated key pressed
    Keyboard,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Hardware => write!(f, "hardware"),
            TriggerSource::Pointer => write!(f, "pointer"),
            TriggerSource::Keyboard => write!(f, "keyboard"),
        }
    }
}

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    /// Pointer or key release
    Manual,
    /// The failsafe window elapsed with no stop signal
    Failsafe,
}

/// What caused a transition, plus any payload the UI projection needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionDetail {
    /// A trigger was accepted
    Triggered { source: TriggerSource },
    /// Capture stopped and audio was handed off for processing
    CaptureStopped { cause: StopCause },
    /// Both remote calls succeeded
    Replied {
        transcript: String,
        reply_text: String,
    },
    /// The cycle ended early
    Failed { error: SessionError },
    /// Reply audio finished playing
    PlaybackFinished,
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved from one state to another
    Transition {
        cycle: CycleId,
        from: SessionState,
        to: SessionState,
        detail: TransitionDetail,
        /// Time spent in `from`, in milliseconds
        duration_ms: u64,
    },
}

impl SessionEvent {
    /// State the session is in after this event
    #[cfg(test)]
    pub fn target(&self) -> SessionState {
        match self {
            SessionEvent::Transition { to, .. } => *to,
        }
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Transition {
                cycle,
                from,
                to,
                duration_ms,
                ..
            } => write!(f, "CYCLE {} {} -> {} ({}ms)", cycle, from, to, duration_ms),
        }
    }
}
