//! Session state and cycle identity

use serde::{Deserialize, Serialize};

/// The four states of a voice session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for a trigger
    #[default]
    Idle,
    /// Capturing audio
    Recording,
    /// Waiting on transcription and the AI reply
    Processing,
    /// Playing the synthesized reply
    Speaking,
}

impl SessionState {
    /// Whether a cycle is in flight
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Recording => write!(f, "Recording"),
            SessionState::Processing => write!(f, "Processing"),
            SessionState::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Identifies one accepted trigger's cycle.
///
/// Every asynchronous completion is tagged with the cycle that started it,
/// so a result arriving after its cycle has ended is recognised and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(u64);

impl CycleId {
    #[cfg(test)]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    #[cfg(test)]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
