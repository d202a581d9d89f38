//! Session UI reflector: a pure projection of transitions onto status text

use serde::{Deserialize, Serialize};

use crate::events::{SessionEvent, StopCause, TransitionDetail};

use super::error::SessionError;
use super::state::SessionState;

/// Visual class the UI applies to the talk button / orb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visual {
    Idle,
    Recording,
    Processing,
    Speaking,
    Error,
}

/// What the UI shows for the current state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub state: SessionState,
    pub text: String,
    pub visual: Visual,
    /// Transcript and answer, for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl StatusView {
    /// Status before the first trigger and after a clean cycle
    pub fn ready() -> Self {
        Self::plain(SessionState::Idle, "Ready. Press the button to talk.", Visual::Idle)
    }

    fn plain(state: SessionState, text: &str, visual: Visual) -> Self {
        Self {
            state,
            text: text.to_string(),
            visual,
            debug: None,
        }
    }
}

impl Default for StatusView {
    fn default() -> Self {
        Self::ready()
    }
}

/// Project a transition onto the UI
pub fn reflect(event: &SessionEvent) -> StatusView {
    let SessionEvent::Transition { to, detail, .. } = event;

    match (to, detail) {
        (SessionState::Recording, _) => {
            StatusView::plain(*to, "Listening... Speak now.", Visual::Recording)
        }
        (SessionState::Processing, TransitionDetail::CaptureStopped { cause: StopCause::Failsafe }) => {
            StatusView::plain(*to, "Time's up. Processing...", Visual::Processing)
        }
        (SessionState::Processing, _) => StatusView::plain(*to, "Processing...", Visual::Processing),
        (
            SessionState::Speaking,
            TransitionDetail::Replied {
                transcript,
                reply_text,
            },
        ) => StatusView {
            state: *to,
            text: reply_text.clone(),
            visual: Visual::Speaking,
            debug: Some(format!("You said: {transcript}\nAI says: {reply_text}")),
        },
        (SessionState::Speaking, _) => StatusView::plain(*to, "Speaking...", Visual::Speaking),
        (SessionState::Idle, TransitionDetail::Failed { error }) => StatusView {
            state: *to,
            text: failure_text(error),
            visual: Visual::Error,
            debug: Some(error.to_string()),
        },
        (SessionState::Idle, _) => StatusView::ready(),
    }
}

fn failure_text(error: &SessionError) -> String {
    match error {
        SessionError::CaptureDenied(_) => {
            "Microphone unavailable. Check permissions and try again.".to_string()
        }
        SessionError::CaptureFailed(_) => "Recording failed. Please try again.".to_string(),
        SessionError::TranscriptionEmpty => "No speech detected.".to_string(),
        SessionError::RemoteCallFailure(_) => {
            "Something went wrong while processing. Please try again.".to_string()
        }
    }
}
