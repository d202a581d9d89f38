//! Core session state machine
//!
//! Governs one Idle → Recording → Processing → Speaking → Idle cycle. The
//! machine is synchronous: it decides transitions and hands back the
//! [`Command`] the runner must execute. Completions of those commands come
//! back in through the `on_*` methods tagged with their [`CycleId`].

use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::{SessionEvent, StopCause, TransitionDetail, TriggerSource};
use crate::inference::InferenceResult;

use super::error::SessionError;
use super::state::{CycleId, SessionState};

/// Work the runner performs on behalf of the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start audio capture and arm the failsafe timer
    BeginCapture { cycle: CycleId },
    /// Stop capture, then transcribe and ask for a reply
    FinishCapture { cycle: CycleId },
    /// Play the reply audio
    Play { cycle: CycleId, audio: Vec<u8> },
}

/// The orchestrator owning the single session state and busy flag
pub struct Orchestrator {
    /// Current state
    state: SessionState,
    /// Set on trigger acceptance, cleared only on return to Idle
    busy: bool,
    /// Cycle of the most recently accepted trigger
    cycle: CycleId,
    /// Time when current state was entered
    state_entered_at: Instant,
    /// Channel for emitting transition events
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Orchestrator {
    /// Create a new orchestrator in `Idle`
    pub fn new(event_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            state: SessionState::Idle,
            busy: false,
            cycle: CycleId::default(),
            state_entered_at: Instant::now(),
            event_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn cycle(&self) -> CycleId {
        self.cycle
    }

    /// A trigger from any source. Dropped outright while busy.
    pub fn on_trigger(&mut self, source: TriggerSource) -> Option<Command> {
        if self.busy {
            debug!(%source, state = %self.state, "trigger ignored, session busy");
            return None;
        }

        self.busy = true;
        self.cycle = self.cycle.next();
        info!(cycle = %self.cycle, %source, "trigger accepted");

        self.transition_to(SessionState::Recording, TransitionDetail::Triggered { source });
        Some(Command::BeginCapture { cycle: self.cycle })
    }

    /// Pointer or key release. No-op unless recording.
    pub fn on_stop_requested(&mut self) -> Option<Command> {
        self.stop_capture(StopCause::Manual)
    }

    /// The failsafe window for `cycle` elapsed
    pub fn on_failsafe_elapsed(&mut self, cycle: CycleId) -> Option<Command> {
        if cycle != self.cycle || self.state != SessionState::Recording {
            debug!(%cycle, state = %self.state, "failsafe elapsed after recording ended");
            return None;
        }

        warn!(%cycle, "no stop signal before failsafe deadline, forcing stop");
        self.stop_capture(StopCause::Failsafe)
    }

    /// Capture start for `cycle` resolved
    pub fn on_capture_started(
        &mut self,
        cycle: CycleId,
        result: Result<(), SessionError>,
    ) -> Option<Command> {
        if !self.is_current(cycle) {
            debug!(%cycle, "stale capture start ignored");
            return None;
        }

        match result {
            Ok(()) => debug!(%cycle, "audio capture running"),
            Err(error) => self.fail(error),
        }
        None
    }

    /// Transcription and reply for `cycle` resolved
    pub fn on_inference_finished(
        &mut self,
        cycle: CycleId,
        result: Result<InferenceResult, SessionError>,
    ) -> Option<Command> {
        if !self.is_current(cycle) || self.state != SessionState::Processing {
            debug!(%cycle, state = %self.state, "stale inference result ignored");
            return None;
        }

        match result {
            Ok(result) => {
                let InferenceResult {
                    transcript,
                    reply_text,
                    reply_audio,
                } = result;
                self.transition_to(
                    SessionState::Speaking,
                    TransitionDetail::Replied {
                        transcript,
                        reply_text,
                    },
                );
                Some(Command::Play {
                    cycle,
                    audio: reply_audio,
                })
            }
            Err(error) => {
                self.fail(error);
                None
            }
        }
    }

    /// Reply playback for `cycle` ended
    pub fn on_playback_finished(&mut self, cycle: CycleId) -> Option<Command> {
        if !self.is_current(cycle) || self.state != SessionState::Speaking {
            debug!(%cycle, state = %self.state, "stale playback completion ignored");
            return None;
        }

        self.transition_to(SessionState::Idle, TransitionDetail::PlaybackFinished);
        None
    }

    fn is_current(&self, cycle: CycleId) -> bool {
        cycle == self.cycle && self.state.is_active()
    }

    fn stop_capture(&mut self, cause: StopCause) -> Option<Command> {
        if self.state != SessionState::Recording {
            debug!(state = %self.state, "stop requested while not recording");
            return None;
        }

        self.transition_to(SessionState::Processing, TransitionDetail::CaptureStopped { cause });
        Some(Command::FinishCapture { cycle: self.cycle })
    }

    fn fail(&mut self, error: SessionError) {
        warn!(cycle = %self.cycle, state = %self.state, %error, "session cycle failed");
        self.transition_to(SessionState::Idle, TransitionDetail::Failed { error });
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: SessionState, detail: TransitionDetail) {
        let old_state = self.state;
        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;

        info!(
            cycle = %self.cycle,
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "state transition"
        );

        self.state = new_state;
        self.state_entered_at = Instant::now();
        if new_state == SessionState::Idle {
            self.busy = false;
        }

        let event = SessionEvent::Transition {
            cycle: self.cycle,
            from: old_state,
            to: new_state,
            detail,
            duration_ms,
        };
        debug!(%event, "emitting transition event");
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
