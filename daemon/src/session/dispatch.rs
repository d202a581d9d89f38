//! Single entry point for all three trigger sources
//!
//! Hardware frames, pointer events and key events are normalized into
//! [`SessionInput`] here, so the orchestrator never sees raw UI events.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::events::TriggerSource;

/// Raw UI input as sent by session clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    PointerDown,
    PointerUp,
    TouchStart,
    TouchEnd,
    KeyDown {
        key: String,
        /// Auto-repeat while the key is held
        #[serde(default)]
        repeat: bool,
    },
    KeyUp {
        key: String,
    },
}

/// Normalized input consumed by the session runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    Trigger(TriggerSource),
    StopRequested,
}

#[derive(Clone)]
pub struct InputDispatcher {
    trigger_key: String,
    tx: mpsc::Sender<SessionInput>,
}

impl InputDispatcher {
    pub fn new(trigger_key: impl Into<String>, tx: mpsc::Sender<SessionInput>) -> Self {
        Self {
            trigger_key: key_name(&trigger_key.into()).to_string(),
            tx,
        }
    }

    /// Map a UI event onto the session's two inputs
    pub fn normalize(&self, event: &InputEvent) -> Option<SessionInput> {
        match event {
            InputEvent::PointerDown | InputEvent::TouchStart => {
                Some(SessionInput::Trigger(TriggerSource::Pointer))
            }
            InputEvent::PointerUp | InputEvent::TouchEnd => Some(SessionInput::StopRequested),
            InputEvent::KeyDown { key, repeat } => {
                (!repeat && self.is_trigger_key(key))
                    .then_some(SessionInput::Trigger(TriggerSource::Keyboard))
            }
            InputEvent::KeyUp { key } => {
                self.is_trigger_key(key).then_some(SessionInput::StopRequested)
            }
        }
    }

    /// Forward a UI event. Returns whether anything was delivered.
    pub fn dispatch(&self, event: &InputEvent) -> bool {
        match self.normalize(event) {
            Some(input) => self.send(input),
            None => {
                debug!(?event, "input ignored");
                false
            }
        }
    }

    /// A trigger frame relayed by the hardware bridge
    pub fn hardware_frame(&self, frame: &str) -> bool {
        debug!(frame, "hardware trigger received");
        self.send(SessionInput::Trigger(TriggerSource::Hardware))
    }

    /// Feed frames from a trigger-listener queue in as hardware triggers.
    /// Returns once the registry drops the listener.
    pub async fn relay_hardware(self, mut frames: mpsc::Receiver<String>) {
        while let Some(frame) = frames.recv().await {
            self.hardware_frame(&frame);
        }
        warn!("session dropped from trigger listeners");
    }

    fn is_trigger_key(&self, key: &str) -> bool {
        key_name(key).eq_ignore_ascii_case(&self.trigger_key)
    }

    fn send(&self, input: SessionInput) -> bool {
        match self.tx.try_send(input) {
            Ok(()) => true,
            Err(TrySendError::Full(input)) => {
                warn!(?input, "session input queue full, dropping");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("session runner stopped");
                false
            }
        }
    }
}

/// Browsers report the space bar as `" "`
fn key_name(key: &str) -> &str {
    if key == " " {
        "Space"
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> (InputDispatcher, mpsc::Receiver<SessionInput>) {
        let (tx, rx) = mpsc::channel(8);
        (InputDispatcher::new("Space", tx), rx)
    }

    #[test]
    fn test_pointer_and_touch() {
        let (d, _) = dispatcher();
        let trigger = Some(SessionInput::Trigger(TriggerSource::Pointer));
        assert_eq!(d.normalize(&InputEvent::PointerDown), trigger);
        assert_eq!(d.normalize(&InputEvent::TouchStart), trigger);
        assert_eq!(
            d.normalize(&InputEvent::PointerUp),
            Some(SessionInput::StopRequested)
        );
        assert_eq!(
            d.normalize(&InputEvent::TouchEnd),
            Some(SessionInput::StopRequested)
        );
    }

    #[test]
    fn test_only_designated_key_counts() {
        let (d, _) = dispatcher();
        let down = |key: &str, repeat| InputEvent::KeyDown {
            key: key.to_string(),
            repeat,
        };

        assert_eq!(
            d.normalize(&down(" ", false)),
            Some(SessionInput::Trigger(TriggerSource::Keyboard))
        );
        assert_eq!(
            d.normalize(&down("space", false)),
            Some(SessionInput::Trigger(TriggerSource::Keyboard))
        );
        assert_eq!(d.normalize(&down(" ", true)), None);
        assert_eq!(d.normalize(&down("Enter", false)), None);
        assert_eq!(
            d.normalize(&InputEvent::KeyUp { key: " ".into() }),
            Some(SessionInput::StopRequested)
        );
        assert_eq!(d.normalize(&InputEvent::KeyUp { key: "a".into() }), None);
    }

    #[test]
    fn test_dispatch_and_hardware_frames_share_one_queue() {
        let (d, mut rx) = dispatcher();
        assert!(d.hardware_frame("button_clicked"));
        assert!(d.dispatch(&InputEvent::PointerUp));
        assert!(!d.dispatch(&InputEvent::KeyUp { key: "x".into() }));

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionInput::Trigger(TriggerSource::Hardware)
        );
        assert_eq!(rx.try_recv().unwrap(), SessionInput::StopRequested);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_registry_publish_reaches_session_as_hardware_trigger() {
        use crate::bridge::ListenerRegistry;

        let registry = ListenerRegistry::default();
        let (d, mut rx) = dispatcher();
        let (id, frames) = registry.attach();
        let relay = tokio::spawn(d.relay_hardware(frames));

        assert_eq!(registry.publish("button_clicked").delivered, 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionInput::Trigger(TriggerSource::Hardware)
        );

        // Detaching closes the queue and ends the relay
        assert!(registry.detach(id));
        relay.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_input_event_wire_format() {
        let event: InputEvent = serde_json::from_str(r#"{"type":"key_down","key":" "}"#).unwrap();
        assert_eq!(
            event,
            InputEvent::KeyDown {
                key: " ".to_string(),
                repeat: false
            }
        );
        let event: InputEvent = serde_json::from_str(r#"{"type":"pointer_down"}"#).unwrap();
        assert_eq!(event, InputEvent::PointerDown);
    }

    #[test]
    fn test_closed_runner_drops_input() {
        let (d, rx) = dispatcher();
        drop(rx);
        assert!(!d.dispatch(&InputEvent::PointerDown));
    }
}
