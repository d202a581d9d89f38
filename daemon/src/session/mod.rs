//! Voice session orchestration
//!
//! One session at a time moves through:
//! - Idle: waiting for a trigger from any source
//! - Recording: capturing audio until released or the failsafe fires
//! - Processing: transcription, then the AI reply
//! - Speaking: playing the reply back
//!
//! A single busy flag gates every trigger source; triggers arriving while a
//! cycle is in flight are dropped, never queued.

mod dispatch;
mod error;
mod machine;
mod reflector;
mod runner;
mod state;

pub use dispatch::{InputDispatcher, InputEvent};
pub use error::SessionError;
pub use reflector::{reflect, StatusView};
pub use runner::SessionRunner;
pub use state::{CycleId, SessionState};

#[cfg(test)]
pub use dispatch::SessionInput;
#[cfg(test)]
pub use reflector::Visual;
