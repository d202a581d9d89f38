//! Audio capture and playback capabilities
//!
//! The session treats both as opaque: capture yields a finished byte buffer,
//! playback resolves once the reply has been heard.

mod command;

use async_trait::async_trait;

pub use command::{CommandCapture, CommandPlayback};

/// Errors starting or finishing a capture
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture device refused to start: {0}")]
    Denied(String),

    #[error("capture already running")]
    AlreadyRunning,

    #[error("no capture running")]
    NotRunning,

    #[error("capture failed: {0}")]
    Failed(String),
}

/// Errors playing reply audio
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("failed to start player: {0}")]
    Spawn(std::io::Error),

    #[error("player i/o error: {0}")]
    Io(std::io::Error),

    #[error("player exited with status {0:?}")]
    Exit(Option<i32>),
}

/// Microphone-like source producing one clip per start/stop pair
#[async_trait]
pub trait AudioCapture: Send + 'static {
    /// Begin capturing. Resolves once the device has accepted or refused.
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop capturing and hand back the clip
    async fn stop(&mut self) -> Result<Vec<u8>, CaptureError>;

    /// MIME type of the clips this source produces
    fn mime(&self) -> &str;
}

/// Speaker-like sink
#[async_trait]
pub trait AudioPlayback: Send + Sync + 'static {
    /// Play `audio` to completion
    async fn play(&self, audio: Vec<u8>) -> Result<(), PlaybackError>;
}
