//! Capture and playback backed by external recorder/player processes

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AudioCapture, AudioPlayback, CaptureError, PlaybackError};

/// How long a freshly spawned recorder must survive to count as started.
/// Recorders refused by the device (permission, busy) exit well within this.
const STARTUP_PROBE: Duration = Duration::from_millis(150);

struct ActiveRecording {
    child: Child,
    reader: JoinHandle<std::io::Result<Vec<u8>>>,
}

/// Records by running a command that writes the clip to stdout
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
    mime: String,
    active: Option<ActiveRecording>,
}

impl CommandCapture {
    /// `argv[0]` is the program; returns `None` for an empty command line
    pub fn new(argv: &[String], mime: impl Into<String>) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            mime: mime.into(),
            active: None,
        })
    }
}

#[async_trait]
impl AudioCapture for CommandCapture {
    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Denied(format!("{}: {e}", self.program)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Denied("recorder stdout unavailable".to_string()))?;

        // Drain continuously so the recorder never blocks on a full pipe
        let reader = tokio::spawn(async move {
            let mut audio = Vec::new();
            stdout.read_to_end(&mut audio).await?;
            Ok(audio)
        });

        tokio::time::sleep(STARTUP_PROBE).await;
        if let Ok(Some(status)) = child.try_wait() {
            reader.abort();
            return Err(CaptureError::Denied(format!(
                "{} exited during startup ({status})",
                self.program
            )));
        }

        info!(program = %self.program, "audio capture started");
        self.active = Some(ActiveRecording { child, reader });
        Ok(())
    }

    async fn stop(&mut self) -> Result<Vec<u8>, CaptureError> {
        let ActiveRecording { mut child, reader } =
            self.active.take().ok_or(CaptureError::NotRunning)?;

        if let Err(e) = child.start_kill() {
            debug!(error = %e, "recorder already exited");
        }
        if let Err(e) = child.wait().await {
            warn!(error = %e, "failed to reap recorder");
        }

        let audio = reader
            .await
            .map_err(|e| CaptureError::Failed(e.to_string()))?
            .map_err(|e| CaptureError::Failed(e.to_string()))?;

        if audio.is_empty() {
            return Err(CaptureError::Failed("recorder produced no audio".to_string()));
        }

        info!(audio_bytes = audio.len(), "audio capture stopped");
        Ok(audio)
    }

    fn mime(&self) -> &str {
        &self.mime
    }
}

/// Plays by piping audio into a command's stdin
pub struct CommandPlayback {
    program: String,
    args: Vec<String>,
}

impl CommandPlayback {
    /// `argv[0]` is the program; returns `None` for an empty command line
    pub fn new(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl AudioPlayback for CommandPlayback {
    async fn play(&self, audio: Vec<u8>) -> Result<(), PlaybackError> {
        debug!(program = %self.program, audio_bytes = audio.len(), "starting playback");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(PlaybackError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&audio).await {
                // Player quit early; its exit status tells the real story
                debug!(error = %e, "player closed stdin early");
            }
        }

        let status = child.wait().await.map_err(PlaybackError::Io)?;
        if !status.success() {
            return Err(PlaybackError::Exit(status.code()));
        }

        debug!("playback finished");
        Ok(())
    }
}
