//! Configuration loading and management
//!
//! Defaults, then an optional TOML file, then environment overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::TriggerRule;

/// Env var naming an explicit config file
pub const CONFIG_ENV: &str = "VOICE_RELAY_CONFIG";

/// Errors loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub server: ServerConfig,
    /// Serial lines treated as triggers
    pub triggers: Vec<TriggerRule>,
    pub session: SessionConfig,
    pub inference: InferenceConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyACM0` or `COM7`
    pub port: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address for the WebSocket/HTTP listener
    pub listen: SocketAddr,
    /// Frames that may wait per listener before it is dropped
    pub listener_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8765)),
            listener_queue: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run the voice session in this process. When off, the daemon only
    /// bridges triggers and the browser runs the session.
    pub enabled: bool,
    /// Longest recording before a forced stop
    pub failsafe_secs: u64,
    /// Longest reply playback before the session gives up on the player
    pub playback_timeout_secs: u64,
    /// Key whose press/release triggers and stops a recording
    pub trigger_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failsafe_secs: 6,
            playback_timeout_secs: 120,
            trigger_key: "Space".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn failsafe(&self) -> Duration {
        Duration::from_secs(self.failsafe_secs)
    }

    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL serving `/transcribe` and `/ask`
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Recorder command line; must write the clip to stdout
    pub capture_command: Vec<String>,
    /// MIME type of recorded clips
    pub capture_mime: String,
    /// Player command line; reads reply audio from stdin
    pub playback_command: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let argv = |s: &str| s.split_whitespace().map(str::to_string).collect();
        Self {
            capture_command: argv("arecord -q -f S16_LE -r 16000 -c 1 -t wav -"),
            capture_mime: "audio/wav".to_string(),
            playback_command: argv("mpg123 -q -"),
        }
    }
}

impl Config {
    /// Load configuration from file (if any) and environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::file_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.fill_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Explicit path from the environment, else the per-user file if present
    fn file_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let home = std::env::var("HOME").ok()?;
        let path = PathBuf::from(home)
            .join(".config")
            .join("voice-relay")
            .join("relay.toml");
        path.exists().then_some(path)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `VOICE_RELAY_*` overrides via `lookup`
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(port) = lookup("VOICE_RELAY_SERIAL_PORT") {
            self.serial.port = port;
        }
        if let Some(value) = lookup("VOICE_RELAY_BAUD") {
            self.serial.baud_rate = value.parse().map_err(|_| ConfigError::Env {
                var: "VOICE_RELAY_BAUD",
                value,
            })?;
        }
        if let Some(value) = lookup("VOICE_RELAY_LISTEN") {
            self.server.listen = value.parse().map_err(|_| ConfigError::Env {
                var: "VOICE_RELAY_LISTEN",
                value,
            })?;
        }
        if let Some(url) = lookup("VOICE_RELAY_INFERENCE_URL") {
            self.inference.base_url = url;
        }
        Ok(())
    }

    /// The stock firmware prints `button_clicked`
    fn fill_defaults(&mut self) {
        if self.triggers.is_empty() {
            self.triggers.push(TriggerRule::verbatim("button_clicked"));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::Invalid("serial.port is empty".to_string()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be positive".to_string()));
        }
        if self.triggers.iter().any(|t| t.line.trim().is_empty()) {
            return Err(ConfigError::Invalid("trigger lines must not be empty".to_string()));
        }
        if self.triggers.is_empty() {
            return Err(ConfigError::Invalid("no trigger lines configured".to_string()));
        }
        if self.session.enabled {
            if self.session.failsafe_secs == 0 {
                return Err(ConfigError::Invalid(
                    "session.failsafe_secs must be positive".to_string(),
                ));
            }
            if self.session.playback_timeout_secs == 0 {
                return Err(ConfigError::Invalid(
                    "session.playback_timeout_secs must be positive".to_string(),
                ));
            }
            if self.audio.capture_command.is_empty() || self.audio.playback_command.is_empty() {
                return Err(ConfigError::Invalid(
                    "audio capture and playback commands are required".to_string(),
                ));
            }
        }
        Ok(())
    }
}
