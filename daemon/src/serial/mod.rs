//! Serial line reader for the microcontroller link
//!
//! Opens the configured device and frames its byte stream into
//! newline-terminated text lines.

mod codec;

use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;

pub use codec::LineCodec;

/// Errors from the serial link
#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("serial device {path} unavailable: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("serial read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("serial device closed the stream")]
    Closed,
}

/// Open the device at `path`. Failure here is fatal for the daemon.
pub fn open(path: &str, baud_rate: u32) -> Result<SerialStream, SerialError> {
    let stream = tokio_serial::new(path, baud_rate)
        .open_native_async()
        .map_err(|source| SerialError::DeviceUnavailable {
            path: path.to_string(),
            source,
        })?;

    info!(path, baud_rate, "serial device opened");
    Ok(stream)
}
