//! Newline framing for serial text

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

/// Longest line kept; anything longer is dropped up to its terminator
pub const MAX_LINE_LEN: usize = 1024;

/// Splits a byte stream into lines.
///
/// Partial lines stay buffered across reads. Bytes are decoded lossily, so
/// boot-time noise from the board never ends the stream.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Bytes already scanned for a terminator
    next_index: usize,
    /// Set while skipping the rest of an over-long line
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_line(raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let newline = buf[self.next_index..].iter().position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    if end > MAX_LINE_LEN {
                        warn!(len = end, "serial line too long, discarding");
                        buf.advance(end + 1);
                        continue;
                    }
                    let line = buf.split_to(end + 1);
                    return Ok(Some(Self::decode_line(&line[..end])));
                }
                (false, None) if buf.len() > MAX_LINE_LEN => {
                    warn!(buffered = buf.len(), "serial line too long, discarding");
                    self.discarding = true;
                    self.next_index = 0;
                    buf.clear();
                    return Ok(None);
                }
                (false, None) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding || buf.is_empty() {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        if line.len() > MAX_LINE_LEN {
            warn!(len = line.len(), "unterminated serial tail too long, discarding");
            return Ok(None);
        }
        Ok(Some(Self::decode_line(&line)))
    }
}
