use std::borrow::Cow;

use bytes::{Buf, Bytes, BytesMut};
use chrono::NaiveDateTime;

use crate::error::{FrameError, Result};

/// Record delimiter used by the sensor module firmware.
pub const DELIMITER: u8 = b'\n';

/// Default maximum record length: 4 KiB.
///
/// The longest legitimate line the firmware emits is well under 128 bytes;
/// anything near this limit is a baud mismatch or a runaway transmission.
pub const DEFAULT_MAX_RECORD_LEN: usize = 4 * 1024;

/// One delimited line from the byte stream, not yet interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 1-based position of this record in the stream.
    pub seq: u64,
    /// Host wall-clock time when the delimiter was observed, millisecond precision.
    pub received_at: NaiveDateTime,
    /// Line contents without the delimiter or a trailing `\r`.
    pub bytes: Bytes,
}

impl Record {
    /// Create a new record.
    pub fn new(seq: u64, received_at: NaiveDateTime, bytes: impl Into<Bytes>) -> Self {
        Self {
            seq,
            received_at,
            bytes: bytes.into(),
        }
    }

    /// Lossy text view for diagnostics.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Configuration for record framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum record length in bytes, excluding the delimiter. Default: 4 KiB.
    pub max_record_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }
}

/// Stateful newline splitter.
///
/// After an over-long line the codec drops bytes until the next delimiter so
/// the tail of the bad line never surfaces as a record of its own.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_len: usize,
    /// Index into the buffer already scanned for a delimiter.
    next_index: usize,
    discarding: bool,
}

impl LineCodec {
    /// Create a codec that rejects lines longer than `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            next_index: 0,
            discarding: false,
        }
    }

    /// Decode the next non-blank line from `src`.
    ///
    /// Returns `Ok(None)` if the buffer doesn't contain a complete line yet.
    /// On success, consumes the line and its delimiter from the buffer.
    /// `Err(RecordTooLong)` is recoverable: decoding may continue.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            let found = src[self.next_index..]
                .iter()
                .position(|b| *b == DELIMITER)
                .map(|offset| self.next_index + offset);

            match (self.discarding, found) {
                (true, Some(pos)) => {
                    src.advance(pos + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(pos)) => {
                    self.next_index = 0;
                    let mut line = src.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    if line.len() > self.max_len {
                        return Err(FrameError::RecordTooLong { max: self.max_len });
                    }
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Ok(Some(line.freeze()));
                }
                (false, None) => {
                    // A trailing '\r' may be the first half of "\r\n".
                    let pending = match src.last() {
                        Some(b'\r') => src.len() - 1,
                        _ => src.len(),
                    };
                    if pending > self.max_len {
                        src.clear();
                        self.next_index = 0;
                        self.discarding = true;
                        return Err(FrameError::RecordTooLong { max: self.max_len });
                    }
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    /// Drop an incomplete trailing line at end of stream.
    ///
    /// Returns the number of bytes discarded.
    pub fn decode_eof(&mut self, src: &mut BytesMut) -> usize {
        let dropped = if self.discarding { 0 } else { src.len() };
        src.clear();
        self.next_index = 0;
        self.discarding = false;
        dropped
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_LEN)
    }
}
