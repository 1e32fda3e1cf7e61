//! Newline record framing over a serial byte stream.
//!
//! The sensor module writes one text line per message. This layer turns the
//! raw byte stream into [`Record`]s:
//! - bytes are buffered across partial reads until a `\n` arrives
//! - the delimiter and any trailing `\r` are stripped, blank lines skipped
//! - every record is stamped with its host receive time and a sequence number
//!
//! Nothing here knows what a record means; see `bvat-message` for that.

pub mod codec;
pub mod error;
pub mod reader;

pub use codec::{FrameConfig, LineCodec, Record, DEFAULT_MAX_RECORD_LEN, DELIMITER};
pub use error::{FrameError, Result};
pub use reader::RecordReader;
