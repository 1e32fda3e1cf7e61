use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use chrono::{NaiveDateTime, SubsecRound};
use tracing::debug;

use crate::codec::{FrameConfig, LineCodec, Record};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 1024;

/// Reads complete records from any `Read` stream.
///
/// Handles partial reads internally: callers always get complete lines.
/// Also an `Iterator` that ends at end-of-stream or after the first fatal error.
pub struct RecordReader<T> {
    inner: T,
    buf: BytesMut,
    codec: LineCodec,
    next_seq: u64,
    finished: bool,
}

impl<T: Read> RecordReader<T> {
    /// Create a new record reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new record reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            codec: LineCodec::new(config.max_record_len),
            next_seq: 1,
            finished: false,
        }
    }

    /// Read the next complete record (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at end of stream and
    /// `Err(FrameError::Idle)` when a poll timed out with no complete record.
    /// Buffered bytes survive both `Idle` and `RecordTooLong`.
    pub fn read_record(&mut self) -> Result<Record> {
        loop {
            if let Some(bytes) = self.codec.decode(&mut self.buf)? {
                return Ok(self.stamp(bytes));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(FrameError::Idle)
                }
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                let dropped = self.codec.decode_eof(&mut self.buf);
                if dropped > 0 {
                    debug!(bytes = dropped, "discarding truncated record at end of stream");
                }
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn stamp(&mut self, bytes: Bytes) -> Record {
        let seq = self.next_seq;
        self.next_seq += 1;
        Record::new(seq, now_millis(), bytes)
    }

    /// Number of records produced so far.
    pub fn records_read(&self) -> u64 {
        self.next_seq - 1
    }
}

impl<T: Read> Iterator for RecordReader<T> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.read_record() {
                Ok(record) => return Some(Ok(record)),
                Err(FrameError::Idle) => continue,
                Err(FrameError::ConnectionClosed) => {
                    self.finished = true;
                    return None;
                }
                Err(err) if err.is_recoverable() => return Some(Err(err)),
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

fn now_millis() -> NaiveDateTime {
    chrono::Local::now().naive_local().trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::Timelike;

    use super::*;

    #[test]
    fn read_single_record() {
        let mut reader = RecordReader::new(Cursor::new(b"hello\n".to_vec()));
        let record = reader.read_record().unwrap();

        assert_eq!(record.seq, 1);
        assert_eq!(record.bytes.as_ref(), b"hello");
        assert_eq!(record.received_at.nanosecond() % 1_000_000, 0);
    }

    #[test]
    fn read_multiple_records_in_order() {
        let wire = b"one\r\ntwo\nthree\n".to_vec();
        let mut reader = RecordReader::new(Cursor::new(wire));

        let r1 = reader.read_record().unwrap();
        let r2 = reader.read_record().unwrap();
        let r3 = reader.read_record().unwrap();

        assert_eq!((r1.seq, r1.bytes.as_ref()), (1, b"one".as_ref()));
        assert_eq!((r2.seq, r2.bytes.as_ref()), (2, b"two".as_ref()));
        assert_eq!((r3.seq, r3.bytes.as_ref()), (3, b"three".as_ref()));
        assert_eq!(reader.records_read(), 3);
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: b"=== Data Logging STARTED ===\r\n".to_vec(),
            pos: 0,
        };
        let mut reader = RecordReader::new(byte_reader);

        let record = reader.read_record().unwrap();
        assert_eq!(record.bytes.as_ref(), b"=== Data Logging STARTED ===");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = RecordReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_record_drops_partial() {
        let mut reader = RecordReader::new(Cursor::new(b"done\nDATA, Acc".to_vec()));
        assert_eq!(reader.read_record().unwrap().bytes.as_ref(), b"done");
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_record_is_recoverable() {
        let cfg = FrameConfig { max_record_len: 8 };
        let wire = b"0123456789abcdef\nshort\n".to_vec();
        let mut reader = RecordReader::with_config(Cursor::new(wire), cfg);

        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, FrameError::RecordTooLong { max: 8 }));
        assert!(err.is_recoverable());
        assert_eq!(reader.read_record().unwrap().bytes.as_ref(), b"short");
    }

    #[test]
    fn timed_out_read_is_idle_and_keeps_buffer() {
        let reader = TimeoutBetween {
            chunks: vec![b"DATA, half".to_vec(), b" line\n".to_vec()],
            next: 0,
            timed_out: false,
        };
        let mut framed = RecordReader::new(reader);

        let err = framed.read_record().unwrap_err();
        assert!(matches!(err, FrameError::Idle));
        let record = framed.read_record().unwrap();
        assert_eq!(record.bytes.as_ref(), b"DATA, half line");
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: b"ok\n".to_vec(),
            pos: 0,
        };
        let mut framed = RecordReader::new(reader);
        assert_eq!(framed.read_record().unwrap().bytes.as_ref(), b"ok");
    }

    #[test]
    fn hard_io_error_propagates() {
        let mut framed = RecordReader::new(Unplugged);
        let err = framed.read_record().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
        assert!(!FrameError::Io(ErrorKind::BrokenPipe.into()).is_recoverable());
    }

    #[test]
    fn iterator_yields_records_then_ends() {
        let reader = RecordReader::new(Cursor::new(b"a\nb\nc\n".to_vec()));
        let lines: Vec<_> = reader
            .map(|r| String::from_utf8(r.unwrap().bytes.to_vec()).unwrap())
            .collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn iterator_skips_idle_polls() {
        let reader = TimeoutBetween {
            chunks: vec![b"x".to_vec(), b"y\n".to_vec()],
            next: 0,
            timed_out: false,
        };
        let mut records = RecordReader::new(reader);
        assert_eq!(records.next().unwrap().unwrap().bytes.as_ref(), b"xy");
        assert!(records.next().is_none());
    }

    #[test]
    fn iterator_stops_after_fatal_error() {
        let mut records = RecordReader::new(Unplugged);
        assert!(matches!(records.next(), Some(Err(FrameError::Io(_)))));
        assert!(records.next().is_none());
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    /// Returns each chunk in turn, with a timed-out poll between chunks.
    struct TimeoutBetween {
        chunks: Vec<Vec<u8>>,
        next: usize,
        timed_out: bool,
    }

    impl Read for TimeoutBetween {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.next >= self.chunks.len() {
                return Ok(0);
            }
            if self.next > 0 && !self.timed_out {
                self.timed_out = true;
                return Err(std::io::Error::from(ErrorKind::TimedOut));
            }
            self.timed_out = false;
            let chunk = &self.chunks[self.next];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.next += 1;
            Ok(chunk.len())
        }
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct Unplugged;

    impl Read for Unplugged {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }
    }
}
