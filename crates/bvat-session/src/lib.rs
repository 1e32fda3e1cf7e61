//! Toggle-driven logging sessions.
//!
//! This is the core of bvat. A [`Capture`] pulls records off the stream,
//! classifies them, and feeds a [`SessionManager`]: each button press either
//! opens a new session file or closes the current one. Samples that arrive
//! while no session is open are dropped.
//!
//! Each session owns one [`SessionSink`], an append-only CSV writer that
//! flushes every row, so a crash loses at most the row being written.

pub mod capture;
pub mod error;
pub mod manager;
pub mod sink;

pub use capture::{Capture, CaptureEnd, CaptureReport};
pub use error::{CaptureError, Result, SinkError};
pub use manager::{ManagerStats, SessionManager, SessionState, SessionSummary, Transition};
pub use sink::{
    read_session, read_session_file, DirectoryOpener, SessionSink, SinkConfig, SinkOpener,
    SinkTarget, CSV_HEADER, TIMESTAMP_FORMAT,
};
