use std::fmt;
use std::io;

use bvat_session::{CaptureError, SinkError};
use bvat_transport::TransportError;

// Exit code constants aligned with sysexits-style semantics.
pub const SUCCESS: i32 = 0;
pub const TRANSPORT_ERROR: i32 = 3;
pub const NOT_FOUND: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const STORAGE_ERROR: i32 = 74;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

fn code_for_kind(kind: io::ErrorKind, fallback: i32) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => NOT_FOUND,
        _ => fallback,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = code_for_kind(err.kind(), INTERNAL);
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::UnsupportedBaud { .. } => USAGE,
        other => other
            .io_kind()
            .map(|kind| code_for_kind(kind, TRANSPORT_ERROR))
            .unwrap_or(TRANSPORT_ERROR),
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn sink_error(context: &str, err: SinkError) -> CliError {
    let code = match &err {
        SinkError::Header { .. } => DATA_INVALID,
        other => other
            .io_kind()
            .map(|kind| code_for_kind(kind, STORAGE_ERROR))
            .unwrap_or(STORAGE_ERROR),
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn capture_error(context: &str, err: CaptureError) -> CliError {
    match err {
        CaptureError::Transport(err) => transport_error(context, err),
        CaptureError::Sink(err) => sink_error(context, err),
    }
}
