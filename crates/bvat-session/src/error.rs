use std::path::PathBuf;

/// Errors that can occur while persisting a session.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The logging directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The session file could not be created.
    #[error("failed to create session file {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Every candidate file name for this start time is taken.
    #[error("no free session file name for {stem} in {dir}")]
    NameExhausted { dir: PathBuf, stem: String },

    /// A row could not be written.
    #[error("failed to write session file {path}: {source}")]
    Write { path: PathBuf, source: csv::Error },

    /// Buffered rows could not be flushed or synced.
    #[error("failed to flush session file {path}: {source}")]
    Flush {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A session file could not be read back.
    #[error("failed to read session file {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },

    /// A session file does not start with the expected header.
    #[error("session file {path} has an unexpected header")]
    Header { path: PathBuf },
}

impl SinkError {
    /// Underlying `io::ErrorKind`, if any.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            SinkError::CreateDir { source, .. }
            | SinkError::Create { source, .. }
            | SinkError::Flush { source, .. } => Some(source.kind()),
            SinkError::Write { source, .. } | SinkError::Read { source, .. } => match source.kind()
            {
                csv::ErrorKind::Io(err) => Some(err.kind()),
                _ => None,
            },
            SinkError::NameExhausted { .. } | SinkError::Header { .. } => None,
        }
    }
}

/// Errors that end a capture.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The serial stream failed (device unplugged, permission lost).
    #[error("transport error: {0}")]
    Transport(#[from] bvat_transport::TransportError),

    /// The current session could not be persisted.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
