/// Errors that can occur while splitting the byte stream into records.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A line exceeded the configured maximum and was discarded.
    #[error("record too long (more than {max} bytes without a delimiter)")]
    RecordTooLong { max: usize },

    /// The transport had no bytes within its poll interval.
    #[error("no data within poll interval")]
    Idle,

    /// An I/O error occurred while reading the stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached end-of-file.
    #[error("stream closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True if the reader can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::RecordTooLong { .. } | FrameError::Idle)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
