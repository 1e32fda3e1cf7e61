use bytes::Bytes;
use chrono::NaiveDateTime;

/// What the firmware banner claimed the button press meant.
///
/// Advisory only: the session state machine decides whether a press opens or
/// closes a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announced {
    Started,
    Stopped,
}

impl Announced {
    pub fn as_str(self) -> &'static str {
        match self {
            Announced::Started => "started",
            Announced::Stopped => "stopped",
        }
    }
}

/// The module's logging button was pressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    pub seq: u64,
    pub received_at: NaiveDateTime,
    pub announced: Announced,
}

/// A GPS fix position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

/// One accelerometer + GPS reading.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    /// Host receive time, millisecond precision.
    pub timestamp: NaiveDateTime,
    /// Acceleration in g.
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    /// GPS fix quality as reported by the receiver (0 = no fix).
    pub gps_fix: u8,
    /// Ground speed in km/h.
    pub speed_kmh: f64,
    /// Position, when the firmware reports one.
    pub position: Option<GeoPosition>,
}

/// Why a record could not be classified as control or sample.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedReason {
    #[error("record is not valid UTF-8")]
    NotUtf8,

    #[error("sample record is not valid UTF-8")]
    BadEncoding,

    #[error("unrecognized record")]
    Unrecognized,

    #[error("sample record ended early")]
    Truncated,

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("field {0} is not a valid number")]
    BadField(&'static str),

    #[error("latitude and longitude must appear together")]
    IncompletePosition,

    #[error("unexpected data after sample")]
    TrailingData,
}

impl MalformedReason {
    /// Stable key for counting malformed records by cause.
    pub fn label(&self) -> &'static str {
        match self {
            MalformedReason::NotUtf8 => "not_utf8",
            MalformedReason::BadEncoding => "bad_encoding",
            MalformedReason::Unrecognized => "unrecognized",
            MalformedReason::Truncated => "truncated",
            MalformedReason::MissingField(_) => "missing_field",
            MalformedReason::BadField(_) => "bad_field",
            MalformedReason::IncompletePosition => "incomplete_position",
            MalformedReason::TrailingData => "trailing_data",
        }
    }

    /// True for records that looked like a sample but failed field extraction.
    pub fn is_extraction_failure(&self) -> bool {
        !matches!(self, MalformedReason::NotUtf8 | MalformedReason::Unrecognized)
    }
}

/// A record that is neither a control event nor a valid sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Malformed {
    pub seq: u64,
    pub reason: MalformedReason,
    /// The offending bytes, for diagnostics.
    pub bytes: Bytes,
}

/// A classified record.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Control(ControlEvent),
    Sample(TelemetrySample),
    Malformed(Malformed),
}
