//! Classification of sensor module records.
//!
//! Every [`Record`](bvat_frame::Record) is exactly one of:
//! - a [`ControlEvent`]: the module's push-button was pressed
//! - a [`TelemetrySample`]: one accelerometer + GPS reading
//! - [`Malformed`]: noise, status chatter, or a sample whose fields failed to parse
//!
//! Parsing is pure: the same record always classifies the same way.

pub mod message;
pub mod parser;

pub use message::{
    Announced, ControlEvent, GeoPosition, Malformed, MalformedReason, Message, TelemetrySample,
};
pub use parser::{
    encode_control_line, encode_sample_line, parse_record, CONTROL_STARTED, CONTROL_STOPPED,
    SAMPLE_PREFIX,
};
