//! Session-bounded capture of BVAT sensor module telemetry.
//!
//! The sensor module streams accelerometer and GPS readings over a serial
//! link. A push-button on the module starts and stops logging sessions;
//! each session becomes one CSV file.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial port access and ST-Link detection
//! - [`frame`]: newline framing of the byte stream into records
//! - [`message`]: classification of records into control, sample, or malformed
//! - [`session`]: the session state machine, CSV sinks, and the capture loop

/// Re-export transport types.
pub mod transport {
    pub use bvat_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use bvat_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use bvat_message::*;
}

/// Re-export session types.
pub mod session {
    pub use bvat_session::*;
}
