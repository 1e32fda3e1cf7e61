//! Serial transport for the BVAT sensor module.
//!
//! The sensor module (accelerometer + GPS on an STM32 board) streams
//! newline-delimited text over a USB serial bridge at a fixed 115200 baud.
//! This is the lowest layer of bvat: everything else reads bytes from the
//! [`SerialLink`] type provided here, or from any other `Read` source in tests.

pub mod error;
pub mod ports;
pub mod serial;

pub use error::{Result, TransportError};
pub use ports::{detect_stlink, list_ports, PortInfo, PortKind};
pub use serial::{SerialConfig, SerialLink, DEFAULT_POLL_INTERVAL, FIXED_BAUD_RATE};
