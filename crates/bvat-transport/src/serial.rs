use std::io::Read;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Baud rate dictated by the sensor module firmware. Not configurable.
pub const FIXED_BAUD_RATE: u32 = 115_200;

/// How long a single read waits before reporting "no bytes yet".
///
/// This bounds how quickly a capture notices cancellation; it is not a
/// transport timeout.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Serial connection parameters.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device identifier, e.g. `/dev/ttyACM0` or `COM3`.
    pub port: String,
    /// Requested baud rate. Anything other than [`FIXED_BAUD_RATE`] is rejected.
    pub baud: u32,
    /// Read poll interval.
    pub poll_interval: Duration,
}

impl SerialConfig {
    /// Config for `port` at the fixed baud rate.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud: FIXED_BAUD_RATE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Reject any baud rate the sensor module cannot speak.
    pub fn validate(&self) -> Result<()> {
        if self.baud != FIXED_BAUD_RATE {
            return Err(TransportError::UnsupportedBaud {
                requested: self.baud,
                required: FIXED_BAUD_RATE,
            });
        }
        Ok(())
    }
}

/// An open serial connection to the sensor module.
///
/// Reads are passive: bvat never writes to the device.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialLink {
    /// Open the serial device as 8N1 without flow control.
    ///
    /// The baud rate is validated before the device is touched.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        config.validate()?;

        let port = serialport::new(&config.port, config.baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.poll_interval)
            .open()
            .map_err(|source| TransportError::Open {
                port: config.port.clone(),
                source,
            })?;

        // Drop whatever the bridge buffered before we attached.
        if let Err(err) = port.clear(serialport::ClearBuffer::Input) {
            debug!(port = %config.port, error = %err, "could not clear input buffer");
        }

        info!(port = %config.port, baud = config.baud, "serial port opened");

        Ok(Self {
            port,
            name: config.port.clone(),
        })
    }

    /// The device identifier this link was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The baud rate reported by the driver.
    pub fn baud_rate(&self) -> Result<u32> {
        self.port.baud_rate().map_err(|err| TransportError::Io(err.into()))
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink").field("port", &self.name).finish()
    }
}
