use serialport::SerialPortType;
use tracing::debug;

use crate::error::{Result, TransportError};

/// Kind of serial device behind a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

impl PortKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PortKind::Usb => "usb",
            PortKind::Pci => "pci",
            PortKind::Bluetooth => "bluetooth",
            PortKind::Unknown => "unknown",
        }
    }
}

/// An available serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub kind: PortKind,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl PortInfo {
    /// Human-readable description (product, then manufacturer).
    pub fn description(&self) -> &str {
        self.product
            .as_deref()
            .or(self.manufacturer.as_deref())
            .unwrap_or("N/A")
    }

    /// True if the USB metadata identifies an ST-Link debug probe.
    ///
    /// The sensor module's Nucleo board exposes its UART through the
    /// ST-Link virtual COM port.
    pub fn is_stlink(&self) -> bool {
        let mentions = |field: &Option<String>| {
            field
                .as_deref()
                .map(|text| {
                    let lower = text.to_ascii_lowercase();
                    lower.contains("stlink") || lower.contains("st-link")
                })
                .unwrap_or(false)
        };
        mentions(&self.product) || mentions(&self.manufacturer)
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                kind: PortKind::Usb,
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            SerialPortType::PciPort => Self::bare(info.port_name, PortKind::Pci),
            SerialPortType::BluetoothPort => Self::bare(info.port_name, PortKind::Bluetooth),
            SerialPortType::Unknown => Self::bare(info.port_name, PortKind::Unknown),
        }
    }
}

impl PortInfo {
    fn bare(name: String, kind: PortKind) -> Self {
        Self {
            name,
            kind,
            manufacturer: None,
            product: None,
        }
    }
}

/// Enumerate the serial ports visible to this host.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(TransportError::Enumerate)?;
    debug!(count = ports.len(), "enumerated serial ports");
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// Pick the first port that looks like the sensor module's ST-Link bridge.
pub fn detect_stlink(ports: &[PortInfo]) -> Option<&PortInfo> {
    ports.iter().find(|port| port.is_stlink())
}
