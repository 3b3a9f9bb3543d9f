//! Serial port transport
//!
//! This module provides the [`Transport`] implementation for real hardware,
//! using the `serialport` crate.
//!
//! # Features
//!
//! - **Port discovery**: List available serial ports, USB ports first
//! - **Auto-selection**: Pick the first USB port when no port name is configured
//! - **Error classification**: Map platform refusals to `PermissionDenied`
//!   and missing devices to `DeviceUnavailable`
//! - **Polling reads**: Reads time out after a short interval so the worker
//!   can interleave command handling with the read loop
//!
//! # Example
//!
//! ```ignore
//! use labdaq::backend::SerialTransport;
//! use labdaq::config::SerialConfig;
//!
//! for info in SerialTransport::list_ports() {
//!     println!("Found: {}", info);
//! }
//!
//! let mut transport = SerialTransport::new(SerialConfig::default());
//! transport.open()?;
//! transport.write_all(b"SET 1000 500 500\n")?;
//! ```

use crate::backend::transport::{Transport, TransportStats};
use crate::config::{DataBits, FlowControl, Parity, SerialConfig, StopBits};
use crate::error::{DaqError, Result};
use serialport::{SerialPort, SerialPortType};
use std::io::{self, Read, Write};

/// Information about a detected serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS port name
    pub name: String,
    /// USB vendor ID, if the port is a USB device
    pub vendor_id: Option<u16>,
    /// USB product ID, if the port is a USB device
    pub product_id: Option<u16>,
    /// Product string reported by the device
    pub product: Option<String>,
}

impl PortInfo {
    pub fn is_usb(&self) -> bool {
        self.vendor_id.is_some()
    }
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => {
                write!(f, "{} ({:04x}:{:04x})", self.name, vid, pid)?;
                if let Some(ref product) = self.product {
                    write!(f, " - {}", product)?;
                }
                Ok(())
            }
            _ => write!(f, "{}", self.name),
        }
    }
}

/// Transport over a serial port
pub struct SerialTransport {
    /// Open port handle
    port: Option<Box<dyn SerialPort>>,
    /// Port settings
    config: SerialConfig,
    /// Name of the port actually opened
    opened_name: Option<String>,
    /// Statistics
    stats: TransportStats,
}

impl SerialTransport {
    /// Create a closed transport with the given settings
    pub fn new(config: SerialConfig) -> Self {
        Self {
            port: None,
            config,
            opened_name: None,
            stats: TransportStats::default(),
        }
    }

    /// List available serial ports, USB devices first
    pub fn list_ports() -> Vec<PortInfo> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("Failed to enumerate serial ports: {}", e);
                return Vec::new();
            }
        };

        let mut infos: Vec<PortInfo> = ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => PortInfo {
                    name: p.port_name,
                    vendor_id: Some(usb.vid),
                    product_id: Some(usb.pid),
                    product: usb.product,
                },
                _ => PortInfo {
                    name: p.port_name,
                    vendor_id: None,
                    product_id: None,
                    product: None,
                },
            })
            .collect();
        infos.sort_by_key(|p| !p.is_usb());
        infos
    }

    fn resolve_port_name(&self) -> Result<String> {
        if let Some(ref name) = self.config.port {
            return Ok(name.clone());
        }
        Self::list_ports()
            .into_iter()
            .next()
            .map(|p| p.name)
            .ok_or_else(|| DaqError::DeviceUnavailable("no serial ports found".to_string()))
    }
}

/// Classify an open failure
fn open_error(port: &str, err: serialport::Error) -> DaqError {
    match err.kind() {
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            DaqError::PermissionDenied(format!("{}: {}", port, err.description))
        }
        _ => DaqError::DeviceUnavailable(format!("{}: {}", port, err.description)),
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let name = self.resolve_port_name()?;
        tracing::info!(
            "Opening serial port {} at {} baud ({:?}/{}/{:?})",
            name,
            self.config.baud_rate,
            self.config.data_bits,
            self.config.parity,
            self.config.stop_bits
        );

        let port = serialport::new(&name, self.config.baud_rate)
            .data_bits(self.config.data_bits.into())
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits.into())
            .flow_control(self.config.flow_control.into())
            .timeout(self.config.read_timeout())
            .open()
            .map_err(|e| open_error(&name, e))?;

        self.port = Some(port);
        self.opened_name = Some(name);
        self.stats.reset();
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!(
                "Closed serial port {}",
                self.opened_name.as_deref().unwrap_or("?")
            );
        }
        self.opened_name = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or(DaqError::NotConnected)?;
        match port.read(buf) {
            Ok(n) => {
                self.stats.record_read(n);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => {
                self.stats.read_errors += 1;
                Err(DaqError::Io(e))
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let Some(port) = self.port.as_mut() else {
            return Err(DaqError::WriteFailed("serial port is not open".to_string()));
        };
        let result = port.write_all(data).and_then(|_| port.flush());
        match result {
            Ok(()) => {
                self.stats.record_write(data.len());
                Ok(())
            }
            Err(e) => {
                self.stats.write_errors += 1;
                Err(DaqError::WriteFailed(e.to_string()))
            }
        }
    }

    fn describe(&self) -> String {
        match (&self.opened_name, &self.config.port) {
            (Some(name), _) => name.clone(),
            (None, Some(name)) => name.clone(),
            (None, None) => "auto".to_string(),
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
