//! Serial port handling
//!
//! Provides the `serialport`-backed [`Transport`] and port enumeration.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{Connector, OpenParams, Transport};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key placing ttyACM* first, then ttyUSB*, then built-in ttyS*, then the rest,
/// numerically within each family
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0, "ttyACM"), (1, "ttyUSB"), (2, "ttyS")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Multiport cards and on-board UARTs are not always reported by the API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if ["ttyACM", "ttyUSB", "ttyS"]
                    .iter()
                    .any(|prefix| fname.starts_with(prefix))
                {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Serial port wrapper implementing [`Transport`]
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.port.set_baud_rate(baud_rate).map_err(io::Error::from)
    }

    fn baud_rate(&self) -> io::Result<u32> {
        self.port.baud_rate().map_err(io::Error::from)
    }

    fn send_break(&mut self, duration: Duration) -> io::Result<()> {
        self.port.set_break().map_err(io::Error::from)?;
        std::thread::sleep(duration);
        self.port.clear_break().map_err(io::Error::from)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::from)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port_clone = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialTransport::new(port_clone)))
    }
}

/// Opens device nodes through the `serialport` crate.
///
/// The node is opened non-blocking by the driver, so `open_timeout` is not
/// needed to bound the open call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, path: &str, params: &OpenParams) -> io::Result<Box<dyn Transport>> {
        tracing::debug!(
            device = path,
            baud = params.baud_rate,
            app = %params.app_name,
            "opening serial port"
        );

        let mut port = serialport::new(path, params.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(params.receive_timeout)
            .open()
            .map_err(io::Error::from)?;

        // Some USB adapters need DTR/RTS asserted before the far end talks
        if let Err(e) = port.write_data_terminal_ready(true) {
            tracing::warn!(device = path, "failed to set DTR high: {} (continuing)", e);
        }
        if let Err(e) = port.write_request_to_send(true) {
            tracing::warn!(device = path, "failed to set RTS high: {} (continuing)", e);
        }

        Ok(Box::new(SerialTransport::new(port)))
    }
}
