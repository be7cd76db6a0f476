//! Byte transport boundary
//!
//! The session engine talks to the instrument through [`Transport`], a raw byte
//! channel with serial-line extras (baud rate, break condition), and obtains one
//! through a [`Connector`]. The serial implementation lives in [`serial`].

use std::io::{self, Read, Write};
use std::time::Duration;

pub mod serial;

pub use serial::{list_ports, PortInfo, SerialConnector, SerialTransport};

/// Parameters used when opening a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenParams {
    /// Line speed
    pub baud_rate: u32,
    /// Name of the application claiming the port
    pub app_name: String,
    /// How long to wait for the device node to open
    pub open_timeout: Duration,
    /// Granularity of blocking reads
    pub receive_timeout: Duration,
}

/// Raw byte channel to the instrument.
///
/// Reads return `Ok(0)` (or a `TimedOut`/`WouldBlock` error) when nothing arrives
/// within the receive timeout, so a reader loop can poll for cancellation.
pub trait Transport: Read + Write + Send {
    /// Change the line speed in place, keeping data bits, parity and stop bits
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()>;

    /// Current line speed
    fn baud_rate(&self) -> io::Result<u32>;

    /// Hold the line in the break condition for `duration`
    fn send_break(&mut self, duration: Duration) -> io::Result<()>;

    /// Set the read timeout granularity
    fn set_receive_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Clone the handle so reads and writes can happen on different threads
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

/// Opens transports for device paths
pub trait Connector: Send {
    /// Open `path` configured for 8 data bits, 1 stop bit, no parity
    fn open(&self, path: &str, params: &OpenParams) -> io::Result<Box<dyn Transport>>;
}

/// Whether an I/O error only means "no data within the receive timeout"
pub fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
