//! Device session
//!
//! Owns the device lock, the transport, the receive buffer and the background
//! reader for one serial device, and bridges the asynchronously filled buffer to
//! callers that want request/response semantics through [`DeviceSession::wait_for`].
//!
//! One command sequence at a time: concurrent `send_line`/`wait_for` pairs from
//! two callers would interleave and are not supported.

mod buffer;
mod error;
mod reader;
mod tee;

pub use buffer::SessionBuffer;
pub use error::{SessionError, WaitError};
pub use reader::SessionEvent;
pub use tee::TeeSink;

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::lock::DeviceLock;
use crate::transport::{Connector, SerialConnector, Transport};
use reader::ReadLoop;

/// Line terminator expected by the instrument
pub const LINE_TERMINATOR: &str = "\r";

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport, no lock
    Closed,
    /// Acquiring the lock and opening the transport
    Opening,
    /// Transport open, nobody reading
    Open,
    /// Transport open with the background reader running
    Listening,
}

/// A connection to one serial device
pub struct DeviceSession {
    config: SessionConfig,
    device: String,
    baud_rate: u32,
    lock: DeviceLock,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    buffer: Arc<SessionBuffer>,
    reader: Option<ReadLoop>,
    state: SessionState,
    events_tx: Sender<SessionEvent>,
    events_rx: Option<Receiver<SessionEvent>>,
}

impl DeviceSession {
    /// Create a closed session that opens transports through `connector`
    pub fn new(config: SessionConfig, connector: Box<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            device: config.device.clone(),
            baud_rate: config.baud_rate,
            lock: DeviceLock::new(config.lock_dir.clone()),
            buffer: Arc::new(SessionBuffer::new(config.buffer_capacity)),
            config,
            connector,
            transport: None,
            reader: None,
            state: SessionState::Closed,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Create a closed session on a real serial port
    pub fn serial(config: SessionConfig) -> Self {
        Self::new(config, Box::new(SerialConnector))
    }

    /// Current device path
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Current baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        match self.state {
            SessionState::Listening if !self.reader_active() => SessionState::Open,
            state => state,
        }
    }

    /// Whether the transport is open
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Whether the background reader is running
    pub fn is_listening(&self) -> bool {
        self.is_open() && self.reader_active()
    }

    fn reader_active(&self) -> bool {
        self.reader.as_ref().is_some_and(ReadLoop::is_active)
    }

    /// Shared receive buffer
    pub fn buffer(&self) -> &Arc<SessionBuffer> {
        &self.buffer
    }

    /// Take the receiver for reader notifications (only the first call gets it)
    pub fn take_events(&mut self) -> Option<Receiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Lock the device and open the transport. No-op when already open.
    pub fn open(&mut self) -> Result<(), SessionError> {
        if self.transport.is_some() {
            return Ok(());
        }

        self.state = SessionState::Opening;
        if let Err(e) = self.lock.acquire(&self.device) {
            self.state = SessionState::Closed;
            return Err(e.into());
        }

        let params = self.config.open_params(self.baud_rate);
        match self.connector.open(&self.device, &params) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = SessionState::Open;
                tracing::info!(device = %self.device, baud = self.baud_rate, "serial port opened");
                Ok(())
            }
            Err(source) => {
                self.release_lock();
                self.state = SessionState::Closed;
                Err(SessionError::OpenFailed {
                    device: self.device.clone(),
                    source,
                })
            }
        }
    }

    /// Stop listening, close the transport and release the lock.
    ///
    /// Safe to call repeatedly or on a session that never opened.
    pub fn close(&mut self) {
        self.stop_listening();
        if self.transport.take().is_some() {
            self.release_lock();
            tracing::info!(device = %self.device, "serial port closed");
        }
        self.state = SessionState::Closed;
    }

    fn release_lock(&self) {
        if let Err(e) = self.lock.release(&self.device) {
            tracing::warn!(device = %self.device, "unable to remove lock file: {}", e);
        }
    }

    /// Switch to another device. A failed re-open leaves the session closed.
    pub fn change_device(&mut self, device: &str) -> Result<(), SessionError> {
        if device == self.device {
            return Ok(());
        }
        self.close();
        tracing::info!(from = %self.device, to = device, "changing device");
        self.device = device.to_string();
        self.open()
    }

    /// Change the baud rate, reconfiguring an open transport in place when it
    /// runs at a different rate
    pub fn set_baud(&mut self, baud_rate: u32) -> Result<(), SessionError> {
        self.baud_rate = baud_rate;
        if let Some(transport) = self.transport.as_mut() {
            if transport.baud_rate().ok() == Some(baud_rate) {
                tracing::debug!(device = %self.device, baud = baud_rate, "baud rate unchanged");
                return Ok(());
            }
            transport
                .set_baud_rate(baud_rate)
                .map_err(|source| SessionError::ReconfigureFailed {
                    baud: baud_rate,
                    source,
                })?;
            tracing::info!(device = %self.device, baud = baud_rate, "baud rate changed");
        }
        Ok(())
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>, SessionError> {
        self.open()?;
        self.transport
            .as_mut()
            .ok_or_else(|| SessionError::Io(std::io::Error::from(std::io::ErrorKind::NotConnected)))
    }

    /// Write raw bytes, opening the session first if needed
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let transport = self.transport()?;
        transport.write_all(bytes)?;
        transport.flush()?;
        Ok(())
    }

    /// Write `text` followed by a bare carriage return
    pub fn send_line(&mut self, text: &str) -> Result<(), SessionError> {
        tracing::debug!(device = %self.device, "sending {:?}", text);
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push_str(LINE_TERMINATOR);
        self.send_bytes(line.as_bytes())
    }

    /// Hold a break condition for `duration_ms`, opening the session first if needed
    pub fn send_break(&mut self, duration_ms: u64) -> Result<(), SessionError> {
        tracing::debug!(device = %self.device, duration_ms, "sending break");
        self.transport()?
            .send_break(Duration::from_millis(duration_ms))?;
        Ok(())
    }

    /// Start the background reader, optionally teeing received data.
    ///
    /// No-op when already listening; a tee passed in that case is closed unused.
    pub fn start_listening(&mut self, tee: Option<TeeSink>) -> Result<(), SessionError> {
        if self.is_listening() {
            if let Some(tee) = tee {
                tracing::debug!(path = ?tee.path(), "already listening, tee ignored");
                tee.close();
            }
            return Ok(());
        }

        // A reader that died on a read error still owns its tee
        if let Some(stale) = self.reader.take() {
            if let Some(old_tee) = stale.stop() {
                old_tee.close();
            }
        }

        let reader_transport = self.transport()?.try_clone()?;
        let reader = ReadLoop::spawn(
            self.device.clone(),
            reader_transport,
            self.buffer.clone(),
            tee,
            self.config.read_chunk,
            self.events_tx.clone(),
        )?;
        self.reader = Some(reader);
        self.state = SessionState::Listening;
        tracing::info!(device = %self.device, "listening");
        Ok(())
    }

    /// Stop the background reader and close its tee sink
    pub fn stop_listening(&mut self) {
        if let Some(reader) = self.reader.take() {
            if let Some(tee) = reader.stop() {
                tee.close();
            }
            tracing::info!(device = %self.device, "stopped listening");
        }
        if self.state == SessionState::Listening {
            self.state = SessionState::Open;
        }
    }

    /// Discard buffered input
    pub fn clear_buffer(&self) {
        self.buffer.clear();
    }

    /// Block until `token` arrives, returning everything received through it
    pub fn wait_for(&self, token: &str, timeout: Duration) -> Result<String, WaitError> {
        let result = self
            .buffer
            .wait_for(token, timeout, self.config.poll_interval());
        match &result {
            Ok(_) => tracing::debug!(device = %self.device, "got {:?}", token),
            Err(e) => tracing::debug!(device = %self.device, "{}", e),
        }
        result
    }

    /// Make a `wait_for` blocked on this session's buffer return `Cancelled`
    pub fn interrupt_wait(&self) {
        self.buffer.interrupt();
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.device)
            .field("baud_rate", &self.baud_rate)
            .field("state", &self.state())
            .finish()
    }
}
