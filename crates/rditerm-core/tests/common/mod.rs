//! Simulated RDI instrument behind the `Transport` boundary

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use rditerm_core::config::SessionConfig;
use rditerm_core::session::DeviceSession;
use rditerm_core::transport::{Connector, OpenParams, Transport};

pub const WORKHORSE_BANNER: &str = "WorkHorse Broadband ADCP\r\n>";
pub const BROADBAND_BANNER: &str = "RD Instruments Broadband ADCP Version 5.58\r\n>";

#[derive(Default)]
pub struct InstrumentState {
    /// Bytes waiting to be read by the host
    rx: VecDeque<u8>,
    /// Everything the host wrote
    pub written: Vec<u8>,
    /// Complete lines the host wrote, terminator stripped
    pub lines: Vec<String>,
    pending: String,
    pub breaks: Vec<Duration>,
    pub baud: u32,
    pub banner: Option<String>,
    /// Lines that get no reply at all
    pub silent: HashSet<String>,
    /// Canned replies inserted between the echo and the prompt
    pub replies: HashMap<String, String>,
    pub asleep: bool,
    pub fail_reads: bool,
    pub fail_open: bool,
    pub fail_baud: bool,
    /// Successful in-place baud changes
    pub baud_changes: usize,
    pub opens: usize,
    pub opened_paths: Vec<String>,
    receive_timeout: Duration,
}

/// Shared handle to the simulated instrument
#[derive(Clone, Default)]
pub struct SimulatedInstrument {
    inner: Arc<(Mutex<InstrumentState>, Condvar)>,
}

impl SimulatedInstrument {
    pub fn new() -> Self {
        let sim = Self::default();
        sim.state().receive_timeout = Duration::from_millis(20);
        sim.state().baud = 9600;
        sim
    }

    /// Instrument that answers a break with `banner`
    pub fn with_banner(banner: &str) -> Self {
        let sim = Self::new();
        sim.state().banner = Some(banner.to_string());
        sim
    }

    pub fn state(&self) -> MutexGuard<'_, InstrumentState> {
        self.inner.0.lock().unwrap()
    }

    /// Queue bytes for the host as if the instrument sent them
    pub fn emit(&self, bytes: &[u8]) {
        self.state().rx.extend(bytes);
        self.inner.1.notify_all();
    }

    pub fn lines(&self) -> Vec<String> {
        self.state().lines.clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn silence(&self, line: &str) {
        self.state().silent.insert(line.to_string());
    }

    pub fn reply(&self, line: &str, text: &str) {
        self.state().replies.insert(line.to_string(), text.to_string());
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(SimulatedConnector { sim: self.clone() })
    }

    fn respond(&self, line: String) {
        let mut state = self.state();
        state.lines.push(line.clone());
        // Pinging starts without an echo
        if state.asleep || state.silent.contains(&line) || line == "CS" {
            return;
        }

        let mut out = format!("{}\r\n", line);
        if let Some(text) = state.replies.get(&line) {
            out.push_str(text);
        }
        match line.as_str() {
            "CZ" => {
                out.push_str("Powering Down\r\n");
                state.asleep = true;
            }
            "CK" => out.push_str("[Parameters saved as USER defaults]\r\n>"),
            "CF11110" => {}
            _ => out.push('>'),
        }
        state.rx.extend(out.as_bytes());
        drop(state);
        self.inner.1.notify_all();
    }
}

struct SimulatedConnector {
    sim: SimulatedInstrument,
}

impl Connector for SimulatedConnector {
    fn open(&self, path: &str, params: &OpenParams) -> io::Result<Box<dyn Transport>> {
        let mut state = self.sim.state();
        if state.fail_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        state.opens += 1;
        state.opened_paths.push(path.to_string());
        state.baud = params.baud_rate;
        state.receive_timeout = params.receive_timeout;
        Ok(Box::new(SimulatedTransport {
            sim: self.sim.clone(),
        }))
    }
}

struct SimulatedTransport {
    sim: SimulatedInstrument,
}

impl Read for SimulatedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, cv) = &*self.sim.inner;
        let mut state = lock.lock().unwrap();
        if state.rx.is_empty() && !state.fail_reads {
            let timeout = state.receive_timeout;
            state = cv.wait_timeout(state, timeout).unwrap().0;
        }
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if state.rx.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut completed = Vec::new();
        {
            let mut state = self.sim.state();
            state.written.extend_from_slice(buf);
            for &byte in buf {
                if byte == b'\r' {
                    completed.push(std::mem::take(&mut state.pending));
                } else {
                    state.pending.push(byte as char);
                }
            }
        }
        for line in completed {
            self.sim.respond(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SimulatedTransport {
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        let mut state = self.sim.state();
        if state.fail_baud {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "unsupported baud"));
        }
        state.baud = baud_rate;
        state.baud_changes += 1;
        Ok(())
    }

    fn baud_rate(&self) -> io::Result<u32> {
        Ok(self.sim.state().baud)
    }

    fn send_break(&mut self, duration: Duration) -> io::Result<()> {
        let banner = {
            let mut state = self.sim.state();
            state.breaks.push(duration);
            state.asleep = false;
            state.banner.clone()
        };
        if let Some(banner) = banner {
            self.sim.emit(banner.as_bytes());
        }
        Ok(())
    }

    fn set_receive_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.sim.state().receive_timeout = timeout;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(SimulatedTransport {
            sim: self.sim.clone(),
        }))
    }
}

/// Session config with short timeouts and a private lock directory
pub fn test_config(lock_dir: &Path, device: &str) -> SessionConfig {
    SessionConfig {
        lock_dir: lock_dir.to_path_buf(),
        receive_timeout_ms: 20,
        poll_interval_ms: 10,
        ..SessionConfig::for_device(device, 9600)
    }
}

pub fn test_session(sim: &SimulatedInstrument, lock_dir: &Path, device: &str) -> DeviceSession {
    DeviceSession::new(test_config(lock_dir, device), sim.connector())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
