//! # rditerm Core Library
//!
//! Device session engine for operating RDI acoustic Doppler current profilers
//! over a serial line.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Advisory interprocess device locking (`LCK..<device>` markers)
//! - A background reader feeding a bounded, searchable receive buffer
//! - Blocking "wait for prompt" synchronization with timeouts
//! - Command script parsing and fail-fast playback
//! - RDI instrument operations (wakeup, clock, setup, baud changes)
//!
//! ## Example
//!
//! ```rust,ignore
//! use rditerm_core::{config::TerminalConfig, instrument::RdiInstrument, session::DeviceSession};
//!
//! let config = TerminalConfig::default();
//! let session = DeviceSession::serial(config.session.clone());
//! let mut adcp = RdiInstrument::new(session, config.instrument.clone());
//!
//! adcp.wake()?;
//! println!("Instrument: {}", adcp.instrument_type());
//! adcp.set_clock()?;
//! ```

pub mod config;
pub mod instrument;
pub mod lock;
pub mod script;
pub mod session;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{InstrumentConfig, SessionConfig, TerminalConfig};
    pub use crate::instrument::{InstrumentType, Operation, OperationError, RdiInstrument};
    pub use crate::lock::{DeviceLock, LockError};
    pub use crate::script::{CommandScript, ScriptError};
    pub use crate::session::{DeviceSession, SessionBuffer, SessionError, SessionState, WaitError};
    pub use crate::transport::{Connector, SerialConnector, Transport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
