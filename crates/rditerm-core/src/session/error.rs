//! Session errors

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::lock::LockError;

/// Errors that can occur while driving a device session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Unable to open serial port {device}: {source}")]
    OpenFailed {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("Unable to change baud to {baud}: {source}")]
    ReconfigureFailed {
        baud: u32,
        #[source]
        source: io::Error,
    },

    #[error("Serial I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wait(#[from] WaitError),
}

/// Outcome of a `wait_for` that did not see its token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("Timed out after {}ms waiting for {token:?}", .timeout.as_millis())]
    Timeout { token: String, timeout: Duration },

    #[error("Interrupted while waiting for {token:?}")]
    Cancelled { token: String },
}

impl WaitError {
    /// True when the wait expired rather than being interrupted
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    /// Token that was being waited for
    pub fn token(&self) -> &str {
        match self {
            WaitError::Timeout { token, .. } | WaitError::Cancelled { token } => token,
        }
    }
}
