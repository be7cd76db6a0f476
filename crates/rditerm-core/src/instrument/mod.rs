//! RDI instrument driver
//!
//! Wakeup, clock, setup and baud-change sequences for RDI BroadBand and
//! WorkHorse ADCPs, built only from [`DeviceSession`] operations.
//!
//! Every public operation is independently timed and reports failures as an
//! [`OperationError`] carrying a user-facing message. A failure aborts that one
//! operation; the session stays usable.

pub mod commands;

pub use commands::InstrumentType;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::InstrumentConfig;
use crate::script::{CommandScript, ScriptError, PROMPT};
use crate::session::{DeviceSession, SessionError, TeeSink, WaitError};
use commands::*;

/// Named instrument operations, as offered by a terminal's menus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Break and wait for the banner
    Wakeup,
    /// Power the instrument down
    Sleep,
    /// Set the instrument clock to UTC now
    SetClock,
    /// Dump the instrument configuration
    ShowConfig,
    /// Run the built-in self tests
    Diagnostics,
    /// Switch both ends to the download baud rate
    ChangeBaud,
    /// List the recorder directory
    ListRecorder,
    /// Erase the recorder
    EraseRecorder,
    /// Start pinging in binary output mode
    StartBinary,
    /// Send the command file, save and start pinging
    SendSetup,
    /// Wake and list the recorder ahead of a deployment or recovery
    DeployRecover,
}

impl Operation {
    /// Every operation, in menu order
    pub const ALL: [Operation; 11] = [
        Operation::Wakeup,
        Operation::Sleep,
        Operation::SetClock,
        Operation::SendSetup,
        Operation::ShowConfig,
        Operation::Diagnostics,
        Operation::ChangeBaud,
        Operation::StartBinary,
        Operation::ListRecorder,
        Operation::EraseRecorder,
        Operation::DeployRecover,
    ];

    /// Menu label
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Wakeup => "Wakeup",
            Operation::Sleep => "ZZZZ (go to sleep)",
            Operation::SetClock => "Set Clock",
            Operation::ShowConfig => "Show Config",
            Operation::Diagnostics => "Run Diagnostics",
            Operation::ChangeBaud => "Change to download Baud",
            Operation::ListRecorder => "List Recorder Directory",
            Operation::EraseRecorder => "Erase Recorder NOW",
            Operation::StartBinary => "Start Binary",
            Operation::SendSetup => "Send Setup",
            Operation::DeployRecover => "Deployment/Recovery Initialization",
        }
    }

    /// Prefix of the message shown when the operation fails
    pub fn failure_message(&self) -> &'static str {
        match self {
            Operation::Wakeup => "Wakeup failed",
            Operation::Sleep => "Unable to put instrument to sleep",
            Operation::SetClock => "Unable to set clock",
            Operation::ShowConfig => "Unable to fetch configuration",
            Operation::Diagnostics => "Diagnostics failed",
            Operation::ChangeBaud => "Unable to change baud",
            Operation::ListRecorder => "Unable to list recorder",
            Operation::EraseRecorder => "Erase failed",
            Operation::StartBinary => "Unable to start binary mode",
            Operation::SendSetup => "Unable to send setup",
            Operation::DeployRecover => "Initialization failed",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cause of a failed instrument operation
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Command file not found: {}", .0.display())]
    CommandFileMissing(PathBuf),

    #[error("Unable to read command file {}: {source}", .path.display())]
    CommandFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to start logging to {}: {source}", .path.display())]
    DeploymentLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A failed instrument operation; displays as the user-facing message
#[derive(Error, Debug)]
#[error("{}: {source}", .operation.failure_message())]
pub struct OperationError {
    /// Operation that failed
    pub operation: Operation,
    /// Why it failed
    #[source]
    pub source: InstrumentError,
}

/// Driver for one RDI ADCP on a device session
pub struct RdiInstrument {
    session: DeviceSession,
    config: InstrumentConfig,
    instrument_type: InstrumentType,
    banner: Option<String>,
}

impl RdiInstrument {
    /// Wrap a session; nothing is sent until an operation runs
    pub fn new(session: DeviceSession, config: InstrumentConfig) -> Self {
        Self {
            session,
            config,
            instrument_type: InstrumentType::Unknown,
            banner: None,
        }
    }

    /// Underlying session
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Underlying session, for raw terminal input
    pub fn session_mut(&mut self) -> &mut DeviceSession {
        &mut self.session
    }

    /// Give the session back
    pub fn into_session(self) -> DeviceSession {
        self.session
    }

    /// Driver configuration
    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Instrument family from the last successful wakeup
    pub fn instrument_type(&self) -> InstrumentType {
        self.instrument_type
    }

    /// Banner captured by the last successful wakeup
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Baud rate for downloads: the configured override, else the family default,
    /// else the wakeup baud when the instrument was never identified
    pub fn download_baud(&self) -> u32 {
        match (self.config.download_baud, &self.banner) {
            (Some(baud), _) => baud,
            (None, Some(_)) => self.instrument_type.download_baud(),
            (None, None) => self.config.default_baud,
        }
    }

    fn with_operation<T>(
        &mut self,
        operation: Operation,
        f: impl FnOnce(&mut Self) -> Result<T, InstrumentError>,
    ) -> Result<T, OperationError> {
        f(self).map_err(|source| {
            tracing::error!(device = %self.session.device(), "{}: {}", operation.failure_message(), source);
            OperationError { operation, source }
        })
    }

    /// Run an operation by name, returning whatever text it captured.
    ///
    /// `SendSetup` uses the configured command file without a deployment log.
    pub fn perform(&mut self, operation: Operation) -> Result<Vec<String>, OperationError> {
        match operation {
            Operation::Wakeup => self.wake().map(|banner| vec![banner]),
            Operation::Sleep => self.sleep().map(|reply| vec![reply]),
            Operation::SetClock => self.set_clock().map(|ts| vec![ts]),
            Operation::ShowConfig => self.show_config(),
            Operation::Diagnostics => self.run_diagnostics(),
            Operation::ChangeBaud => self
                .change_baud_for_download(None)
                .map(|baud| vec![baud.to_string()]),
            Operation::ListRecorder => self.list_recorder(),
            Operation::EraseRecorder => self.erase_recorder().map(|reply| vec![reply]),
            Operation::StartBinary => self.start_binary(None).map(|_| Vec::new()),
            Operation::SendSetup => {
                let path = self.config.command_file.clone();
                self.send_setup(&path, None)
            }
            Operation::DeployRecover => self.start_deploy_recover(),
        }
    }

    /// Break the instrument out of sleep or data collection and classify its banner
    pub fn wake(&mut self) -> Result<String, OperationError> {
        self.with_operation(Operation::Wakeup, Self::wake_inner)
    }

    fn wake_inner(&mut self) -> Result<String, InstrumentError> {
        tracing::debug!("wakeup starting");
        self.session.start_listening(None)?;
        self.session.set_baud(self.config.default_baud)?;
        self.session.clear_buffer();
        self.session.send_break(WAKE_BREAK_MS)?;
        let banner = self.session.wait_for(PROMPT, WAKE_TIMEOUT)?;

        self.instrument_type = InstrumentType::from_banner(&banner);
        self.banner = Some(banner.clone());
        tracing::info!(instrument = %self.instrument_type, "instrument awake");
        Ok(banner)
    }

    /// Probe with `TS?` and fall back to a full wakeup when there is no prompt
    pub fn wake_if_sleeping(&mut self) -> Result<(), OperationError> {
        self.with_operation(Operation::Wakeup, Self::wake_if_sleeping_inner)
    }

    fn wake_if_sleeping_inner(&mut self) -> Result<(), InstrumentError> {
        if self.banner.is_none() {
            return self.wake_inner().map(|_| ());
        }
        match self.probe() {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!("no answer to probe ({}), waking", e);
                self.wake_inner().map(|_| ())
            }
        }
    }

    fn probe(&mut self) -> Result<(), InstrumentError> {
        self.session.start_listening(None)?;
        self.session.clear_buffer();
        self.session.send_line(QUERY_CLOCK)?;
        self.session.wait_for(PROMPT, PROBE_TIMEOUT)?;
        Ok(())
    }

    /// Set the instrument clock to the current UTC time; returns the directive sent
    pub fn set_clock(&mut self) -> Result<String, OperationError> {
        self.with_operation(Operation::SetClock, Self::set_clock_inner)
    }

    fn set_clock_inner(&mut self) -> Result<String, InstrumentError> {
        self.wake_if_sleeping_inner()?;
        let directive = set_clock_directive(chrono::Utc::now());
        self.session.send_line(&directive)?;
        Ok(directive)
    }

    fn run_commands<S: AsRef<str>>(
        &mut self,
        directives: &[S],
        timeout: Duration,
    ) -> Result<Vec<String>, InstrumentError> {
        self.session.start_listening(None)?;
        let script = CommandScript::from_directives(directives.iter().map(|d| d.as_ref()));
        Ok(script.run(&mut self.session, timeout)?)
    }

    /// Dump the instrument configuration
    pub fn show_config(&mut self) -> Result<Vec<String>, OperationError> {
        let timeout = self.config.step_timeout();
        self.with_operation(Operation::ShowConfig, |this| {
            this.run_commands(&SHOW_CONFIG, timeout)
        })
    }

    /// Run the built-in self tests
    pub fn run_diagnostics(&mut self) -> Result<Vec<String>, OperationError> {
        let timeout = self.config.step_timeout();
        self.with_operation(Operation::Diagnostics, |this| {
            this.run_commands(&DIAGNOSTICS, timeout)
        })
    }

    /// List the recorder directory
    pub fn list_recorder(&mut self) -> Result<Vec<String>, OperationError> {
        self.with_operation(Operation::ListRecorder, Self::list_recorder_inner)
    }

    fn list_recorder_inner(&mut self) -> Result<Vec<String>, InstrumentError> {
        let commands = self.instrument_type.list_recorder_commands();
        let timeout = self.config.step_timeout();
        self.run_commands(commands, timeout)
    }

    /// Power the instrument down; returns the acknowledgement
    pub fn sleep(&mut self) -> Result<String, OperationError> {
        self.with_operation(Operation::Sleep, |this| {
            this.session.set_baud(this.config.default_baud)?;
            this.wake_if_sleeping_inner()?;
            this.session.clear_buffer();
            this.session.send_line(POWER_DOWN)?;
            Ok(this.session.wait_for(POWER_DOWN_ACK, SLEEP_TIMEOUT)?)
        })
    }

    /// Erase the recorder immediately
    pub fn erase_recorder(&mut self) -> Result<String, OperationError> {
        self.with_operation(Operation::EraseRecorder, |this| {
            this.session.set_baud(this.config.default_baud)?;
            this.wake_if_sleeping_inner()?;
            this.session.clear_buffer();
            this.session.send_line(ERASE_RECORDER)?;
            Ok(this.session.wait_for(PROMPT, ERASE_TIMEOUT)?)
        })
    }

    /// Switch instrument and session to `baud`, or to [`Self::download_baud`].
    ///
    /// Returns the baud rate now in use.
    pub fn change_baud_for_download(&mut self, baud: Option<u32>) -> Result<u32, OperationError> {
        let new_baud = baud.unwrap_or_else(|| self.download_baud());
        let timeout = self.config.step_timeout();
        self.with_operation(Operation::ChangeBaud, |this| {
            this.run_commands(&[""], timeout)?;
            this.session.clear_buffer();
            this.session.send_line(&baud_directive(new_baud))?;
            this.session.wait_for(PROMPT, BAUD_CHANGE_TIMEOUT)?;
            this.session.set_baud(new_baud)?;
            std::thread::sleep(BAUD_SETTLE);
            tracing::info!(baud = new_baud, "instrument switched to download baud");
            Ok(new_baud)
        })
    }

    /// Set the clock, send optional extra directives and start binary output
    pub fn start_binary(&mut self, extra: Option<&CommandScript>) -> Result<(), OperationError> {
        let timeout = self.config.step_timeout();
        self.with_operation(Operation::StartBinary, |this| {
            this.set_clock_inner()?;
            if let Some(script) = extra {
                this.session.start_listening(None)?;
                script.run(&mut this.session, timeout)?;
            }
            this.session.send_line(BINARY_OUTPUT)?;
            Ok(())
        })
    }

    /// Send a command file, save the parameters and start pinging.
    ///
    /// With `deployment_log`, listening restarts teeing into that file once
    /// pinging has started. Returns the replies to the file's directives.
    pub fn send_setup(
        &mut self,
        command_file: &Path,
        deployment_log: Option<&Path>,
    ) -> Result<Vec<String>, OperationError> {
        let timeout = self.config.step_timeout();
        self.with_operation(Operation::SendSetup, |this| {
            this.wake_if_sleeping_inner()?;
            if !command_file.exists() {
                return Err(InstrumentError::CommandFileMissing(command_file.to_path_buf()));
            }
            tracing::info!(path = %command_file.display(), "sending command file");
            let script = CommandScript::from_file(command_file).map_err(|source| {
                InstrumentError::CommandFile {
                    path: command_file.to_path_buf(),
                    source,
                }
            })?;

            this.session.start_listening(None)?;
            let replies = script.run(&mut this.session, timeout)?;

            this.session.clear_buffer();
            this.session.send_line(SAVE_PARAMETERS)?;
            this.session.wait_for(SAVE_ACK, SAVE_TIMEOUT)?;
            this.session.send_line(START_PINGING)?;
            tracing::info!("data collection started at {}", chrono::Utc::now().to_rfc3339());

            if let Some(log_path) = deployment_log {
                let tee = TeeSink::create(log_path).map_err(|source| {
                    InstrumentError::DeploymentLog {
                        path: log_path.to_path_buf(),
                        source,
                    }
                })?;
                this.session.stop_listening();
                this.session.start_listening(Some(tee))?;
                tracing::info!(path = %log_path.display(), "deployment log started");
            }

            Ok(replies)
        })
    }

    /// Clear the buffer, wake the instrument and list its recorder
    pub fn start_deploy_recover(&mut self) -> Result<Vec<String>, OperationError> {
        self.with_operation(Operation::DeployRecover, |this| {
            this.session.clear_buffer();
            tracing::info!("deployment/recovery initialization at {}", chrono::Utc::now().to_rfc3339());
            this.wake_inner()?;
            this.list_recorder_inner()
        })
    }
}

impl fmt::Debug for RdiInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdiInstrument")
            .field("session", &self.session)
            .field("instrument_type", &self.instrument_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_messages() {
        let err = OperationError {
            operation: Operation::Wakeup,
            source: InstrumentError::Wait(WaitError::Timeout {
                token: ">".to_string(),
                timeout: WAKE_TIMEOUT,
            }),
        };
        assert_eq!(
            err.to_string(),
            "Wakeup failed: Timed out after 5000ms waiting for \">\""
        );
    }

    #[test]
    fn test_every_operation_has_label() {
        for op in Operation::ALL {
            assert!(!op.label().is_empty());
            assert!(!op.failure_message().is_empty());
        }
    }
}
