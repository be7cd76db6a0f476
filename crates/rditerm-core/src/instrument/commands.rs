//! RDI command vocabulary
//!
//! Directive strings, prompt tokens, timing constants and lookup tables used by
//! the instrument driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Break length for a wakeup; Ocean Surveyors need at least 300 ms
pub const WAKE_BREAK_MS: u64 = 400;

/// Prompt wait after a wakeup break
pub const WAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Prompt wait for the cheap "are you awake" probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Prompt wait after a `CB` baud change directive
pub const BAUD_CHANGE_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause after switching the local baud rate so both UARTs settle
pub const BAUD_SETTLE: Duration = Duration::from_millis(500);

/// Wait for the power-down acknowledgement
pub const SLEEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for the recorder erase to finish
pub const ERASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for the `CK` acknowledgement
pub const SAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Clock query, doubles as the wake probe
pub const QUERY_CLOCK: &str = "TS?";
/// Clock set prefix, followed by `yyMMddHHmmss`
pub const SET_CLOCK_PREFIX: &str = "TS";
/// Power down
pub const POWER_DOWN: &str = "CZ";
/// Power-down acknowledgement token
pub const POWER_DOWN_ACK: &str = "Powering";
/// Erase the recorder
pub const ERASE_RECORDER: &str = "RE ErAsE";
/// Save parameters
pub const SAVE_PARAMETERS: &str = "CK";
/// Parameter save acknowledgement token
pub const SAVE_ACK: &str = "Parameters saved";
/// Start pinging
pub const START_PINGING: &str = "CS";
/// Binary output format
pub const BINARY_OUTPUT: &str = "CF11110";

/// Configuration dump directives
pub const SHOW_CONFIG: [&str; 10] = ["RA", "RS", "RB0", "PS3", "B?", "C?", "E?", "P?", "T?", "W?"];

/// Built-in self tests
pub const DIAGNOSTICS: [&str; 2] = ["PS0", "PT200"];

/// Recorder listing for Broadband units
pub const LIST_RECORDER_BB: [&str; 2] = ["RA", "RS"];

/// Recorder listing for everything else
pub const LIST_RECORDER: [&str; 4] = ["RA", "RS", "RF", "RR"];

/// Instrument baud rate to `CB` code
pub const BAUD_CODES: [(u32, u8); 9] = [
    (300, 0),
    (1200, 1),
    (2400, 2),
    (4800, 3),
    (9600, 4),
    (19200, 5),
    (38400, 6),
    (57600, 7),
    (115200, 8),
];

/// Code used for baud rates the instrument has no entry for
const FALLBACK_BAUD_CODE: u8 = 4;

/// Instrument family deduced from the wakeup banner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentType {
    /// Banner matched no known family
    Unknown,
    /// BroadBand ADCP ("BB")
    Broadband,
    /// WorkHorse ADCP ("WH")
    WorkHorse,
}

impl InstrumentType {
    /// Classify a wakeup banner.
    ///
    /// WorkHorse banners also mention "Broadband", so WorkHorse is checked first.
    pub fn from_banner(banner: &str) -> Self {
        if banner.contains("WorkHorse") {
            InstrumentType::WorkHorse
        } else if banner.contains("Broadband") {
            InstrumentType::Broadband
        } else {
            InstrumentType::Unknown
        }
    }

    /// Short family code
    pub fn code(&self) -> &'static str {
        match self {
            InstrumentType::Unknown => "Unrecognized",
            InstrumentType::Broadband => "BB",
            InstrumentType::WorkHorse => "WH",
        }
    }

    /// Preferred baud rate for recorder downloads
    pub fn download_baud(&self) -> u32 {
        match self {
            InstrumentType::Broadband => 38400,
            InstrumentType::WorkHorse => 115200,
            InstrumentType::Unknown => 9600,
        }
    }

    /// Directives that list the recorder contents
    pub fn list_recorder_commands(&self) -> &'static [&'static str] {
        match self {
            InstrumentType::Broadband => &LIST_RECORDER_BB,
            _ => &LIST_RECORDER,
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// `CB` code for a baud rate; unmapped rates use the 9600 code
pub fn baud_code(baud: u32) -> u8 {
    BAUD_CODES
        .iter()
        .find(|(rate, _)| *rate == baud)
        .map(|(_, code)| *code)
        .unwrap_or(FALLBACK_BAUD_CODE)
}

/// Directive switching the instrument to `baud`, 1 stop bit, no parity
pub fn baud_directive(baud: u32) -> String {
    format!("CB{}11", baud_code(baud))
}

/// 12-digit `yyMMddHHmmss` clock string in UTC
pub fn format_clock(time: DateTime<Utc>) -> String {
    time.format("%y%m%d%H%M%S").to_string()
}

/// Directive setting the instrument clock to `time`
pub fn set_clock_directive(time: DateTime<Utc>) -> String {
    format!("{}{}", SET_CLOCK_PREFIX, format_clock(time))
}
