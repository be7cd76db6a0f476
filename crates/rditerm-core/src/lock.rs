//! Device locking
//!
//! UUCP-style advisory lock markers: one `LCK..<basename>` file per device in a
//! shared lock directory, holding the decimal pid of the owning process.
//!
//! A marker whose pid no longer names a live process is stale and gets reclaimed.
//! Only cooperating processes using the same scheme are excluded.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Default system lock directory
pub const DEFAULT_LOCK_DIR: &str = "/var/lock";

/// Prefix of every marker file name
const MARKER_PREFIX: &str = "LCK..";

/// Serializes acquire/release between threads of this process
static MARKER_GUARD: Mutex<()> = Mutex::new(());

/// Errors that can occur while locking a device
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Device is locked by pid {0}")]
    HeldBy(u32),

    #[error("Invalid device path: '{0}'")]
    InvalidDevice(String),

    #[error("Lock file I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Advisory device lock rooted at a lock directory
#[derive(Debug, Clone)]
pub struct DeviceLock {
    lock_dir: PathBuf,
}

impl Default for DeviceLock {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_DIR)
    }
}

impl DeviceLock {
    /// Create a lock manager using the given lock directory
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    /// Lock directory holding the markers
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Path of the marker for a device.
    ///
    /// Only the basename matters, so `/dev/ttyUSB0` and `ttyUSB0` share a marker.
    pub fn marker_path(&self, device: &str) -> Result<PathBuf, LockError> {
        let basename = device_basename(device)
            .ok_or_else(|| LockError::InvalidDevice(device.to_string()))?;
        Ok(self.lock_dir.join(format!("{}{}", MARKER_PREFIX, basename)))
    }

    /// Pid currently recorded in the device's marker, if any
    pub fn owner(&self, device: &str) -> Result<Option<u32>, LockError> {
        let marker = self.marker_path(device)?;
        Ok(read_pid(&marker))
    }

    /// Acquire the lock for `device` on behalf of this process.
    ///
    /// Re-acquiring a lock this process already holds succeeds without touching
    /// the marker.
    pub fn acquire(&self, device: &str) -> Result<(), LockError> {
        let marker = self.marker_path(device)?;
        let _guard = MARKER_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let own_pid = std::process::id();

        fs::create_dir_all(&self.lock_dir)?;

        // One retry after clearing a stale marker; a second conflict means
        // another process won the race.
        for attempt in 0..2 {
            match create_marker(&marker, own_pid) {
                Ok(()) => {
                    tracing::debug!(marker = %marker.display(), pid = own_pid, "device lock acquired");
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            match classify_conflict(read_pid(&marker), own_pid, attempt) {
                Conflict::Ours => return Ok(()),
                Conflict::Held(pid) => return Err(LockError::HeldBy(pid)),
                // Another process may still be writing its pid; leave the marker
                Conflict::Unsettled => break,
                Conflict::Stale(stale) => {
                    tracing::info!(
                        marker = %marker.display(),
                        stale_pid = ?stale,
                        "removing stale device lock"
                    );
                    match fs::remove_file(&marker) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        match read_pid(&marker) {
            Some(pid) => Err(LockError::HeldBy(pid)),
            None => Err(LockError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("unable to create {}", marker.display()),
            ))),
        }
    }

    /// Release the lock for `device`.
    ///
    /// Missing markers are ignored. Only called from the owner's shutdown path,
    /// so the recorded pid is not checked.
    pub fn release(&self, device: &str) -> Result<(), LockError> {
        let marker = self.marker_path(device)?;
        let _guard = MARKER_GUARD.lock().unwrap_or_else(|e| e.into_inner());

        match fs::remove_file(&marker) {
            Ok(()) => {
                tracing::debug!(marker = %marker.display(), "device lock released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// What to do about a marker that already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conflict {
    /// Written by this process
    Ours,
    /// Owned by a live process, or won by one during the retry
    Held(u32),
    /// Dead owner or unreadable content; remove and retry
    Stale(Option<u32>),
    /// Unreadable on the retry; report without removing
    Unsettled,
}

fn classify_conflict(recorded: Option<u32>, own_pid: u32, attempt: usize) -> Conflict {
    match recorded {
        Some(pid) if pid == own_pid => Conflict::Ours,
        Some(pid) if attempt > 0 || process_alive(pid) => Conflict::Held(pid),
        None if attempt > 0 => Conflict::Unsettled,
        stale => Conflict::Stale(stale),
    }
}

/// Strip any directory prefix from a device path
fn device_basename(device: &str) -> Option<&str> {
    let basename = device.trim_end_matches('/').rsplit('/').next()?;
    if basename.is_empty() || basename == "." || basename == ".." {
        None
    } else {
        Some(basename)
    }
}

fn create_marker(marker: &Path, pid: u32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(marker)?;
    writeln!(file, "{}", pid)?;
    file.flush()
}

/// Read the pid from a marker; unreadable or corrupt markers yield `None`
fn read_pid(marker: &Path) -> Option<u32> {
    let content = fs::read_to_string(marker).ok()?;
    content.split_whitespace().next()?.parse::<u32>().ok()
}

/// Check whether a process with the given pid exists
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let result = unsafe { libc::kill(raw, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Check whether a process with the given pid exists
#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    // No cheap probe here; never reclaim another pid's marker.
    pid != 0
}
