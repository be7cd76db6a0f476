//! Background reader
//!
//! Pulls bytes from the transport into the session buffer until stopped or
//! until a read fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::buffer::SessionBuffer;
use super::tee::TeeSink;
use crate::transport::{is_poll_timeout, Transport};

/// Notifications raised by a session's background reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A read failed; the session stopped listening
    ReadFailed {
        /// Device being read
        device: String,
        /// Error description
        error: String,
    },
}

/// Handle to a running reader thread
pub(crate) struct ReadLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Option<TeeSink>>>,
}

impl ReadLoop {
    /// Start reading `transport` into `buffer`
    pub(crate) fn spawn(
        device: String,
        mut transport: Box<dyn Transport>,
        buffer: Arc<SessionBuffer>,
        mut tee: Option<TeeSink>,
        chunk_size: usize,
        events: Sender<SessionEvent>,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name(format!("rditerm-reader-{}", device.rsplit('/').next().unwrap_or("")))
            .spawn(move || {
                let mut chunk = vec![0u8; chunk_size.max(1)];
                tracing::debug!(device = %device, "reader started");

                while flag.load(Ordering::Acquire) {
                    match transport.read(&mut chunk) {
                        Ok(0) => continue,
                        Ok(n) => {
                            buffer.append(&chunk[..n]);
                            if let Some(sink) = tee.as_mut() {
                                if let Err(e) = sink.write_chunk(&chunk[..n]) {
                                    tracing::warn!(device = %device, "tee write failed, no longer saving: {}", e);
                                    tee = None;
                                }
                            }
                        }
                        Err(e) if is_poll_timeout(&e) => continue,
                        Err(e) => {
                            tracing::error!(device = %device, "serial read failure: {}", e);
                            flag.store(false, Ordering::Release);
                            let _ = events.send(SessionEvent::ReadFailed {
                                device: device.clone(),
                                error: e.to_string(),
                            });
                            break;
                        }
                    }
                }

                tracing::debug!(device = %device, "reader exiting");
                tee
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Whether the thread is still pulling data
    pub(crate) fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread to stop and wait for it.
    ///
    /// Returns within one transport receive timeout. Hands back the tee sink.
    pub(crate) fn stop(mut self) -> Option<TeeSink> {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(tee) => tee,
            Err(_) => {
                tracing::error!("reader thread panicked");
                None
            }
        }
    }
}

impl Drop for ReadLoop {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
