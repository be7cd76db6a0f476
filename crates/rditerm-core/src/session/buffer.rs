//! Receive buffer
//!
//! A bounded sliding window over everything the instrument has sent, shared by
//! the background reader (the only writer) and command issuers waiting for prompts.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::error::WaitError;

struct Window {
    data: VecDeque<u8>,
    /// Bumped by `interrupt`; a waiter that sees it change gives up
    interrupts: u64,
}

impl Window {
    fn through(&mut self, token: &str) -> Option<String> {
        let data = self.data.make_contiguous();
        find_end(data, token.as_bytes()).map(|end| String::from_utf8_lossy(&data[..end]).into_owned())
    }
}

/// Bounded byte accumulator with pattern search.
///
/// Holds at most `capacity` bytes; appending past that discards the oldest bytes.
/// Every operation runs under one mutex, and appends wake blocked waiters.
pub struct SessionBuffer {
    capacity: usize,
    window: Mutex<Window>,
    arrived: Condvar,
}

impl SessionBuffer {
    /// Create an empty buffer retaining at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Mutex::new(Window {
                data: VecDeque::with_capacity(capacity.max(1)),
                interrupts: 0,
            }),
            arrived: Condvar::new(),
        }
    }

    /// Retention ceiling in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        // A panicking holder cannot leave the byte window torn
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append received bytes, dropping from the front beyond capacity
    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut window = self.lock();
        let keep = &bytes[bytes.len().saturating_sub(self.capacity)..];
        let overflow = (window.data.len() + keep.len()).saturating_sub(self.capacity);
        window.data.drain(..overflow);
        window.data.extend(keep);
        drop(window);
        self.arrived.notify_all();
    }

    /// Discard everything received so far
    pub fn clear(&self) {
        self.lock().data.clear();
    }

    /// Number of bytes currently held
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.lock().data.is_empty()
    }

    /// Offset one past the end of the first occurrence of `token`
    pub fn find(&self, token: &str) -> Option<usize> {
        let mut window = self.lock();
        find_end(window.data.make_contiguous(), token.as_bytes())
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        let window = self.lock();
        window.data.iter().copied().collect()
    }

    /// Current contents as text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.snapshot()).into_owned()
    }

    /// Last line containing `token`, or an empty string
    pub fn tail_line_containing(&self, token: &str) -> String {
        let text = self.text();
        split_lines(&text)
            .into_iter()
            .rev()
            .find(|line| line.contains(token))
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// All lines from the first one containing `token` to the end, each
    /// terminated by a newline; empty when no line matches
    pub fn lines_from(&self, token: &str) -> String {
        let text = self.text();
        let mut found = false;
        let mut out = String::new();
        for line in split_lines(&text) {
            if !found && line.contains(token) {
                found = true;
            }
            if found {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    /// Contents from the start up to and including the first `token`, if present
    pub fn take_through(&self, token: &str) -> Option<String> {
        self.lock().through(token)
    }

    /// Block until `token` has been received or `timeout` elapses.
    ///
    /// Wakes on every append and at least once per `poll_interval`. Returns the
    /// buffer contents from the start up to and including the token.
    pub fn wait_for(
        &self,
        token: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<String, WaitError> {
        let deadline = Instant::now() + timeout;
        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let mut window = self.lock();
        let interrupts = window.interrupts;

        loop {
            if let Some(reply) = window.through(token) {
                return Ok(reply);
            }
            if window.interrupts != interrupts {
                return Err(WaitError::Cancelled {
                    token: token.to_string(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    token: token.to_string(),
                    timeout,
                });
            }
            let nap = poll_interval.min(deadline - now);
            window = self
                .arrived
                .wait_timeout(window, nap)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Make every `wait_for` currently blocked on this buffer return `Cancelled`
    pub fn interrupt(&self) {
        self.lock().interrupts += 1;
        self.arrived.notify_all();
    }
}

impl std::fmt::Debug for SessionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// Lines split on `\n`, dropping empty pieces after the last line break
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

fn find_end(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|start| start + needle.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_retention_keeps_newest_suffix() {
        let buffer = SessionBuffer::new(8);
        let mut all = Vec::new();
        for chunk in [&b"abc"[..], b"defgh", b"ij", b"klmnopqrstu", b"v"] {
            buffer.append(chunk);
            all.extend_from_slice(chunk);
            assert!(buffer.len() <= 8);
        }
        assert_eq!(buffer.snapshot(), all[all.len() - 8..].to_vec());
    }

    #[test]
    fn test_oversized_chunk_keeps_its_tail() {
        let buffer = SessionBuffer::new(4);
        buffer.append(b"xy");
        buffer.append(b"0123456789");
        assert_eq!(buffer.snapshot(), b"6789".to_vec());
    }

    #[test]
    fn test_find_returns_end_offset() {
        let buffer = SessionBuffer::new(64);
        buffer.append(b"CB411\r\n>");
        assert_eq!(buffer.find(">"), Some(8));
        assert_eq!(buffer.find("CB4"), Some(3));
        assert_eq!(buffer.find("Powering"), None);
    }

    #[test]
    fn test_find_across_wrapped_window() {
        let buffer = SessionBuffer::new(6);
        buffer.append(b"aaaaPa");
        buffer.append(b"rk>");
        // Window is now "aPark>" after wrapping
        assert_eq!(buffer.find("Park>"), Some(6));
    }

    #[test]
    fn test_clear() {
        let buffer = SessionBuffer::new(16);
        buffer.append(b"hello");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.find("hello"), None);
    }

    #[test]
    fn test_line_queries() {
        let buffer = SessionBuffer::new(256);
        buffer.append(b"WD 111100000\r\nND 111000000\r\nWD 111101000\r\n>");
        assert_eq!(buffer.tail_line_containing("WD"), "WD 111101000\r");
        assert_eq!(buffer.tail_line_containing("absent"), "");
        assert_eq!(buffer.lines_from("ND"), "ND 111000000\r\nWD 111101000\r\n>\n");
        assert_eq!(buffer.lines_from("absent"), "");
    }

    #[test]
    fn test_line_queries_on_newline_terminated_text() {
        let buffer = SessionBuffer::new(256);
        buffer.append(b"ND 1\r\nWD 2\r\n");
        assert_eq!(buffer.lines_from("ND"), "ND 1\r\nWD 2\r\n");
        assert_eq!(buffer.tail_line_containing(""), "WD 2\r");

        buffer.append(b"\n\n");
        assert_eq!(buffer.lines_from("WD"), "WD 2\r\n");
        buffer.clear();
        assert_eq!(buffer.lines_from(""), "");
    }

    #[test]
    fn test_take_through_leaves_buffer_intact() {
        let buffer = SessionBuffer::new(64);
        buffer.append(b"TS?\r\n>extra");
        assert_eq!(buffer.take_through(">"), Some("TS?\r\n>".to_string()));
        assert_eq!(buffer.take_through("Powering"), None);
        assert_eq!(buffer.len(), 11);
    }

    #[test]
    fn test_wait_for_sees_later_data() {
        let buffer = Arc::new(SessionBuffer::new(64));
        buffer.append(b"abc");

        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(80));
                buffer.append(b"DEF>ghi");
            })
        };

        let start = Instant::now();
        let reply = buffer
            .wait_for(">", Duration::from_secs(2), Duration::from_millis(50))
            .unwrap();
        assert_eq!(reply, "abcDEF>");
        assert!(start.elapsed() >= Duration::from_millis(80));
        writer.join().unwrap();
    }

    #[test]
    fn test_wait_for_timeout_bounds() {
        let buffer = SessionBuffer::new(64);
        buffer.append(b"no prompt here");

        let timeout = Duration::from_millis(150);
        let poll = Duration::from_millis(20);
        let start = Instant::now();
        let err = buffer.wait_for(">", timeout, poll).unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= timeout);
        // Generous slack for a loaded test machine
        assert!(elapsed < timeout + poll + Duration::from_millis(200));
    }

    #[test]
    fn test_interrupt_cancels_waiter() {
        let buffer = Arc::new(SessionBuffer::new(64));
        let waiter = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                buffer.wait_for(">", Duration::from_secs(10), Duration::from_millis(50))
            })
        };

        // Keep interrupting until the waiter has registered and returned
        for _ in 0..100 {
            thread::sleep(Duration::from_millis(20));
            buffer.interrupt();
            if waiter.is_finished() {
                break;
            }
        }

        let result = waiter.join().unwrap();
        assert_eq!(
            result,
            Err(WaitError::Cancelled {
                token: ">".to_string()
            })
        );
    }

    #[test]
    fn test_interrupt_does_not_poison_later_waits() {
        let buffer = SessionBuffer::new(64);
        buffer.interrupt();
        buffer.append(b">");
        assert_eq!(
            buffer
                .wait_for(">", Duration::from_millis(10), Duration::from_millis(5))
                .unwrap(),
            ">"
        );
    }
}
