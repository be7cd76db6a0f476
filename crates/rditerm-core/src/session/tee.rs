//! Tee sink
//!
//! Pass-through copy of received text, typically a deployment log file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only destination flushed after every write
pub struct TeeSink {
    writer: Box<dyn Write + Send>,
    path: Option<PathBuf>,
}

impl TeeSink {
    /// Open `path` for appending, creating parent directories as needed
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::info!(path = %path.display(), "teeing received data");
        Ok(Self {
            writer: Box::new(file),
            path: Some(path.to_path_buf()),
        })
    }

    /// Tee into an arbitrary writer
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            path: None,
        }
    }

    /// File backing this sink, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write a chunk and flush it
    pub fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    /// Flush and drop the sink, logging instead of failing
    pub fn close(mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(path = ?self.path, "unable to close tee sink: {}", e);
        }
    }
}

impl std::fmt::Debug for TeeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeSink").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_makes_parent_dirs_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("cruise").join("rdi000.log");

        let mut sink = TeeSink::create(&path).unwrap();
        sink.write_chunk(b"first\r\n").unwrap();
        sink.close();

        let mut sink = TeeSink::create(&path).unwrap();
        sink.write_chunk(b">").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\r\n>");
        assert_eq!(sink.path(), Some(path.as_path()));
    }
}
