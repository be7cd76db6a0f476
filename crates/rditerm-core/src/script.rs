//! Command scripts
//!
//! A command file holds one instrument directive per line. `#`, `;` and `$`
//! each truncate the rest of a line, blank lines are ignored, and the `CK`/`CS`
//! terminators are dropped because the setup driver issues them itself.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::session::{DeviceSession, SessionError};

/// Characters that start a trailing comment, applied in this order
const COMMENT_MARKERS: [char; 3] = ['#', ';', '$'];

/// Directives reserved for the setup driver
pub const RESERVED_DIRECTIVES: [&str; 2] = ["CK", "CS"];

/// Prompt the instrument prints after every directive
pub const PROMPT: &str = ">";

/// A script directive failed; the rest of the script was not sent
#[derive(Error, Debug)]
#[error("Directive {index} ({directive:?}) failed: {source}")]
pub struct ScriptError {
    /// Zero-based position of the failing directive
    pub index: usize,
    /// The failing directive
    pub directive: String,
    /// Underlying timeout or write failure
    #[source]
    pub source: SessionError,
}

/// An immutable, parsed sequence of directives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandScript {
    directives: Vec<String>,
}

impl CommandScript {
    /// Parse command file text
    pub fn parse(source: &str) -> Self {
        let directives = source
            .lines()
            .map(strip_comments)
            .filter(|line| !line.is_empty())
            .filter(|line| !RESERVED_DIRECTIVES.contains(line))
            .map(str::to_string)
            .collect();
        Self { directives }
    }

    /// Read and parse a command file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Build a script from directives already in hand (no comment stripping)
    pub fn from_directives<I, S>(directives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            directives: directives
                .into_iter()
                .map(Into::into)
                .map(|d: String| d.trim().to_string())
                .collect(),
        }
    }

    /// Parsed directives in order
    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    /// Number of directives
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    /// Whether the script has no directives
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Send each directive and wait for the prompt after it.
    ///
    /// The buffer is cleared before each directive so every reply is fresh.
    /// Stops at the first timeout or write failure. Returns the reply captured
    /// for each directive.
    pub fn run(
        &self,
        session: &mut DeviceSession,
        step_timeout: Duration,
    ) -> Result<Vec<String>, ScriptError> {
        let mut replies = Vec::with_capacity(self.directives.len());

        for (index, directive) in self.directives.iter().enumerate() {
            let fail = |source: SessionError| ScriptError {
                index,
                directive: directive.clone(),
                source,
            };

            session.clear_buffer();
            session.send_line(directive).map_err(&fail)?;
            let reply = session
                .wait_for(PROMPT, step_timeout)
                .map_err(|e| fail(e.into()))?;
            replies.push(reply);
        }

        tracing::debug!(directives = self.directives.len(), "script complete");
        Ok(replies)
    }
}

/// Truncate at each comment marker in turn and trim
fn strip_comments(line: &str) -> &str {
    COMMENT_MARKERS
        .iter()
        .fold(line, |rest, marker| match rest.find(*marker) {
            Some(pos) => &rest[..pos],
            None => rest,
        })
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_comments("PS0 # power self-test"), "PS0");
        assert_eq!(strip_comments("WP00001 ; pings $ note"), "WP00001");
        assert_eq!(strip_comments("TE00:00:01.00$"), "TE00:00:01.00");
        assert_eq!(strip_comments("EX11101;x#y"), "EX11101");
        assert_eq!(strip_comments("   "), "");
        assert_eq!(strip_comments("# whole line"), "");
    }

    #[test]
    fn test_parse_drops_blanks_and_terminators() {
        let script = CommandScript::parse(
            "CR1   # restore factory defaults\n\
             \n\
             \x20\x20\n\
             WN025\n\
             CK ; save\n\
             CS\n\
             ; only a comment\n\
             TP000100\r\n",
        );
        assert_eq!(script.directives(), &["CR1", "WN025", "TP000100"]);
    }

    #[test]
    fn test_reserved_match_is_exact() {
        let script = CommandScript::parse("CK\nCKX\nCS\nCSB\n");
        assert_eq!(script.directives(), &["CKX", "CSB"]);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ladcp.cmd");
        fs::write(&path, "PS0 # power self-test\nPT200\n").unwrap();
        let script = CommandScript::from_file(&path).unwrap();
        assert_eq!(script.len(), 2);
        assert!(CommandScript::from_file(&dir.path().join("missing.cmd")).is_err());
    }

    #[test]
    fn test_from_directives_trims() {
        let script = CommandScript::from_directives(["  RA ", "RS"]);
        assert_eq!(script.directives(), &["RA", "RS"]);
    }
}
