//! Error taxonomy for a dump session
//!
//! Every failure mode is terminal for the run; there is no
//! retry-and-resume. Each kind maps to a distinct process exit code so
//! scripts wrapping the tool can tell a wedged device from a bad line.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DumpError {
    /// Serial port or output file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The first line received was not the expected ready banner.
    #[error("handshake mismatch: expected line containing {expected:?}, got {actual:?}")]
    HandshakeMismatch { expected: String, actual: String },

    /// The device never announced the start of the dump.
    #[error("device silent: no start acknowledgment within {waited:?}")]
    DeviceTimeout { waited: Duration },

    /// A data line could not be parsed.
    #[error("malformed data line at byte offset {offset}: {reason} (raw line: {line:?})")]
    Parse {
        line: String,
        offset: usize,
        reason: String,
    },
}

impl DumpError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            DumpError::Io(_) => 1,
            DumpError::HandshakeMismatch { .. } => 2,
            DumpError::DeviceTimeout { .. } => 3,
            DumpError::Parse { .. } => 4,
        }
    }
}
