//! Wire protocol for the firmware dump handshake
//!
//! The device speaks a plain text line protocol over the serial link:
//! it prints a ready banner, waits for any byte from the host, announces
//! "Starting", then emits one `ADDRESS:HEXVALUE` line per 32-bit word
//! until the `DONE` sentinel. The firmware defines this contract; the
//! host preserves it exactly.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::DumpError;

/// Banner the device prints while waiting for the start trigger.
pub const READY_BANNER: &str = "Send anything to start...";

/// Substring the device prints once the dump begins.
pub const STARTING_PATTERN: &str = "Starting";

/// Substring marking the end of transmission.
pub const DONE_SENTINEL: &str = "DONE";

/// Byte the host sends to trigger the dump. Any byte works for the
/// original firmware; `S` matches the reference script.
pub const START_TRIGGER: u8 = b'S';

/// Classification of a line received during the streaming phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Zero-length read, a transient timeout. Skipped.
    Empty,
    /// Line containing the end-of-dump sentinel.
    Done,
    /// Anything else: a `label:hexvalue` data line.
    Data,
}

/// Classify a streaming-phase line against the given sentinel.
pub fn classify(line: &str, sentinel: &str) -> LineKind {
    if line.is_empty() {
        LineKind::Empty
    } else if line.contains(sentinel) {
        LineKind::Done
    } else {
        LineKind::Data
    }
}

/// One decoded memory word from a data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataWord {
    /// The address label, kept verbatim for progress display. Opaque.
    pub label: String,
    /// The decoded 32-bit value.
    pub value: u32,
}

impl DataWord {
    /// Full 4-byte little-endian encoding.
    pub fn to_le_bytes(&self) -> [u8; 4] {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, self.value);
        buf
    }

    /// Little-endian encoding truncated to the profile's word size
    /// (1-4 bytes), as written to the output file.
    pub fn encode(&self, word_size: u8) -> Vec<u8> {
        self.to_le_bytes()[..word_size as usize].to_vec()
    }
}

/// Parse a `label:hexvalue` data line.
///
/// Splits on the first `:`, trims whitespace around the value, and
/// accepts an optional `0x` prefix. A missing separator or invalid hex
/// digits produce a [`DumpError::Parse`] naming the raw line and the
/// byte offset of the offending token.
pub fn parse_data_line(line: &str) -> Result<DataWord, DumpError> {
    let sep = line.find(':').ok_or_else(|| DumpError::Parse {
        line: line.to_string(),
        offset: 0,
        reason: "missing ':' separator".to_string(),
    })?;

    let label = line[..sep].to_string();
    let raw_value = &line[sep + 1..];
    let trimmed = raw_value.trim();

    // Byte offset of the value token within the raw line, for error reports.
    let value_offset = sep + 1 + (raw_value.len() - raw_value.trim_start().len());

    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let value = u32::from_str_radix(digits, 16).map_err(|_| DumpError::Parse {
        line: line.to_string(),
        offset: value_offset,
        reason: format!("invalid hex value {:?}", trimmed),
    })?;

    Ok(DataWord { label, value })
}
