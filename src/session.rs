//! The dump session state machine
//!
//! A session owns the serial connection for its whole lifetime and walks
//! four linear phases: wait for the ready banner, send the start trigger,
//! wait for the "Starting" acknowledgment, then stream data lines into
//! the output file until the DONE sentinel. No phase branches back.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, warn};

use crate::device::DumpProfile;
use crate::error::DumpError;
use crate::protocol::{self, LineKind};
use crate::serial::SerialConnection;
use crate::transcript::Transcript;

/// Line-oriented I/O as the session sees it. Implemented by the real
/// serial connection; tests substitute a scripted mock.
pub trait LineIo {
    /// Read one line, `Ok(None)` on a timeout with nothing buffered.
    fn read_line(&mut self) -> Result<Option<String>>;
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

impl LineIo for SerialConnection {
    fn read_line(&mut self) -> Result<Option<String>> {
        SerialConnection::read_line(self)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        SerialConnection::write(self, data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        SerialConnection::flush(self)
    }
}

/// Session behavior knobs beyond the device profile.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Continue past a mismatched ready banner instead of aborting.
    pub lenient: bool,
    /// Wall-clock budget for the start acknowledgment.
    pub max_wait: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            lenient: false,
            max_wait: Duration::from_secs(30),
        }
    }
}

/// Result of a completed dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSummary {
    /// Number of words written.
    pub words: u64,
    /// Number of bytes written (`words` times the profile word size).
    pub bytes: u64,
    /// Wall-clock duration of the whole session.
    pub elapsed: Duration,
}

pub struct DumpSession<T: LineIo> {
    io: T,
    profile: DumpProfile,
    options: SessionOptions,
    transcript: Option<Transcript>,
}

impl<T: LineIo> DumpSession<T> {
    pub fn new(io: T, profile: DumpProfile, options: SessionOptions) -> Self {
        Self {
            io,
            profile,
            options,
            transcript: None,
        }
    }

    /// Record every received raw line to a transcript file.
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Run the full dump, writing decoded words to `output`.
    ///
    /// The connection is released when the session is dropped; the
    /// output file handle is scoped to the streaming phase.
    pub fn run(mut self, output: &Path) -> Result<DumpSummary> {
        let started = Instant::now();

        self.await_ready()?;
        self.trigger()?;
        self.await_starting()?;
        let words = self.stream_data(output)?;

        Ok(DumpSummary {
            words,
            bytes: words * u64::from(self.profile.word_size),
            elapsed: started.elapsed(),
        })
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let line = self.io.read_line()?;
        if let Some(ref line) = line {
            debug!("rx: {:?}", line);
            if let Some(ref mut transcript) = self.transcript {
                transcript.record(line)?;
            }
        }
        Ok(line)
    }

    /// Phase 1: read one line and check it against the ready banner.
    fn await_ready(&mut self) -> Result<()> {
        let line = self.read_line()?.unwrap_or_default();

        if !line.contains(&self.profile.ready_banner) {
            if self.options.lenient {
                warn!(
                    "expected banner containing {:?}, got {:?}; continuing (lenient mode)",
                    self.profile.ready_banner, line
                );
            } else {
                return Err(DumpError::HandshakeMismatch {
                    expected: self.profile.ready_banner.clone(),
                    actual: line,
                }
                .into());
            }
        } else {
            println!("{} Device ready", "[OK]".green().bold());
        }

        Ok(())
    }

    /// Phase 2: send the trigger byte, then a blind wait while the
    /// device brings up the target. No acknowledgment is read here.
    fn trigger(&mut self) -> Result<()> {
        self.io.write_all(&[self.profile.trigger_byte])?;
        self.io.flush()?;

        let delay = self.profile.trigger_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        Ok(())
    }

    /// Phase 3: discard lines until one contains the starting pattern,
    /// bounded by the wall-clock budget.
    fn await_starting(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.options.max_wait;

        loop {
            if let Some(line) = self.read_line()? {
                if line.contains(&self.profile.starting_pattern) {
                    println!("{} Dump started", "[OK]".green().bold());
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(DumpError::DeviceTimeout {
                    waited: self.options.max_wait,
                }
                .into());
            }
        }
    }

    /// Phase 4: stream data lines into the output file until the
    /// sentinel, returning the number of words written. A malformed
    /// line aborts the dump and removes the partial file.
    fn stream_data(&mut self, output: &Path) -> Result<u64> {
        let file = File::create(output)
            .with_context(|| format!("Failed to create output file: {}", output.display()))?;
        let mut writer = BufWriter::new(file);
        let mut words: u64 = 0;

        loop {
            let line = match self.read_line()? {
                Some(line) => line,
                // Timeout with nothing buffered: a transient gap, keep going.
                None => continue,
            };

            match protocol::classify(&line, &self.profile.done_sentinel) {
                LineKind::Empty => continue,
                LineKind::Done => break,
                LineKind::Data => match protocol::parse_data_line(&line) {
                    Ok(word) => {
                        writer.write_all(&word.encode(self.profile.word_size))?;
                        words += 1;
                        println!("  {} {:08x}", format!("{}:", word.label).dimmed(), word.value);
                    }
                    Err(err) => {
                        drop(writer);
                        if let Err(remove_err) = std::fs::remove_file(output) {
                            warn!(
                                "failed to remove partial output {}: {}",
                                output.display(),
                                remove_err
                            );
                        }
                        return Err(err.into());
                    }
                },
            }
        }

        writer.flush()?;
        println!("{} Received DONE", "[OK]".green().bold());

        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted line source. Each entry is one `read_line` result; an
    /// exhausted script fails the read so a buggy loop cannot spin,
    /// unless `silent_when_exhausted` makes it emulate a dead device
    /// (timeout-paced empty reads).
    struct MockIo {
        lines: VecDeque<Option<String>>,
        written: Vec<u8>,
        flushed: bool,
        silent_when_exhausted: bool,
    }

    impl MockIo {
        fn new(lines: &[Option<&str>]) -> Self {
            Self {
                lines: lines
                    .iter()
                    .map(|l| l.map(|s| s.to_string()))
                    .collect(),
                written: Vec::new(),
                flushed: false,
                silent_when_exhausted: false,
            }
        }

        fn from_lines(lines: &[&str]) -> Self {
            let script: Vec<Option<&str>> = lines.iter().map(|l| Some(*l)).collect();
            Self::new(&script)
        }
    }

    impl LineIo for MockIo {
        fn read_line(&mut self) -> Result<Option<String>> {
            match self.lines.pop_front() {
                Some(line) => Ok(line),
                None if self.silent_when_exhausted => {
                    std::thread::sleep(Duration::from_millis(1));
                    Ok(None)
                }
                None => Err(anyhow::anyhow!("mock script exhausted")),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    fn test_profile() -> DumpProfile {
        DumpProfile {
            trigger_delay_ms: 0,
            ..DumpProfile::default()
        }
    }

    fn fast_options() -> SessionOptions {
        SessionOptions {
            lenient: false,
            max_wait: Duration::from_millis(50),
        }
    }

    fn run_session(io: MockIo, options: SessionOptions, output: &Path) -> Result<DumpSummary> {
        DumpSession::new(io, test_profile(), options).run(output)
    }

    #[test]
    fn test_full_dump() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let io = MockIo::from_lines(&[
            "Send anything to start...",
            "Starting",
            "0:FF",
            "4:100",
            "DONE",
        ]);

        let summary = run_session(io, fast_options(), &output).unwrap();
        assert_eq!(summary.words, 2);
        assert_eq!(summary.bytes, 8);
        // No sleeps in the scripted session, so this stays well under
        // the mock's read budget.
        assert!(summary.elapsed < Duration::from_secs(5));

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(bytes, [0xFF, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_word_size_honored() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let profile = DumpProfile {
            word_size: 2,
            ..test_profile()
        };
        let io = MockIo::from_lines(&[
            "Send anything to start...",
            "Starting",
            "0:1234",
            "2:5678",
            "DONE",
        ]);

        let summary = DumpSession::new(io, profile, fast_options())
            .run(&output)
            .unwrap();
        assert_eq!(summary.words, 2);
        assert_eq!(summary.bytes, 4);

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(bytes, [0x34, 0x12, 0x78, 0x56]);
    }

    #[test]
    fn test_trigger_byte_sent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let mut session = DumpSession::new(
            MockIo::from_lines(&["Send anything to start...", "Starting", "DONE"]),
            test_profile(),
            fast_options(),
        );
        session.await_ready().unwrap();
        session.trigger().unwrap();
        assert_eq!(session.io.written, b"S");
        assert!(session.io.flushed);

        session.await_starting().unwrap();
        let words = session.stream_data(&output).unwrap();
        assert_eq!(words, 0);
        assert!(output.exists());
    }

    #[test]
    fn test_banner_mismatch_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let io = MockIo::from_lines(&["garbage"]);
        let err = run_session(io, fast_options(), &output).unwrap_err();

        match err.downcast_ref::<DumpError>() {
            Some(DumpError::HandshakeMismatch { expected, actual }) => {
                assert_eq!(expected, "Send anything to start...");
                assert_eq!(actual, "garbage");
            }
            other => panic!("expected handshake mismatch, got {other:?}"),
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_banner_mismatch_lenient_continues() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let io = MockIo::from_lines(&["garbage", "Starting", "0:1", "DONE"]);
        let options = SessionOptions {
            lenient: true,
            ..fast_options()
        };

        let summary = run_session(io, options, &output).unwrap();
        assert_eq!(summary.words, 1);
    }

    #[test]
    fn test_discards_noise_before_starting() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let io = MockIo::from_lines(&[
            "Send anything to start...",
            "Send anything to start...",
            "noise",
            "Starting",
            "DONE",
        ]);

        let summary = run_session(io, fast_options(), &output).unwrap();
        assert_eq!(summary.words, 0);
    }

    #[test]
    fn test_silent_device_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        // Banner arrives, then nothing but read timeouts.
        let mut io = MockIo::from_lines(&["Send anything to start..."]);
        io.silent_when_exhausted = true;

        let err = run_session(io, fast_options(), &output).unwrap_err();
        match err.downcast_ref::<DumpError>() {
            Some(DumpError::DeviceTimeout { waited }) => {
                assert_eq!(*waited, Duration::from_millis(50));
            }
            other => panic!("expected device timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_lines_skipped_during_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let io = MockIo::new(&[
            Some("Send anything to start..."),
            Some("Starting"),
            Some("0:FF"),
            None,
            Some(""),
            Some("4:1"),
            Some("DONE"),
        ]);

        let summary = run_session(io, fast_options(), &output).unwrap();
        assert_eq!(summary.words, 2);

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    fn test_done_line_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let io = MockIo::from_lines(&[
            "Send anything to start...",
            "Starting",
            "dump DONE now",
        ]);

        let summary = run_session(io, fast_options(), &output).unwrap();
        assert_eq!(summary.words, 0);
        assert_eq!(std::fs::read(&output).unwrap().len(), 0);
    }

    #[test]
    fn test_malformed_line_aborts_and_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let io = MockIo::from_lines(&[
            "Send anything to start...",
            "Starting",
            "0:FF",
            "10:ZZZ",
            "DONE",
        ]);

        let err = run_session(io, fast_options(), &output).unwrap_err();
        match err.downcast_ref::<DumpError>() {
            Some(DumpError::Parse { line, .. }) => assert_eq!(line, "10:ZZZ"),
            other => panic!("expected parse error, got {other:?}"),
        }

        // No partial file left behind.
        assert!(!output.exists());
    }

    #[test]
    fn test_words_written_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");

        let io = MockIo::from_lines(&[
            "Send anything to start...",
            "Starting",
            "08000000: 11223344",
            "08000004: 55667788",
            "08000008: 0x99aabbcc",
            "DONE",
        ]);

        let summary = run_session(io, fast_options(), &output).unwrap();
        assert_eq!(summary.words, 3);

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(
            bytes,
            [0x44, 0x33, 0x22, 0x11, 0x88, 0x77, 0x66, 0x55, 0xcc, 0xbb, 0xaa, 0x99]
        );
    }

    #[test]
    fn test_output_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dump.bin");
        std::fs::write(&output, vec![0xAA; 64]).unwrap();

        let io = MockIo::from_lines(&[
            "Send anything to start...",
            "Starting",
            "0:1",
            "DONE",
        ]);

        run_session(io, fast_options(), &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), [0x01, 0x00, 0x00, 0x00]);
    }
}
