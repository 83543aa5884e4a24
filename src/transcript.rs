//! Raw-line transcript of a dump session
//!
//! Every line received over the serial link can be recorded with a
//! timestamp for post-mortem of flaky dumps. Observability only; the
//! transcript is never part of the output data contract.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;

pub struct Transcript {
    writer: BufWriter<File>,
}

impl Transcript {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create transcript file: {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Record one received line with a local timestamp.
    pub fn record(&mut self, line: &str) -> Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(self.writer, "[{}] {}", timestamp, line)?;
        self.writer.flush()?;
        Ok(())
    }
}
