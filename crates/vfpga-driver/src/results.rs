//! Result log
//!
//! One line per batch: the elapsed nanoseconds in decimal, or `-1` for a
//! batch that was aborted by a bounded wait.

use crate::bench::LatencySample;
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Line-per-batch latency sink
#[derive(Debug)]
pub struct ResultLog<W: Write> {
    out: W,
    lines: usize,
}

impl ResultLog<BufWriter<File>> {
    /// Create (or truncate) the log file at `path`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        tracing::debug!("Writing results to {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ResultLog<W> {
    /// Log into any writer
    pub const fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    /// Append one sample
    ///
    /// # Errors
    ///
    /// Returns an I/O error from the writer.
    pub fn append(&mut self, sample: &LatencySample) -> Result<()> {
        match sample {
            LatencySample::Completed { elapsed_ns } => writeln!(self.out, "{elapsed_ns}")?,
            LatencySample::Aborted { .. } => writeln!(self.out, "-1")?,
        }
        self.lines += 1;
        Ok(())
    }

    /// Lines written so far
    pub const fn lines(&self) -> usize {
        self.lines
    }

    /// Flush buffered lines
    ///
    /// # Errors
    ///
    /// Returns an I/O error from the writer.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Flush and return the writer
    ///
    /// # Errors
    ///
    /// Returns an I/O error from the final flush.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_line_per_sample() {
        let mut log = ResultLog::new(Vec::new());
        log.append(&LatencySample::Completed { elapsed_ns: 1234 }).unwrap();
        log.append(&LatencySample::Aborted {
            reason: "stuck".into(),
        })
        .unwrap();
        log.append(&LatencySample::Completed { elapsed_ns: 0 }).unwrap();
        assert_eq!(log.lines(), 3);
        let text = String::from_utf8(log.finish().unwrap()).unwrap();
        assert_eq!(text, "1234\n-1\n0\n");
    }

    #[test]
    fn create_truncates_existing_file() {
        let path = std::env::temp_dir().join(format!("vfpga-results-{}.txt", std::process::id()));
        std::fs::write(&path, "stale\nstale\nstale\n").unwrap();

        let mut log = ResultLog::create(&path).unwrap();
        log.append(&LatencySample::Completed { elapsed_ns: 42 }).unwrap();
        log.finish().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "42\n");
        let _ = std::fs::remove_file(&path);
    }
}
