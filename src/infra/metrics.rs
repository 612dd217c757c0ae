// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends training and evaluation losses to a CSV file.
//
// Output file: {output_dir}/log_history.csv
//
// Example CSV output:
//   step,epoch,split,loss,learning_rate
//   50,0.400000,train,2.813400,0.00004667
//   100,0.800000,train,2.501200,0.00003333
//   125,1.000000,eval,2.611800,
//
// A train row is written every `logging_steps` optimizer steps
// and holds the mean micro-batch loss since the previous row.
// An eval row is written after each epoch when a validation
// split is configured.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

pub const LOG_HISTORY_FILE: &str = "log_history.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Eval,
}

impl Split {
    fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Eval  => "eval",
        }
    }
}

/// One row of the log history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Optimizer step the entry was recorded at
    pub step: usize,

    /// Fractional epoch, e.g. 1.5 = halfway through the second epoch
    pub epoch: f64,

    pub split: Split,

    pub loss: f64,

    /// Only present on train rows
    pub learning_rate: Option<f64>,
}

/// Logs entries to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join(LOG_HISTORY_FILE);
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "step,epoch,split,loss,learning_rate")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, entry: &LogEntry) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;

        let lr = entry
            .learning_rate
            .map(|lr| format!("{lr:.8}"))
            .unwrap_or_default();

        writeln!(
            f,
            "{},{:.6},{},{:.6},{}",
            entry.step,
            entry.epoch,
            entry.split.as_str(),
            entry.loss,
            lr,
        )?;

        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_rows() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();

        logger.log(&LogEntry {
            step: 50, epoch: 0.5, split: Split::Train, loss: 2.0, learning_rate: Some(5e-5),
        }).unwrap();
        logger.log(&LogEntry {
            step: 100, epoch: 1.0, split: Split::Eval, loss: 1.5, learning_rate: None,
        }).unwrap();

        let csv   = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "step,epoch,split,loss,learning_rate");
        assert_eq!(lines[1], "50,0.500000,train,2.000000,0.00005000");
        assert_eq!(lines[2], "100,1.000000,eval,1.500000,");
    }

    #[test]
    fn test_existing_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        MetricsLogger::new(dir.path()).unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&LogEntry {
            step: 1, epoch: 0.1, split: Split::Train, loss: 1.0, learning_rate: Some(1.0),
        }).unwrap();

        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }
}
