// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Reads a JSON-lines file into memory, one Record per line.
//
// File format:
//   {"instruction": "...", "input": "...", "output": "..."}
//   {"instruction": "...", "input": "",    "output": "..."}
//
// Blank lines are skipped. Any other line that fails to parse
// aborts the load — there is no partial recovery, the error
// names the file and the 1-based line number.
//
// Reference: serde_json documentation
//            Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::domain::record::Record;
use crate::domain::traits::RecordSource;

/// Loads instruction records from a JSON-lines file.
/// Implements the RecordSource trait from Layer 3.
pub struct JsonlLoader {
    path: PathBuf,
}

impl JsonlLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl RecordSource for JsonlLoader {
    fn load_all(&self) -> Result<Vec<Record>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open dataset '{}'", self.path.display()))?;

        let mut records = Vec::new();

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .with_context(|| format!("Cannot read '{}'", self.path.display()))?;

            if line.trim().is_empty() {
                continue;
            }

            let record: Record = serde_json::from_str(&line).with_context(|| {
                format!("Malformed record at {}:{}", self.path.display(), idx + 1)
            })?;
            records.push(record);
        }

        tracing::info!(
            "Loaded {} records from '{}'",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }
}
