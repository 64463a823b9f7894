//! Scalar training summaries as JSON lines.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarSummary {
    pub step: u64,
    pub tag: String,
    pub value: f32,
}

/// Appends summaries to `<log_dir>/checkpoints/summary.jsonl`.
pub struct SummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SummaryWriter {
    pub fn new(log_dir: &Path) -> Result<Self> {
        let dir = log_dir.join("checkpoints");
        fs::create_dir_all(&dir)?;
        let path = dir.join("summary.jsonl");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(SummaryWriter {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, step: u64, tag: &str, value: f32) -> Result<()> {
        let record = ScalarSummary {
            step,
            tag: tag.to_string(),
            value,
        };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Read back every record of a summary file.
pub fn read_summaries(path: &Path) -> Result<Vec<ScalarSummary>> {
    let text = fs::read_to_string(path)?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| Ok(serde_json::from_str(l)?))
        .collect()
}
