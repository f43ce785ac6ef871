//! Append-only JSONL log of move decisions, rotated by line count.
//!
//! Files are named `moves_log.jsonl`, `moves_log_1.jsonl`, `moves_log_2.jsonl`, ...

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::candidate::Candidate;
use crate::error::ImitatorError;

const LOG_FILE_BASE: &str = "moves_log";
const LOG_FILE_EXT: &str = "jsonl";

#[derive(Debug, Clone, Serialize)]
pub struct DecisionConfig {
    pub deterministic: bool,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PickedMove {
    pub uci: String,
    pub tags: Vec<String>,
    pub sf_eval: f64,
    pub style_score: Option<f64>,
}

/// One line of the decision log.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub ts: String,
    pub fen: String,
    pub profile_name: String,
    pub config: DecisionConfig,
    pub make_error: bool,
    pub picked: PickedMove,
    pub candidates: Vec<Candidate>,
}

/// Destination for decision records.
pub trait DecisionSink: Send + Sync {
    fn append(&self, record: &DecisionRecord) -> Result<(), ImitatorError>;
}

/// Discards every record.
pub struct NullDecisionSink;

impl DecisionSink for NullDecisionSink {
    fn append(&self, _record: &DecisionRecord) -> Result<(), ImitatorError> {
        Ok(())
    }
}

struct LogState {
    index: u32,
    lines: usize,
}

/// Rotating decision log rooted in one directory.
pub struct RotatingDecisionLog {
    dir: PathBuf,
    max_lines: usize,
    state: Mutex<LogState>,
}

impl RotatingDecisionLog {
    /// Open the log directory, resuming the newest existing file.
    pub fn open(dir: impl Into<PathBuf>, max_lines: usize) -> Result<Self, ImitatorError> {
        let dir = dir.into();
        let max_lines = max_lines.max(1);
        fs::create_dir_all(&dir)?;

        let state = match newest_log_index(&dir)? {
            None => LogState { index: 0, lines: 0 },
            Some(index) => {
                let lines = count_lines(&log_file_path(&dir, index))?;
                if lines >= max_lines {
                    LogState {
                        index: index + 1,
                        lines: 0,
                    }
                } else {
                    LogState { index, lines }
                }
            }
        };
        info!(
            dir = %dir.display(),
            file_index = state.index,
            lines = state.lines,
            "Decision log ready"
        );

        Ok(Self {
            dir,
            max_lines,
            state: Mutex::new(state),
        })
    }

    /// Path of the file the next record will be written to.
    pub fn current_path(&self) -> PathBuf {
        let state = self.state.lock();
        let index = if state.lines >= self.max_lines {
            state.index + 1
        } else {
            state.index
        };
        log_file_path(&self.dir, index)
    }
}

impl DecisionSink for RotatingDecisionLog {
    fn append(&self, record: &DecisionRecord) -> Result<(), ImitatorError> {
        let line = serde_json::to_string(record)?;

        let mut state = self.state.lock();
        if state.lines >= self.max_lines {
            state.index += 1;
            state.lines = 0;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path(&self.dir, state.index))?;
        writeln!(file, "{line}")?;
        state.lines += 1;
        Ok(())
    }
}

fn log_file_path(dir: &Path, index: u32) -> PathBuf {
    if index == 0 {
        dir.join(format!("{LOG_FILE_BASE}.{LOG_FILE_EXT}"))
    } else {
        dir.join(format!("{LOG_FILE_BASE}_{index}.{LOG_FILE_EXT}"))
    }
}

/// Rotation index encoded in a log file name, if it is one of ours.
fn log_file_index(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_suffix(&format!(".{LOG_FILE_EXT}"))?;
    if stem == LOG_FILE_BASE {
        return Some(0);
    }
    let suffix = stem.strip_prefix(&format!("{LOG_FILE_BASE}_"))?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

fn newest_log_index(dir: &Path) -> Result<Option<u32>, ImitatorError> {
    let mut newest = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(index) = entry.file_name().to_str().and_then(log_file_index) {
            newest = newest.max(Some(index));
        }
    }
    Ok(newest)
}

fn count_lines(path: &Path) -> Result<usize, ImitatorError> {
    if !path.exists() {
        return Ok(0);
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(reader.lines().count())
}
