use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Immutable record kept after a successful archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub recording_id: String,
    pub archived_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Collaborator that persists archive history. Only successful transfers
/// are recorded; cancelled and failed tasks never reach it.
pub trait ArchiveHistory: Send + Sync {
    fn record(&self, entry: HistoryEntry) -> Result<()>;
}

/// JSON-lines file store, one entry per line.
pub struct FileHistory {
    path: PathBuf,
    write: Mutex<()>,
}

impl FileHistory {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            write: Mutex::new(()),
        }
    }

    pub fn entries(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line?;

            if !line.trim().is_empty() {
                entries.push(serde_json::from_str(&line)?);
            }
        }

        Ok(entries)
    }
}

impl ArchiveHistory for FileHistory {
    fn record(&self, entry: HistoryEntry) -> Result<()> {
        let _guard = self.write.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("couldn't open history file {}", self.path.display()))?;

        serde_json::to_writer(&mut file, &entry)?;
        writeln!(file)?;
        Ok(())
    }
}

/// Sink for callers that keep no history.
pub struct NoHistory;

impl ArchiveHistory for NoHistory {
    fn record(&self, _entry: HistoryEntry) -> Result<()> {
        Ok(())
    }
}
