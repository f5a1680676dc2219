//! Event log writer

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::event::Event;
use crate::{HooksinkError, Result};

/// Appends events to a JSONL log, one record per line.
///
/// Each append is flushed so a crashed process loses at most the record
/// being written. Safe to share across concurrent ingestion tasks.
pub struct EventLogWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLogWriter {
    /// Open (or create) a log file for appending
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append one event as a single JSON line
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    ///
    /// # Panics
    ///
    /// Panics if the log mutex is poisoned (a writer panicked mid-append)
    pub fn append(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_vec(event)
            .map_err(|e| HooksinkError::Other(format!("Failed to serialize event: {e}")))?;
        line.push(b'\n');

        let mut file = self.file.lock().expect("event log lock poisoned");
        file.write_all(&line)?;
        file.flush()?;

        Ok(())
    }

    /// Path of the underlying log file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
