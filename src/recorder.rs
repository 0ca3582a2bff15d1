//! Session log sinks.
//!
//! The session loop hands one [`LogRecord`] per cognitive packet to whatever
//! [`SessionRecorder`] is active.  [`CsvRecorder`] is the file-backed one the
//! CLI uses: `Time,Attention,Meditation,Raw`, one row per second of data.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use log::info;

use crate::protocol::{LOG_FILE_PREFIX, LOG_HEADER};

/// One row of the session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub attention: u8,
    pub meditation: u8,
    /// Most recent raw sample at the time of the cognitive packet.
    pub raw: i32,
}

/// A destination for per-second session records.
///
/// Any error from `append` ends logging for the session; the packet
/// pipeline itself keeps running.
pub trait SessionRecorder: Send {
    fn append(&mut self, record: &LogRecord) -> Result<()>;

    /// Flush and release the underlying resource.  Called once when logging
    /// stops; the recorder is dropped afterwards.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// CSV file recorder.  The header row is written on creation.
pub struct CsvRecorder {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvRecorder {
    /// Create (or truncate) `path` and write the header row.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = csv::WriterBuilder::new()
            .from_path(&path)
            .with_context(|| format!("creating session log {}", path.display()))?;
        writer.write_record(LOG_HEADER)?;
        writer.flush()?;
        info!("Session log opened: {}", path.display());
        Ok(Self { path, writer })
    }

    /// Create `BrainSession_<unix-millis>.csv` inside `dir`.
    pub fn create_in(dir: impl AsRef<Path>) -> Result<Self> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self::create(dir.as_ref().join(format!("{LOG_FILE_PREFIX}{millis}.csv")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionRecorder for CsvRecorder {
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        let time = record
            .time
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();
        self.writer.write_record([
            time,
            record.attention.to_string(),
            record.meditation.to_string(),
            record.raw.to_string(),
        ])?;
        // Rows arrive about once a second; flush so a crash loses at most one.
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        info!("Session log closed: {}", self.path.display());
        Ok(())
    }
}
