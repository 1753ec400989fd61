//! Persisted record of already-published items.
//!
//! The record is an append-only list of strings: fact texts for the fact
//! variants, entry links for the news variant. It is read once at start,
//! grows by one entry per successful publish, and is rewritten atomically
//! (temp file + rename) so a crash never leaves a half-written file.

use crate::error::RecordError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// In-memory view of the record for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostRecord {
    entries: Vec<String>,
}

impl PostRecord {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Exact, case-sensitive membership.
    pub fn contains(&self, item: &str) -> bool {
        self.entries.iter().any(|e| e == item)
    }

    /// The most recent `window` entries, oldest first.
    pub fn recent(&self, window: usize) -> &[String] {
        let start = self.entries.len().saturating_sub(window);
        &self.entries[start..]
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }
}

/// Storage backend for the record.
///
/// `load` never fails: an absent or unreadable store is an empty record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self) -> PostRecord;

    async fn replace(&self, record: &PostRecord) -> Result<(), RecordError>;

    /// Re-read the store, add one entry, write it back.
    async fn append(&self, entry: &str) -> Result<PostRecord, RecordError> {
        let mut record = self.load().await;
        record.push(entry);
        self.replace(&record).await?;
        Ok(record)
    }
}

/// A pretty-printed JSON array of strings on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> RecordError {
        RecordError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    async fn load(&self) -> PostRecord {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No record file yet; starting empty");
                return PostRecord::default();
            }
            Err(e) => {
                warn!(error = %e, "Record file unreadable; treating as empty");
                return PostRecord::default();
            }
        };

        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(entries) => {
                info!(count = entries.len(), "Loaded post record");
                PostRecord::new(entries)
            }
            Err(e) => {
                warn!(error = %e, "Record file is not a JSON string array; treating as empty");
                PostRecord::default()
            }
        }
    }

    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), count = record.len()))]
    async fn replace(&self, record: &PostRecord) -> Result<(), RecordError> {
        let json = serde_json::to_string_pretty(record.entries())?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| self.io_err(e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await.map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;

        info!("Persisted post record");
        Ok(())
    }
}
