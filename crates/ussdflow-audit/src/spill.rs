//! Spill files: disk-persisted batches written after a failed bulk insert.
//!
//! Each file holds one JSON-encoded batch under a timestamped name. Files
//! are deleted only after their contents are durably committed, so a
//! crash in between causes a harmless re-insert on the next scan.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use ussdflow_core::{Result, UssdError};

use crate::record::AuditRecord;

/// A lazily created directory of spilled audit batches.
#[derive(Debug, Clone)]
pub struct SpillDir {
    dir: PathBuf,
}

impl SpillDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Serialize a batch to a new timestamped file, creating the
    /// directory on first use. Returns the file path.
    pub fn write(&self, records: &[AuditRecord]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| UssdError::Storage(format!("system clock error: {}", e)))?
            .as_nanos();
        let mut path = self.dir.join(format!("bulk-{}.json", nanos));
        let mut seq = 0u32;
        while path.exists() {
            seq += 1;
            path = self.dir.join(format!("bulk-{}-{}.json", nanos, seq));
        }

        let file = fs::File::create(&path)?;
        serde_json::to_writer(file, records)?;

        debug!(file = %path.display(), rows = records.len(), "spill file written");
        Ok(path)
    }

    /// List spill files, oldest name first. Empty when the directory has
    /// not been created yet.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Deserialize one spill file back into a batch.
    pub fn read(&self, path: &Path) -> Result<Vec<AuditRecord>> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Delete a committed spill file.
    pub fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }
}
