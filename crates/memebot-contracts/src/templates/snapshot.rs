use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BotError;

use super::record::TemplateRecord;

/// Whole-file JSON persistence for the template list.
///
/// The snapshot is the authoritative state; the in-memory registry is a
/// cache rebuilt from it at startup. Every save rewrites the full array,
/// going through a sibling temp file plus rename so a crash mid-write never
/// leaves a truncated snapshot behind.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Seed an empty snapshot when none exists yet. Idempotent.
    pub fn ensure_initialized(&self) -> Result<(), BotError> {
        if self.exists() {
            return Ok(());
        }
        self.save(&[])
    }

    pub fn load(&self) -> Result<Vec<TemplateRecord>, BotError> {
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, records: &[TemplateRecord]) -> Result<(), BotError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
