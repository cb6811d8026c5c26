//! Persistent schedule registry.

use super::config::ScheduleConfig;
use crate::error::{Result, SnapshotError};
use crate::snapshots::sync_dir;
use crate::types::FiscalBookId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for the schedule file.
const SCHEDULE_MAGIC: &[u8; 4] = b"FSC\0";

/// Current schedule file format version.
const SCHEDULE_VERSION: u8 = 1;

/// Schedule table stored on disk.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ScheduleTable {
    schedules: HashMap<FiscalBookId, ScheduleConfig>,
}

/// Schedule configs by fiscal book, saved on every change.
pub struct ScheduleRegistry {
    /// Path to the schedule file.
    path: PathBuf,

    table: RwLock<ScheduleTable>,
}

impl ScheduleRegistry {
    /// Load the registry, starting empty when the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            Self::read_file(&path)?
        } else {
            ScheduleTable::default()
        };

        debug!(schedules = table.schedules.len(), "schedule registry loaded");

        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    pub fn get(&self, book: &FiscalBookId) -> Option<ScheduleConfig> {
        self.table.read().schedules.get(book).cloned()
    }

    /// Insert or replace a book's schedule and save.
    ///
    /// The in-memory table is left untouched when saving fails.
    pub fn upsert(&self, book: &FiscalBookId, config: ScheduleConfig) -> Result<()> {
        let mut table = self.table.write();
        let mut updated = table.clone();
        updated.schedules.insert(book.clone(), config);

        self.write_file(&updated)?;
        *table = updated;
        Ok(())
    }

    /// Enabled schedules, ordered by fiscal book id.
    pub fn enabled(&self) -> Vec<(FiscalBookId, ScheduleConfig)> {
        let mut schedules: Vec<_> = self
            .table
            .read()
            .schedules
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(book, config)| (book.clone(), config.clone()))
            .collect();
        schedules.sort_by(|a, b| a.0.cmp(&b.0));
        schedules
    }

    pub fn len(&self) -> usize {
        self.table.read().schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- File Format ---

    fn write_file(&self, table: &ScheduleTable) -> Result<()> {
        let encoded = rmp_serde::to_vec_named(table)?;
        let temp_path = self.path.with_extension("tmp");

        {
            let mut file = File::create(&temp_path)?;
            file.write_all(SCHEDULE_MAGIC)?;
            file.write_all(&[SCHEDULE_VERSION])?;
            file.write_all(&(encoded.len() as u64).to_le_bytes())?;
            file.write_all(&encoded)?;
            file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            sync_dir(dir)?;
        }
        Ok(())
    }

    fn read_file(path: &Path) -> Result<ScheduleTable> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SCHEDULE_MAGIC {
            return Err(SnapshotError::InvalidFormat(
                "Invalid schedule file magic".into(),
            ));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SCHEDULE_VERSION {
            return Err(SnapshotError::InvalidFormat(format!(
                "Unsupported schedule file version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&encoded);
        if expected != got {
            return Err(SnapshotError::ChecksumMismatch { expected, got });
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upsert_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schedules.bin");
        let book = FiscalBookId::new("fb-1");

        {
            let registry = ScheduleRegistry::load(&path).unwrap();
            assert!(registry.is_empty());
            registry
                .upsert(&book, ScheduleConfig::monthly(31, 2))
                .unwrap();
            registry
                .upsert(&book, ScheduleConfig::weekly(3, 4))
                .unwrap();
        }

        let registry = ScheduleRegistry::load(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&book), Some(ScheduleConfig::weekly(3, 4)));
    }

    #[test]
    fn test_enabled_excludes_disabled() {
        let dir = TempDir::new().unwrap();
        let registry = ScheduleRegistry::load(dir.path().join("schedules.bin")).unwrap();

        registry
            .upsert(&FiscalBookId::new("b"), ScheduleConfig::monthly(1, 1))
            .unwrap();
        registry
            .upsert(&FiscalBookId::new("a"), ScheduleConfig::weekly(1, 1))
            .unwrap();
        registry
            .upsert(&FiscalBookId::new("c"), ScheduleConfig::default())
            .unwrap();

        let books: Vec<_> = registry
            .enabled()
            .into_iter()
            .map(|(book, _)| book.0)
            .collect();
        assert_eq!(books, vec!["a", "b"]);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schedules.bin");
        fs::write(&path, b"nope and more bytes").unwrap();

        assert!(matches!(
            ScheduleRegistry::load(&path),
            Err(SnapshotError::InvalidFormat(_))
        ));
    }
}
