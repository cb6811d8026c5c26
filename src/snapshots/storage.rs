//! On-disk snapshot storage.

use crate::error::{Result, SnapshotError};
use crate::types::{FiscalBookId, Snapshot, SnapshotId};
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"FSN\0";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Extension of committed snapshot files.
const SNAPSHOT_EXT: &str = "snap";

/// Extension of in-flight writes.
const TEMP_EXT: &str = "tmp";

/// One file per snapshot, grouped by fiscal book.
///
/// ```text
/// snapshots/
///   <sha256(fiscal_book_id)>/
///     <snapshot_id>.snap
/// ```
///
/// Files are written to a temporary name, fsynced, then renamed into place,
/// so a snapshot is either fully durable or absent.
pub struct SnapshotStorage {
    /// Base directory for snapshot files.
    path: PathBuf,

    /// LRU cache of recently read or written snapshots.
    cache: Mutex<LruCache<SnapshotId, Snapshot>>,
}

impl SnapshotStorage {
    /// Create snapshot storage rooted at `path`.
    pub fn new(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            path,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Durably write a snapshot, replacing any previous version.
    ///
    /// Returns the number of bytes written.
    pub fn write(&self, snapshot: &Snapshot) -> Result<u64> {
        if !snapshot.id.is_storage_safe() {
            return Err(SnapshotError::validation(format!(
                "snapshot id '{}' is not storable",
                snapshot.id
            )));
        }

        let book_dir = self.book_path(&snapshot.fiscal_book_id);
        fs::create_dir_all(&book_dir)?;

        let encoded = rmp_serde::to_vec_named(snapshot)?;
        let final_path = self.snapshot_path(&snapshot.fiscal_book_id, &snapshot.id);
        let temp_path = final_path.with_extension(TEMP_EXT);

        {
            let mut file = File::create(&temp_path)?;

            // Header
            file.write_all(SNAPSHOT_MAGIC)?;
            file.write_all(&[SNAPSHOT_VERSION])?;

            // Payload
            file.write_all(&(encoded.len() as u64).to_le_bytes())?;
            file.write_all(&encoded)?;

            // Checksum
            let checksum = crc32fast::hash(&encoded);
            file.write_all(&checksum.to_le_bytes())?;

            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        sync_dir(&book_dir)?;

        self.cache.lock().put(snapshot.id.clone(), snapshot.clone());
        debug!(snapshot = %snapshot.id, bytes = encoded.len(), "snapshot written");

        Ok(encoded.len() as u64 + 17)
    }

    /// Read a snapshot.
    pub fn read(&self, book: &FiscalBookId, id: &SnapshotId) -> Result<Option<Snapshot>> {
        if let Some(cached) = self.cache.lock().get(id).cloned() {
            return Ok(Some(cached));
        }

        if !id.is_storage_safe() {
            return Ok(None);
        }

        let path = self.snapshot_path(book, id);
        if !path.exists() {
            return Ok(None);
        }

        let snapshot = Self::read_file(&path)?;
        self.cache.lock().put(id.clone(), snapshot.clone());
        Ok(Some(snapshot))
    }

    /// Delete a snapshot file. Returns false if it did not exist.
    pub fn delete(&self, book: &FiscalBookId, id: &SnapshotId) -> Result<bool> {
        if !id.is_storage_safe() {
            return Ok(false);
        }

        let path = self.snapshot_path(book, id);
        if !path.exists() {
            self.cache.lock().pop(id);
            return Ok(false);
        }

        fs::remove_file(&path)?;
        self.cache.lock().pop(id);
        if let Some(dir) = path.parent() {
            sync_dir(dir)?;
        }
        Ok(true)
    }

    /// Load every committed snapshot, removing leftovers of interrupted writes.
    pub fn load_all(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            for file_entry in fs::read_dir(entry.path())? {
                let file_entry = file_entry?;
                let path = file_entry.path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some(SNAPSHOT_EXT) => snapshots.push(Self::read_file(&path)?),
                    Some(TEMP_EXT) => {
                        warn!(path = %path.display(), "removing incomplete snapshot write");
                        fs::remove_file(&path)?;
                    }
                    _ => {}
                }
            }
        }

        Ok(snapshots)
    }

    /// Total bytes used by snapshot files.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for file_entry in fs::read_dir(entry.path())? {
                    total += file_entry?.metadata()?.len();
                }
            }
        }

        Ok(total)
    }

    fn read_file(path: &Path) -> Result<Snapshot> {
        let mut file = File::open(path)?;

        // Read and verify magic
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidFormat(format!(
                "Invalid snapshot magic in {}",
                path.display()
            )));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(SnapshotError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
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
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&encoded);

        if stored_checksum != computed_checksum {
            return Err(SnapshotError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }

    fn book_path(&self, book: &FiscalBookId) -> PathBuf {
        self.path.join(book.storage_key())
    }

    fn snapshot_path(&self, book: &FiscalBookId, id: &SnapshotId) -> PathBuf {
        self.book_path(book)
            .join(format!("{}.{}", id.as_str(), SNAPSHOT_EXT))
    }
}

/// Flush directory entries so a rename or unlink survives a crash.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
