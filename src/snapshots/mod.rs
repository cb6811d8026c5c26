//! Snapshot store.
//!
//! Snapshots are immutable captures of a fiscal book's ledger. Only their
//! tags, protection flag and annotation log change after creation.
//!
//! - `storage`: one checksummed file per snapshot, written atomically
//! - `index`: in-memory summaries for listing and retention
//! - `manager`: the operations, serialized per fiscal book

mod index;
mod manager;
mod storage;
mod tags;

pub use index::SnapshotIndex;
pub use manager::SnapshotManager;
pub(crate) use manager::CaptureRequest;
pub use storage::SnapshotStorage;
pub(crate) use storage::sync_dir;
pub use tags::{normalize_filter, normalize_tags, MAX_TAG_LEN};
