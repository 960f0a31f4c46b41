//! Storage engine adapter.
//!
//! The registry and the ledger only talk to storage through the [`Engine`] trait. Two engines
//! are provided: [`memory::MemoryEngine`] keeps everything in process memory and
//! [`fs::FsEngine`] persists to a redb database.

use std::{fmt::Debug, path::Path, sync::Arc};

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::model::{ArchiveId, CollectionId, Revision, RevisionId, RevisionKind, Timestamp};

pub mod fs;
pub mod memory;

pub use self::{fs::FsEngine, memory::MemoryEngine};

/// Stored form of an archive.
///
/// Archives are never erased: deleting one sets `deleted`, which keeps its id allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ArchiveRecord {
    pub id: ArchiveId,
    pub message: String,
    pub created_at: Timestamp,
    pub deleted: bool,
}

/// Stored form of a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// Creation time.
    pub created_at: Timestamp,
    /// Head of the key when this revision was appended.
    pub parent: Option<RevisionId>,
    /// Payload or tombstone.
    pub kind: RevisionKind,
    /// Document bytes, empty for tombstones.
    pub payload: Bytes,
}

impl RevisionRecord {
    /// The descriptor of this record stored under `id`.
    pub fn describe(&self, id: RevisionId) -> Revision {
        Revision {
            id,
            created_at: self.created_at,
            kind: self.kind,
            parent: self.parent,
        }
    }
}

/// Primitives the archive registry and the document ledger are built on.
///
/// Implementations must make [`Engine::append`] atomic: a reader sees either the old head or
/// the new head together with its revision, never a head pointing at a missing revision.
pub trait Engine: Debug + Send + Sync + 'static {
    /// Make sure the collection namespace is usable, creating it if needed.
    fn open(&self, collection: &CollectionId) -> Result<()>;

    /// All archive records of a collection, deleted ones included, ordered by id.
    fn archives(&self, collection: &CollectionId) -> Result<Vec<ArchiveRecord>>;

    /// A single archive record.
    fn archive(&self, collection: &CollectionId, id: ArchiveId) -> Result<Option<ArchiveRecord>>;

    /// Insert or overwrite an archive record.
    fn put_archive(&self, collection: &CollectionId, record: &ArchiveRecord) -> Result<()>;

    /// Head revisions of every key of an archive, ordered by key.
    fn heads(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
    ) -> Result<Vec<(String, RevisionId)>>;

    /// Head revision of a key.
    fn head(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
    ) -> Result<Option<RevisionId>>;

    /// Look up a revision of a key by id.
    fn revision(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        id: &RevisionId,
    ) -> Result<Option<RevisionRecord>>;

    /// Store a revision and make it the head of its key.
    fn append(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        id: &RevisionId,
        record: &RevisionRecord,
    ) -> Result<()>;
}

/// Shared handle to an engine.
pub type SharedEngine = Arc<dyn Engine>;

/// Open a redb engine at `path`.
pub fn persistent(path: impl AsRef<Path>) -> Result<SharedEngine> {
    Ok(Arc::new(FsEngine::persistent(path)?))
}

/// Create a memory engine.
pub fn in_memory() -> SharedEngine {
    Arc::new(MemoryEngine::default())
}
