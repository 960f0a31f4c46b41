//! On disk storage engine backed by redb.

use std::path::Path;

use anyhow::{Context, Result};
use redb::{backends::InMemoryBackend, Database, ReadableTable, TableDefinition};
use tracing::{debug, info};

use super::{ArchiveRecord, Engine, RevisionRecord};
use crate::model::{ArchiveId, CollectionId, RevisionId, Timestamp};

/// Table: Collections
/// Key:   `&str` # CollectionId
/// Value: `u64`  # Time of first use, microseconds
const COLLECTIONS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("collections-1");

/// Table: Archives
/// Key:   `(&str, u64)` # (CollectionId, ArchiveId)
/// Value: `&[u8]`       # Postcard encoded ArchiveRecord
const ARCHIVES_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("archives-1");

/// Table: Heads
/// Key:   `(&str, u64, &str)` # (CollectionId, ArchiveId, Key)
/// Value: `[u8; 32]`          # RevisionId
const HEADS_TABLE: TableDefinition<(&str, u64, &str), &[u8; 32]> =
    TableDefinition::new("heads-1");

/// Table: Revisions
/// Key:   `(&str, u64, &str, [u8; 32])` # (CollectionId, ArchiveId, Key, RevisionId)
/// Value: `&[u8]`                       # Postcard encoded RevisionRecord
const REVISIONS_TABLE: TableDefinition<(&str, u64, &str, &[u8; 32]), &[u8]> =
    TableDefinition::new("revisions-1");

/// Persists collections, archives and revisions in a redb database.
#[derive(derive_more::Debug)]
pub struct FsEngine {
    #[debug("Database")]
    db: Database,
}

impl FsEngine {
    /// Open or create the database file at `path`.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading document database from {}", path.to_string_lossy());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create database directory at {}",
                    path.to_string_lossy()
                )
            })?;
        }
        let db = Database::builder()
            .create(path)
            .context("failed to open document database")?;
        Self::open_db(db)
    }

    /// Create a database that lives in memory only.
    pub fn in_memory() -> Result<Self> {
        info!("using in-memory document database");
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::open_db(db)
    }

    fn open_db(db: Database) -> Result<Self> {
        let write_tx = db.begin_write()?;
        {
            let _table = write_tx.open_table(COLLECTIONS_TABLE)?;
            let _table = write_tx.open_table(ARCHIVES_TABLE)?;
            let _table = write_tx.open_table(HEADS_TABLE)?;
            let _table = write_tx.open_table(REVISIONS_TABLE)?;
        }
        write_tx.commit()?;
        Ok(Self { db })
    }
}

impl Engine for FsEngine {
    fn open(&self, collection: &CollectionId) -> Result<()> {
        let read_tx = self.db.begin_read()?;
        let known = read_tx
            .open_table(COLLECTIONS_TABLE)?
            .get(collection.as_str())?
            .is_some();
        drop(read_tx);
        if known {
            return Ok(());
        }
        let write_tx = self.db.begin_write()?;
        {
            let mut table = write_tx.open_table(COLLECTIONS_TABLE)?;
            if table.get(collection.as_str())?.is_none() {
                debug!(%collection, "registering collection");
                table.insert(collection.as_str(), Timestamp::now().as_micros())?;
            }
        }
        write_tx.commit()?;
        Ok(())
    }

    fn archives(&self, collection: &CollectionId) -> Result<Vec<ArchiveRecord>> {
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(ARCHIVES_TABLE)?;
        let name = collection.as_str();
        let mut records = Vec::new();
        for entry in table.range((name, 0u64)..=(name, u64::MAX))? {
            let (_key, value) = entry?;
            records.push(decode_archive(value.value())?);
        }
        Ok(records)
    }

    fn archive(&self, collection: &CollectionId, id: ArchiveId) -> Result<Option<ArchiveRecord>> {
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(ARCHIVES_TABLE)?;
        let Some(row) = table.get((collection.as_str(), id.as_u64()))? else {
            return Ok(None);
        };
        Ok(Some(decode_archive(row.value())?))
    }

    fn put_archive(&self, collection: &CollectionId, record: &ArchiveRecord) -> Result<()> {
        let value = postcard::to_stdvec(record)?;
        let write_tx = self.db.begin_write()?;
        {
            let mut table = write_tx.open_table(ARCHIVES_TABLE)?;
            table.insert((collection.as_str(), record.id.as_u64()), &value[..])?;
        }
        write_tx.commit()?;
        Ok(())
    }

    fn heads(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
    ) -> Result<Vec<(String, RevisionId)>> {
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(HEADS_TABLE)?;
        let name = collection.as_str();
        let archive = archive.as_u64();
        let mut heads = Vec::new();
        for entry in table.range((name, archive, "")..)? {
            let (key, value) = entry?;
            let (entry_collection, entry_archive, entry_key) = key.value();
            if entry_collection != name || entry_archive != archive {
                break;
            }
            heads.push((
                entry_key.to_string(),
                RevisionId::from_bytes(*value.value()),
            ));
        }
        Ok(heads)
    }

    fn head(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
    ) -> Result<Option<RevisionId>> {
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(HEADS_TABLE)?;
        let head = table
            .get((collection.as_str(), archive.as_u64(), key))?
            .map(|row| RevisionId::from_bytes(*row.value()));
        Ok(head)
    }

    fn revision(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        id: &RevisionId,
    ) -> Result<Option<RevisionRecord>> {
        let read_tx = self.db.begin_read()?;
        let table = read_tx.open_table(REVISIONS_TABLE)?;
        let Some(row) = table.get((collection.as_str(), archive.as_u64(), key, id.as_bytes()))?
        else {
            return Ok(None);
        };
        let record = postcard::from_bytes(row.value()).context("corrupt revision record")?;
        Ok(Some(record))
    }

    fn append(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        id: &RevisionId,
        record: &RevisionRecord,
    ) -> Result<()> {
        let value = postcard::to_stdvec(record)?;
        let name = collection.as_str();
        let archive = archive.as_u64();
        let write_tx = self.db.begin_write()?;
        {
            let mut revisions = write_tx.open_table(REVISIONS_TABLE)?;
            revisions.insert((name, archive, key, id.as_bytes()), &value[..])?;
            let mut heads = write_tx.open_table(HEADS_TABLE)?;
            heads.insert((name, archive, key), id.as_bytes())?;
        }
        write_tx.commit()?;
        Ok(())
    }
}

fn decode_archive(bytes: &[u8]) -> Result<ArchiveRecord> {
    postcard::from_bytes(bytes).context("corrupt archive record")
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use testresult::TestResult;

    use super::*;
    use crate::model::RevisionKind;

    fn archive(id: u64, deleted: bool) -> ArchiveRecord {
        ArchiveRecord {
            id: id.into(),
            message: format!("archive {id}"),
            created_at: Timestamp::from_micros(id),
            deleted,
        }
    }

    fn revision(payload: &'static [u8], parent: Option<RevisionId>) -> RevisionRecord {
        RevisionRecord {
            created_at: Timestamp::from_micros(10),
            parent,
            kind: RevisionKind::Document,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn archives_are_scoped_by_collection() -> TestResult {
        let engine = FsEngine::in_memory()?;
        let docs = CollectionId::new("docs")?;
        let other = CollectionId::new("docs2")?;
        engine.put_archive(&docs, &archive(2, false))?;
        engine.put_archive(&docs, &archive(1, true))?;
        engine.put_archive(&other, &archive(7, false))?;

        let ids: Vec<_> = engine
            .archives(&docs)?
            .into_iter()
            .map(|a| a.id.as_u64())
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(engine.archive(&docs, 1u64.into())?.unwrap().deleted);
        assert!(engine.archive(&docs, 7u64.into())?.is_none());
        Ok(())
    }

    #[test]
    fn heads_are_scoped_by_archive() -> TestResult {
        let engine = FsEngine::in_memory()?;
        let docs = CollectionId::new("docs")?;
        let r1 = RevisionId::from(blake3::hash(b"r1"));
        let r2 = RevisionId::from(blake3::hash(b"r2"));
        let r3 = RevisionId::from(blake3::hash(b"r3"));
        engine.append(&docs, 1u64.into(), "b.txt", &r1, &revision(b"b", None))?;
        engine.append(&docs, 1u64.into(), "a.txt", &r2, &revision(b"a", None))?;
        engine.append(&docs, 2u64.into(), "c.txt", &r3, &revision(b"c", None))?;

        assert_eq!(
            engine.heads(&docs, 1u64.into())?,
            vec![("a.txt".to_string(), r2), ("b.txt".to_string(), r1)]
        );
        assert_eq!(engine.heads(&docs, 2u64.into())?, vec![("c.txt".to_string(), r3)]);
        assert!(engine.heads(&docs, 3u64.into())?.is_empty());
        Ok(())
    }

    #[test]
    fn append_moves_head_and_keeps_history() -> TestResult {
        let engine = FsEngine::in_memory()?;
        let docs = CollectionId::new("docs")?;
        let r1 = RevisionId::from(blake3::hash(b"r1"));
        let r2 = RevisionId::from(blake3::hash(b"r2"));
        engine.append(&docs, 1u64.into(), "a.txt", &r1, &revision(b"hello", None))?;
        engine.append(&docs, 1u64.into(), "a.txt", &r2, &revision(b"world", Some(r1)))?;

        assert_eq!(engine.head(&docs, 1u64.into(), "a.txt")?, Some(r2));
        let first = engine.revision(&docs, 1u64.into(), "a.txt", &r1)?.unwrap();
        assert_eq!(first.payload, Bytes::from_static(b"hello"));
        let second = engine.revision(&docs, 1u64.into(), "a.txt", &r2)?.unwrap();
        assert_eq!(second.parent, Some(r1));
        // revisions are scoped to their key
        assert!(engine.revision(&docs, 1u64.into(), "b.txt", &r1)?.is_none());
        Ok(())
    }

    #[test]
    fn persists_across_reopen() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("docbase.db");
        let docs = CollectionId::new("docs")?;
        let r1 = RevisionId::from(blake3::hash(b"r1"));
        {
            let engine = FsEngine::persistent(&path)?;
            engine.open(&docs)?;
            engine.put_archive(&docs, &archive(1, false))?;
            engine.append(&docs, 1u64.into(), "a.txt", &r1, &revision(b"hello", None))?;
        }
        let engine = FsEngine::persistent(&path)?;
        engine.open(&docs)?;
        assert_eq!(engine.archives(&docs)?, vec![archive(1, false)]);
        assert_eq!(engine.head(&docs, 1u64.into(), "a.txt")?, Some(r1));
        Ok(())
    }
}
