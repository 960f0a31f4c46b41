//! Document ledger: the append-only revision history of every document.
//!
//! Each (collection, archive, key) has a head pointer to its latest revision, and every revision
//! points back at the head it replaced. Writes append a revision and move the head in one engine
//! call while holding the key's writer lock; reads take no lock.

use std::collections::BTreeSet;

use anyhow::anyhow;
use bytes::Bytes;
use tracing::debug;

use crate::{
    error::{Error, Result},
    model::{ArchiveId, CollectionId, Revision, RevisionId, RevisionKind, Timestamp},
    store::{RevisionRecord, SharedEngine},
    util::KeyedLocks,
};

type DocumentKey = (CollectionId, ArchiveId, String);

/// Revision histories of all documents.
#[derive(Debug)]
pub struct Ledger {
    engine: SharedEngine,
    writers: KeyedLocks<DocumentKey>,
}

impl Ledger {
    /// Create a ledger on top of `engine`.
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            engine,
            writers: KeyedLocks::default(),
        }
    }

    /// Keys of an archive whose head is not a tombstone.
    pub fn list_documents(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
    ) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        for (key, head) in self.engine.heads(collection, archive)? {
            let record = self.load(collection, archive, &key, &head)?;
            if record.kind == RevisionKind::Document {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    /// Payload of the head revision of a document.
    pub fn fetch_head(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
    ) -> Result<Bytes> {
        let not_found = || Error::not_found(format_args!("document {key} in archive {archive}"));
        let head = self
            .engine
            .head(collection, archive, key)?
            .ok_or_else(not_found)?;
        let record = self.load(collection, archive, key, &head)?;
        match record.kind {
            RevisionKind::Document => Ok(record.payload),
            RevisionKind::Tombstone => Err(not_found()),
        }
    }

    /// Payload of a specific revision of a document.
    pub fn fetch_at(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        revision: &RevisionId,
    ) -> Result<Bytes> {
        let record = self
            .engine
            .revision(collection, archive, key, revision)?
            .ok_or_else(|| Error::not_found(format_args!("revision {revision} of {key}")))?;
        match record.kind {
            RevisionKind::Document => Ok(record.payload),
            RevisionKind::Tombstone => Err(Error::Tombstoned(revision.to_string())),
        }
    }

    /// Revisions of a document, newest first.
    ///
    /// A key that never existed has an empty history.
    pub fn history(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
    ) -> Result<Vec<Revision>> {
        let mut history = Vec::new();
        let mut next = self.engine.head(collection, archive, key)?;
        while let Some(id) = next {
            let record = self.load(collection, archive, key, &id)?;
            next = record.parent;
            history.push(record.describe(id));
        }
        Ok(history)
    }

    /// Append a revision holding `payload`.
    pub fn put(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        payload: Bytes,
    ) -> Result<Revision> {
        self.append(collection, archive, key, RevisionKind::Document, payload)
    }

    /// Append a tombstone.
    ///
    /// Fails with [`Error::NotFound`] if the key has no revisions at all. Removing a document
    /// whose head is already a tombstone appends another tombstone.
    pub fn remove(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
    ) -> Result<Revision> {
        self.append(
            collection,
            archive,
            key,
            RevisionKind::Tombstone,
            Bytes::new(),
        )
    }

    fn append(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        kind: RevisionKind,
        payload: Bytes,
    ) -> Result<Revision> {
        let _guard = self
            .writers
            .lock((collection.clone(), archive, key.to_string()));

        let parent = match self.engine.head(collection, archive, key)? {
            Some(id) => Some((id, self.load(collection, archive, key, &id)?)),
            None => None,
        };
        if kind == RevisionKind::Tombstone && parent.is_none() {
            return Err(Error::not_found(format_args!(
                "document {key} in archive {archive}"
            )));
        }

        // insertion order is authoritative, keep timestamps monotone along the chain
        let now = Timestamp::now();
        let created_at = match &parent {
            Some((_, record)) => now.max(record.created_at),
            None => now,
        };
        let record = RevisionRecord {
            created_at,
            parent: parent.map(|(id, _)| id),
            kind,
            payload,
        };
        let id = revision_id(collection, archive, key, &record);
        self.engine.append(collection, archive, key, &id, &record)?;
        debug!(%collection, %archive, key, revision = %id, ?kind, "appended revision");
        Ok(record.describe(id))
    }

    fn load(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        id: &RevisionId,
    ) -> Result<RevisionRecord> {
        self.engine
            .revision(collection, archive, key, id)?
            .ok_or_else(|| {
                Error::StorageUnavailable(anyhow!(
                    "revision {id} of {key} in archive {archive} is referenced but missing"
                ))
            })
    }
}

/// Hash everything that identifies a revision. Variable length fields are length prefixed.
fn revision_id(
    collection: &CollectionId,
    archive: ArchiveId,
    key: &str,
    record: &RevisionRecord,
) -> RevisionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(collection.as_str().len() as u64).to_le_bytes());
    hasher.update(collection.as_str().as_bytes());
    hasher.update(&archive.as_u64().to_le_bytes());
    hasher.update(&(key.len() as u64).to_le_bytes());
    hasher.update(key.as_bytes());
    match &record.parent {
        Some(parent) => {
            hasher.update(&[1]);
            hasher.update(parent.as_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
    hasher.update(&record.created_at.as_micros().to_le_bytes());
    hasher.update(&[match record.kind {
        RevisionKind::Document => 0,
        RevisionKind::Tombstone => 1,
    }]);
    hasher.update(&record.payload);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use testresult::TestResult;

    use super::*;
    use crate::store::{self, FsEngine};

    fn setup() -> (Ledger, CollectionId, ArchiveId) {
        let ledger = Ledger::new(store::in_memory());
        let docs = CollectionId::new("docs").unwrap();
        (ledger, docs, ArchiveId::FIRST)
    }

    #[test]
    fn put_then_fetch_head() -> TestResult {
        let (ledger, docs, archive) = setup();
        ledger.put(&docs, archive, "a.txt", Bytes::from_static(b"hello"))?;
        assert_eq!(ledger.fetch_head(&docs, archive, "a.txt")?, "hello");
        ledger.put(&docs, archive, "a.txt", Bytes::new())?;
        assert_eq!(ledger.fetch_head(&docs, archive, "a.txt")?, "");
        Ok(())
    }

    #[test]
    fn history_and_fetch_at() -> TestResult {
        let (ledger, docs, archive) = setup();
        let r1 = ledger.put(&docs, archive, "a.txt", Bytes::from_static(b"hello"))?;
        let r2 = ledger.put(&docs, archive, "a.txt", Bytes::from_static(b"world"))?;
        assert_eq!(r1.parent, None);
        assert_eq!(r2.parent, Some(r1.id));

        assert_eq!(ledger.fetch_head(&docs, archive, "a.txt")?, "world");
        assert_eq!(ledger.fetch_at(&docs, archive, "a.txt", &r1.id)?, "hello");
        let history = ledger.history(&docs, archive, "a.txt")?;
        assert_eq!(history, vec![r2.clone(), r1.clone()]);
        assert!(history[0].created_at >= history[1].created_at);

        let r3 = ledger.remove(&docs, archive, "a.txt")?;
        assert!(r3.is_tombstone());
        assert!(matches!(
            ledger.fetch_head(&docs, archive, "a.txt"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            ledger.fetch_at(&docs, archive, "a.txt", &r3.id),
            Err(Error::Tombstoned(_))
        ));
        assert_eq!(ledger.fetch_at(&docs, archive, "a.txt", &r2.id)?, "world");
        let ids: Vec<_> = ledger
            .history(&docs, archive, "a.txt")?
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![r3.id, r2.id, r1.id]);
        Ok(())
    }

    #[test]
    fn removed_document_can_be_written_again() -> TestResult {
        let (ledger, docs, archive) = setup();
        ledger.put(&docs, archive, "a.txt", Bytes::from_static(b"one"))?;
        ledger.remove(&docs, archive, "a.txt")?;
        ledger.remove(&docs, archive, "a.txt")?;
        ledger.put(&docs, archive, "a.txt", Bytes::from_static(b"two"))?;
        assert_eq!(ledger.fetch_head(&docs, archive, "a.txt")?, "two");
        assert_eq!(ledger.history(&docs, archive, "a.txt")?.len(), 4);
        Ok(())
    }

    #[test]
    fn remove_unknown_key_is_not_found() {
        let (ledger, docs, archive) = setup();
        assert!(matches!(
            ledger.remove(&docs, archive, "missing"),
            Err(Error::NotFound(_))
        ));
        assert!(ledger.history(&docs, archive, "missing").unwrap().is_empty());
    }

    #[test]
    fn unknown_revision_is_not_found() -> TestResult {
        let (ledger, docs, archive) = setup();
        let r1 = ledger.put(&docs, archive, "a.txt", Bytes::from_static(b"hello"))?;
        let other = RevisionId::from(blake3::hash(b"other"));
        assert!(matches!(
            ledger.fetch_at(&docs, archive, "a.txt", &other),
            Err(Error::NotFound(_))
        ));
        // revisions belong to their key
        assert!(matches!(
            ledger.fetch_at(&docs, archive, "b.txt", &r1.id),
            Err(Error::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn list_documents_skips_tombstoned_keys() -> TestResult {
        let (ledger, docs, archive) = setup();
        ledger.put(&docs, archive, "b.txt", Bytes::from_static(b"b"))?;
        ledger.put(&docs, archive, "a.txt", Bytes::from_static(b"a"))?;
        ledger.put(&docs, archive, "c.txt", Bytes::from_static(b"c"))?;
        ledger.put(&docs, archive.next(), "other.txt", Bytes::from_static(b"o"))?;
        ledger.remove(&docs, archive, "c.txt")?;

        let keys: Vec<_> = ledger
            .list_documents(&docs, archive)?
            .into_iter()
            .collect();
        assert_eq!(keys, vec!["a.txt".to_string(), "b.txt".to_string()]);
        Ok(())
    }

    #[test]
    fn identical_payloads_get_distinct_revisions() -> TestResult {
        let (ledger, docs, archive) = setup();
        let r1 = ledger.put(&docs, archive, "a.txt", Bytes::from_static(b"same"))?;
        let r2 = ledger.put(&docs, archive, "a.txt", Bytes::from_static(b"same"))?;
        assert_ne!(r1.id, r2.id);
        Ok(())
    }

    #[test]
    fn concurrent_writes_to_one_key_form_a_single_chain() -> TestResult {
        let ledger = Arc::new(Ledger::new(Arc::new(FsEngine::in_memory()?)));
        let docs = CollectionId::new("docs")?;
        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let ledger = ledger.clone();
                let docs = docs.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        let payload = Bytes::from(format!("{writer}-{i}"));
                        ledger.put(&docs, ArchiveId::FIRST, "shared", payload).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = ledger.history(&docs, ArchiveId::FIRST, "shared")?;
        assert_eq!(history.len(), 40);
        for pair in history.windows(2) {
            assert_eq!(pair[0].parent, Some(pair[1].id));
            assert!(pair[0].created_at >= pair[1].created_at);
        }
        assert_eq!(history.last().unwrap().parent, None);
        Ok(())
    }
}
