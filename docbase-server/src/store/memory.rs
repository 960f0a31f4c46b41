//! In memory storage engine.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use parking_lot::RwLock;

use super::{ArchiveRecord, Engine, RevisionRecord};
use crate::model::{ArchiveId, CollectionId, RevisionId};

/// Keeps all collections in process memory.
///
/// Every primitive takes the lock once, so an append is visible to readers as a single step.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    collections: RwLock<HashMap<CollectionId, CollectionState>>,
}

#[derive(Debug, Default)]
struct CollectionState {
    archives: BTreeMap<ArchiveId, ArchiveRecord>,
    /// Documents by (archive, key)
    documents: BTreeMap<(ArchiveId, String), DocumentState>,
}

#[derive(Debug, Default)]
struct DocumentState {
    head: Option<RevisionId>,
    revisions: HashMap<RevisionId, RevisionRecord>,
}

impl Engine for MemoryEngine {
    fn open(&self, collection: &CollectionId) -> Result<()> {
        self.collections
            .write()
            .entry(collection.clone())
            .or_default();
        Ok(())
    }

    fn archives(&self, collection: &CollectionId) -> Result<Vec<ArchiveRecord>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|c| c.archives.values().cloned().collect())
            .unwrap_or_default())
    }

    fn archive(&self, collection: &CollectionId, id: ArchiveId) -> Result<Option<ArchiveRecord>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|c| c.archives.get(&id))
            .cloned())
    }

    fn put_archive(&self, collection: &CollectionId, record: &ArchiveRecord) -> Result<()> {
        self.collections
            .write()
            .entry(collection.clone())
            .or_default()
            .archives
            .insert(record.id, record.clone());
        Ok(())
    }

    fn heads(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
    ) -> Result<Vec<(String, RevisionId)>> {
        let collections = self.collections.read();
        let Some(state) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let heads = state
            .documents
            .range((archive, String::new())..)
            .take_while(|((id, _), _)| *id == archive)
            .filter_map(|((_, key), doc)| doc.head.map(|head| (key.clone(), head)))
            .collect();
        Ok(heads)
    }

    fn head(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
    ) -> Result<Option<RevisionId>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|c| c.documents.get(&(archive, key.to_string())))
            .and_then(|doc| doc.head))
    }

    fn revision(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        id: &RevisionId,
    ) -> Result<Option<RevisionRecord>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|c| c.documents.get(&(archive, key.to_string())))
            .and_then(|doc| doc.revisions.get(id))
            .cloned())
    }

    fn append(
        &self,
        collection: &CollectionId,
        archive: ArchiveId,
        key: &str,
        id: &RevisionId,
        record: &RevisionRecord,
    ) -> Result<()> {
        let mut collections = self.collections.write();
        let doc = collections
            .entry(collection.clone())
            .or_default()
            .documents
            .entry((archive, key.to_string()))
            .or_default();
        doc.revisions.insert(*id, record.clone());
        doc.head = Some(*id);
        Ok(())
    }
}
