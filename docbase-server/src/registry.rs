//! Archive registry: allocation, lookup and deletion of archives within collections.

use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    model::{Archive, ArchiveId, CollectionId, Timestamp},
    store::{ArchiveRecord, SharedEngine},
    util::KeyedLocks,
};

/// Tracks the archives of every collection.
#[derive(Debug)]
pub struct Registry {
    engine: SharedEngine,
    /// Serializes id allocation per collection
    allocations: KeyedLocks<CollectionId>,
}

impl Registry {
    /// Create a registry on top of `engine`.
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            engine,
            allocations: KeyedLocks::default(),
        }
    }

    /// Open a collection, creating it on first use.
    pub fn open_collection(&self, name: &str) -> Result<CollectionId> {
        let collection = CollectionId::new(name)?;
        self.engine.open(&collection)?;
        Ok(collection)
    }

    /// Live archives of a collection, ordered by id.
    pub fn list_archives(&self, collection: &CollectionId) -> Result<Vec<Archive>> {
        let archives = self
            .engine
            .archives(collection)?
            .into_iter()
            .filter(|record| !record.deleted)
            .map(into_archive)
            .collect();
        Ok(archives)
    }

    /// Create the next archive of a collection.
    ///
    /// The new id is one more than the largest id ever allocated in the collection, deleted
    /// archives included, so ids are never reused.
    pub fn create_archive(&self, collection: &CollectionId, message: &str) -> Result<Archive> {
        let _guard = self.allocations.lock(collection.clone());
        let id = self
            .engine
            .archives(collection)?
            .iter()
            .map(|record| record.id)
            .max()
            .map(|id| id.next())
            .unwrap_or(ArchiveId::FIRST);
        let record = ArchiveRecord {
            id,
            message: message.to_string(),
            created_at: Timestamp::now(),
            deleted: false,
        };
        self.engine.put_archive(collection, &record)?;
        info!(%collection, %id, "created archive");
        Ok(into_archive(record))
    }

    /// Look up a live archive.
    pub fn find_archive(&self, collection: &CollectionId, id: ArchiveId) -> Result<Archive> {
        match self.engine.archive(collection, id)? {
            Some(record) if !record.deleted => Ok(into_archive(record)),
            _ => Err(Error::not_found(format_args!(
                "archive {id} in collection {collection}"
            ))),
        }
    }

    /// Mark an archive as deleted.
    ///
    /// Deleting an archive that does not exist or is already deleted succeeds.
    pub fn delete_archive(&self, collection: &CollectionId, id: ArchiveId) -> Result<()> {
        let _guard = self.allocations.lock(collection.clone());
        match self.engine.archive(collection, id)? {
            Some(mut record) if !record.deleted => {
                record.deleted = true;
                self.engine.put_archive(collection, &record)?;
                info!(%collection, %id, "deleted archive");
            }
            _ => debug!(%collection, %id, "archive already absent"),
        }
        Ok(())
    }
}

fn into_archive(record: ArchiveRecord) -> Archive {
    Archive {
        id: record.id,
        message: record.message,
        created_at: record.created_at,
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc, thread};

    use testresult::TestResult;

    use super::*;
    use crate::store::{self, FsEngine};

    fn ids(archives: &[Archive]) -> Vec<u64> {
        archives.iter().map(|a| a.id.as_u64()).collect()
    }

    #[test]
    fn ids_start_at_one_and_increase() -> TestResult {
        let registry = Registry::new(store::in_memory());
        let docs = registry.open_collection("docs")?;
        assert!(registry.list_archives(&docs)?.is_empty());

        let first = registry.create_archive(&docs, "init")?;
        let second = registry.create_archive(&docs, "second")?;
        assert_eq!(first.id.as_u64(), 1);
        assert_eq!(first.message, "init");
        assert_eq!(second.id.as_u64(), 2);
        assert!(second.created_at >= first.created_at);
        assert_eq!(ids(&registry.list_archives(&docs)?), vec![1, 2]);
        Ok(())
    }

    #[test]
    fn collections_are_isolated() -> TestResult {
        let registry = Registry::new(store::in_memory());
        let docs = registry.open_collection("docs")?;
        let logs = registry.open_collection("logs")?;
        registry.create_archive(&docs, "a")?;
        registry.create_archive(&docs, "b")?;
        let other = registry.create_archive(&logs, "c")?;
        assert_eq!(other.id.as_u64(), 1);
        assert!(registry.find_archive(&logs, 2u64.into()).is_err());
        Ok(())
    }

    #[test]
    fn empty_collection_name_is_rejected() {
        let registry = Registry::new(store::in_memory());
        assert!(matches!(
            registry.open_collection(""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn concurrent_creation_allocates_distinct_ids() -> TestResult {
        let registry = Arc::new(Registry::new(store::in_memory()));
        let docs = registry.open_collection("docs")?;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let docs = docs.clone();
                thread::spawn(move || {
                    (0..25)
                        .map(|_| registry.create_archive(&docs, "concurrent").unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = BTreeSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id.as_u64()), "duplicate id {id}");
            }
        }
        assert_eq!(seen, (1..=200).collect::<BTreeSet<_>>());
        Ok(())
    }

    #[test]
    fn delete_is_idempotent_and_ids_are_not_reused() -> TestResult {
        let registry = Registry::new(store::in_memory());
        let docs = registry.open_collection("docs")?;
        registry.create_archive(&docs, "one")?;
        let two = registry.create_archive(&docs, "two")?;

        registry.delete_archive(&docs, two.id)?;
        registry.delete_archive(&docs, two.id)?;
        registry.delete_archive(&docs, 99u64.into())?;

        assert_eq!(ids(&registry.list_archives(&docs)?), vec![1]);
        assert!(matches!(
            registry.find_archive(&docs, two.id),
            Err(Error::NotFound(_))
        ));
        let three = registry.create_archive(&docs, "three")?;
        assert_eq!(three.id.as_u64(), 3);
        Ok(())
    }

    #[test]
    fn works_on_the_redb_engine() -> TestResult {
        let registry = Registry::new(Arc::new(FsEngine::in_memory()?));
        let docs = registry.open_collection("docs")?;
        let first = registry.create_archive(&docs, "init")?;
        assert_eq!(registry.find_archive(&docs, first.id)?, first);
        registry.delete_archive(&docs, first.id)?;
        assert!(registry.list_archives(&docs)?.is_empty());
        assert_eq!(registry.create_archive(&docs, "next")?.id.as_u64(), 2);
        Ok(())
    }
}
