//! The archive and document operations.
//!
//! [`Service`] composes the [`Registry`] and the [`Ledger`] and is what the HTTP handlers call.
//! Every operation takes a [`CallContext`]; the engine work runs on the blocking thread pool and
//! is abandoned as soon as the context is cancelled or its deadline passes.

use std::{collections::BTreeSet, future, sync::Arc, time::Duration};

use anyhow::Context as _;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    error::{Error, Result},
    ledger::Ledger,
    model::{Archive, ArchiveId, CollectionId, Revision, RevisionId},
    registry::Registry,
    store::SharedEngine,
};

/// Cancellation and deadline of a single call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context without deadline that is only cancelled through its token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    /// Set the deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Use `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token that cancels calls made with this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run blocking engine work, giving up when the context is cancelled or expires.
    async fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(Error::DeadlineExceeded);
        }
        let task = tokio::task::spawn_blocking(work);
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => future::pending().await,
            }
        };
        tokio::select! {
            biased;
            res = task => res.context("storage task failed")?,
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = expired => Err(Error::DeadlineExceeded),
        }
    }
}

/// An archive together with the documents it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveListing {
    /// The archive.
    pub archive: Archive,
    /// Keys of its live documents.
    pub documents: BTreeSet<String>,
}

/// Archive and document operations over a shared engine.
#[derive(Debug, Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: Registry,
    ledger: Ledger,
}

impl Service {
    /// Create the service on top of `engine`.
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Registry::new(engine.clone()),
                ledger: Ledger::new(engine),
            }),
        }
    }

    /// Open a collection, creating it on first use.
    pub async fn open_collection(&self, ctx: &CallContext, name: &str) -> Result<CollectionId> {
        let inner = self.inner.clone();
        let name = name.to_string();
        ctx.run(move || inner.registry.open_collection(&name)).await
    }

    /// Live archives of a collection, ordered by id.
    pub async fn list_archives(
        &self,
        ctx: &CallContext,
        collection: &str,
    ) -> Result<Vec<Archive>> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        ctx.run(move || {
            let collection = inner.registry.open_collection(&collection)?;
            inner.registry.list_archives(&collection)
        })
        .await
    }

    /// Live archives of a collection with their documents.
    ///
    /// An archive whose documents cannot be listed is logged and left out instead of failing
    /// the whole listing.
    pub async fn list_archives_with_documents(
        &self,
        ctx: &CallContext,
        collection: &str,
    ) -> Result<Vec<ArchiveListing>> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        ctx.run(move || {
            let collection = inner.registry.open_collection(&collection)?;
            let archives = inner.registry.list_archives(&collection)?;
            let mut listings = Vec::with_capacity(archives.len());
            for archive in archives {
                match inner.ledger.list_documents(&collection, archive.id) {
                    Ok(documents) => listings.push(ArchiveListing { archive, documents }),
                    Err(err) => {
                        warn!(%collection, archive = %archive.id, %err, "skipping archive")
                    }
                }
            }
            Ok(listings)
        })
        .await
    }

    /// Create the next archive of a collection.
    pub async fn create_archive(
        &self,
        ctx: &CallContext,
        collection: &str,
        message: &str,
    ) -> Result<Archive> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        let message = message.to_string();
        ctx.run(move || {
            let collection = inner.registry.open_collection(&collection)?;
            inner.registry.create_archive(&collection, &message)
        })
        .await
    }

    /// Look up a live archive.
    pub async fn find_archive(
        &self,
        ctx: &CallContext,
        collection: &str,
        id: ArchiveId,
    ) -> Result<Archive> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        ctx.run(move || {
            let collection = inner.registry.open_collection(&collection)?;
            inner.registry.find_archive(&collection, id)
        })
        .await
    }

    /// Mark an archive as deleted. Succeeds if it is already absent.
    pub async fn delete_archive(
        &self,
        ctx: &CallContext,
        collection: &str,
        id: ArchiveId,
    ) -> Result<()> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        ctx.run(move || {
            let collection = inner.registry.open_collection(&collection)?;
            inner.registry.delete_archive(&collection, id)
        })
        .await
    }

    /// Keys of the live documents of an archive.
    pub async fn list_documents(
        &self,
        ctx: &CallContext,
        collection: &str,
        id: ArchiveId,
    ) -> Result<BTreeSet<String>> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        ctx.run(move || {
            let collection = inner.existing_archive(&collection, id)?;
            inner.ledger.list_documents(&collection, id)
        })
        .await
    }

    /// Fetch a document, either its head or the given revision.
    ///
    /// A revision string that is not a valid revision id names a revision that does not exist.
    pub async fn get_document(
        &self,
        ctx: &CallContext,
        collection: &str,
        id: ArchiveId,
        key: &str,
        revision: Option<&str>,
    ) -> Result<Bytes> {
        let key = validate_key(key)?;
        let revision = match revision {
            None => None,
            Some(rev) => Some(
                rev.parse::<RevisionId>()
                    .map_err(|_| Error::not_found(format_args!("revision {rev} of {key}")))?,
            ),
        };
        let inner = self.inner.clone();
        let collection = collection.to_string();
        ctx.run(move || {
            let collection = inner.existing_archive(&collection, id)?;
            match revision {
                None => inner.ledger.fetch_head(&collection, id, &key),
                Some(revision) => inner.ledger.fetch_at(&collection, id, &key, &revision),
            }
        })
        .await
    }

    /// Revisions of a document, newest first.
    pub async fn history(
        &self,
        ctx: &CallContext,
        collection: &str,
        id: ArchiveId,
        key: &str,
    ) -> Result<Vec<Revision>> {
        let key = validate_key(key)?;
        let inner = self.inner.clone();
        let collection = collection.to_string();
        ctx.run(move || {
            let collection = inner.existing_archive(&collection, id)?;
            inner.ledger.history(&collection, id, &key)
        })
        .await
    }

    /// Write a new revision of a document.
    pub async fn put_document(
        &self,
        ctx: &CallContext,
        collection: &str,
        id: ArchiveId,
        key: &str,
        payload: Bytes,
    ) -> Result<Revision> {
        let key = validate_key(key)?;
        let inner = self.inner.clone();
        let collection = collection.to_string();
        ctx.run(move || {
            let collection = inner.existing_archive(&collection, id)?;
            inner.ledger.put(&collection, id, &key, payload)
        })
        .await
    }

    /// Delete a document by appending a tombstone revision.
    pub async fn delete_document(
        &self,
        ctx: &CallContext,
        collection: &str,
        id: ArchiveId,
        key: &str,
    ) -> Result<Revision> {
        let key = validate_key(key)?;
        let inner = self.inner.clone();
        let collection = collection.to_string();
        ctx.run(move || {
            let collection = inner.existing_archive(&collection, id)?;
            inner.ledger.remove(&collection, id, &key)
        })
        .await
    }
}

impl Inner {
    fn existing_archive(&self, collection: &str, id: ArchiveId) -> Result<CollectionId> {
        let collection = self.registry.open_collection(collection)?;
        self.registry.find_archive(&collection, id)?;
        Ok(collection)
    }
}

fn validate_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("missing parameter: key"));
    }
    Ok(key.to_string())
}
