//! Identifiers and descriptors for collections, archives and revisions.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Name of a collection, the namespace that holds archives.
///
/// Collections are created implicitly on first use. The only requirement on the name is that it
/// is not empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub struct CollectionId(String);

impl CollectionId {
    /// Create a collection id, rejecting the empty string.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument("collection must not be empty"));
        }
        Ok(Self(name))
    }

    /// The collection name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CollectionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Numeric identifier of an archive, unique and increasing within its collection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
#[serde(transparent)]
pub struct ArchiveId(u64);

impl ArchiveId {
    /// The id handed out to the first archive of a collection.
    pub const FIRST: ArchiveId = ArchiveId(1);

    /// The raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(&self) -> ArchiveId {
        ArchiveId(self.0 + 1)
    }
}

impl FromStr for ArchiveId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(ArchiveId)
            .map_err(|_| Error::InvalidArgument("archive id must be an unsigned integer"))
    }
}

/// Content-derived identifier of a revision.
///
/// The id is a blake3 hash and carries no ordering information: the position of a revision in
/// its document's history is determined by the revision chain alone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId([u8; 32]);

impl RevisionId {
    /// Create a revision id from its raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionId({})", self.to_hex())
    }
}

impl FromStr for RevisionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<blake3::Hash> for RevisionId {
    fn from(value: blake3::Hash) -> Self {
        Self(*value.as_bytes())
    }
}

/// Microseconds since the UNIX epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();
        Self(micros)
    }

    /// Create a timestamp from microseconds since the UNIX epoch.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Microseconds since the UNIX epoch.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Convert to a [`SystemTime`].
    pub fn to_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(self.0)
    }

    /// Format as an RFC 3339 string with microsecond precision.
    pub fn to_rfc3339(&self) -> String {
        humantime::format_rfc3339_micros(self.to_system_time()).to_string()
    }
}

/// Descriptor of a live archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// Id of the archive within its collection.
    pub id: ArchiveId,
    /// Message given at creation.
    pub message: String,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Whether a revision carries a payload or marks the document as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionKind {
    /// The revision holds the document bytes.
    Document,
    /// The document is deleted as of this revision.
    Tombstone,
}

/// Descriptor of a revision, without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Content-derived id.
    pub id: RevisionId,
    /// Creation time, never earlier than the parent's.
    pub created_at: Timestamp,
    /// Payload or tombstone.
    pub kind: RevisionKind,
    /// The revision this one replaced as head, if any.
    pub parent: Option<RevisionId>,
}

impl Revision {
    /// Whether this revision is a deletion marker.
    pub fn is_tombstone(&self) -> bool {
        matches!(self.kind, RevisionKind::Tombstone)
    }
}
