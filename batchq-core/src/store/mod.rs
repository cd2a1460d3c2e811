//! Durable event store
//!
//! Queued events live in an [`EventStore`] between queueing and batch upload.
//! The store hands out opaque [`Handle`]s; the publish pipeline enumerates
//! them, reads event content back, and deletes handles whose events the
//! server acknowledged.

mod file;
mod memory;

pub use file::FileEventStore;
pub use memory::MemoryEventStore;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Default maximum number of stored events per collection before aging out.
pub const DEFAULT_MAX_EVENTS_PER_COLLECTION: usize = 10_000;

/// Default number of oldest events discarded when the quota is exceeded.
pub const DEFAULT_EVENTS_TO_FORGET: usize = 100;

/// Opaque identifier for one stored event.
///
/// Handles are scoped to a (project, collection) pair and totally ordered
/// consistently with insertion time; the aging-out and chunking logic depend
/// on that ordering. Callers must treat the internal representation as
/// private to the store that issued the handle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(HandleRepr);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum HandleRepr {
    File(PathBuf),
    Memory {
        project_id: String,
        collection: String,
        seq: u64,
    },
}

impl Handle {
    pub(crate) fn for_file(path: PathBuf) -> Self {
        Handle(HandleRepr::File(path))
    }

    pub(crate) fn for_memory(project_id: String, collection: String, seq: u64) -> Self {
        Handle(HandleRepr::Memory {
            project_id,
            collection,
            seq,
        })
    }

    pub(crate) fn as_file(&self) -> Option<&Path> {
        match &self.0 {
            HandleRepr::File(path) => Some(path),
            _ => None,
        }
    }

    pub(crate) fn as_memory(&self) -> Option<(&str, &str, u64)> {
        match &self.0 {
            HandleRepr::Memory {
                project_id,
                collection,
                seq,
            } => Some((project_id, collection, *seq)),
            _ => None,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            HandleRepr::File(path) => write!(f, "{}", path.display()),
            HandleRepr::Memory {
                project_id,
                collection,
                seq,
            } => write!(f, "{}/{}/{}", project_id, collection, seq),
        }
    }
}

/// Handles pending upload, grouped by collection name.
///
/// A `BTreeMap` keeps collections in lexicographic order, which is the order
/// the cumulative enumeration cap is applied in.
pub type HandleMap = BTreeMap<String, Vec<Handle>>;

/// Contract for the durable queue backing the client.
///
/// Implementations must make each operation individually atomic from the
/// caller's point of view: no partially-written event content is ever
/// observable through `get`.
pub trait EventStore: Send + Sync {
    /// Durably persist one serialized event, enforcing the per-collection
    /// quota first. Returns a handle unique within the collection.
    fn store(&self, project_id: &str, collection: &str, event: &str) -> Result<Handle>;

    /// Retrieve event content. Returns `Ok(None)` when the handle no longer
    /// exists; retrieval may race benignly with removal.
    fn get(&self, handle: &Handle) -> Result<Option<String>>;

    /// Delete the stored event. Removing a nonexistent handle is a logged
    /// no-op, not an error.
    fn remove(&self, handle: &Handle) -> Result<()>;

    /// Enumerate up to `limit` handles total across all collections of the
    /// project. Collections come in lexicographic order, handles within a
    /// collection in ascending insertion order; once the cumulative cap is
    /// reached, later collections contribute nothing. Collections with no
    /// events are omitted.
    fn handles(&self, project_id: &str, limit: usize) -> Result<HandleMap>;

    /// Persist a small string preference, used for one-shot flags.
    fn set_preference(&self, key: &str, value: &str) -> Result<()>;

    /// Read a preference, returning `default` when the key was never set.
    fn preference(&self, key: &str, default: &str) -> Result<String>;
}
