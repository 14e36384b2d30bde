//! Storage interface (`spec.md` §4.2): an object-storage boundary, all
//! operations idempotent on the `(room, docid)` key space.

use async_trait::async_trait;
use thiserror::Error;

/// Opaque handle a `Storage` driver returns on persist and consumes on
/// delete. Two live references may coexist during handoff between
/// concurrent compactions; only the worker decides when an older one is
/// safe to delete.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageRef(pub String);

impl std::fmt::Display for StorageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct RetrievedDoc {
    pub merged: Vec<u8>,
    pub references: Vec<StorageRef>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[source] anyhow::Error),
    #[error("reference not found: {0}")]
    NotFound(StorageRef),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Writes a new snapshot blob; MUST be durable before returning.
    async fn persist_doc(
        &self,
        room: &str,
        docid: &str,
        merged_state: &[u8],
    ) -> Result<StorageRef, StorageError>;

    /// Reads all live snapshots and merges them through the CRDT module.
    /// Returns `None` when no snapshot exists yet for this room.
    async fn retrieve_doc(
        &self,
        room: &str,
        docid: &str,
    ) -> Result<Option<RetrievedDoc>, StorageError>;

    /// May be derived from `retrieve_doc` if no cheaper path exists.
    async fn retrieve_state_vector(
        &self,
        room: &str,
        docid: &str,
    ) -> Result<Option<Vec<u8>>, StorageError>;

    /// Best-effort: partial failure is logged and retried on the next
    /// compaction, never surfaced as a fatal error.
    async fn delete_references(&self, room: &str, docid: &str, refs: &[StorageRef]);

    /// Releases driver resources (connection pools, file handles).
    async fn destroy(&self);
}
