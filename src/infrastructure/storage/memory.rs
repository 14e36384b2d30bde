//! In-process reference `Storage` driver (`spec.md` §4.2): sufficient for
//! tests and the `STORAGE=memory` selection.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::application::ports::storage::{RetrievedDoc, Storage, StorageError, StorageRef};

/// `(room, docid) -> (reference key -> update bytes)`.
type RoomSnapshots = HashMap<(String, String), HashMap<String, Vec<u8>>>;

#[derive(Default)]
pub struct MemoryStorage {
    snapshots: Mutex<RoomSnapshots>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn persist_doc(
        &self,
        room: &str,
        docid: &str,
        merged_state: &[u8],
    ) -> Result<StorageRef, StorageError> {
        let reference = Uuid::new_v4().to_string();
        let mut guard = self.snapshots.lock().unwrap();
        guard
            .entry((room.to_string(), docid.to_string()))
            .or_default()
            .insert(reference.clone(), merged_state.to_vec());
        Ok(StorageRef(reference))
    }

    async fn retrieve_doc(
        &self,
        room: &str,
        docid: &str,
    ) -> Result<Option<RetrievedDoc>, StorageError> {
        let guard = self.snapshots.lock().unwrap();
        let Some(refs) = guard.get(&(room.to_string(), docid.to_string())) else {
            return Ok(None);
        };
        if refs.is_empty() {
            return Ok(None);
        }
        let references: Vec<StorageRef> = refs.keys().cloned().map(StorageRef).collect();
        let blobs: Vec<Vec<u8>> = refs.values().cloned().collect();
        let merged = crate::crdt::merge_updates(&blobs)
            .map_err(|e| StorageError::Backend(anyhow::anyhow!(e)))?;
        Ok(Some(RetrievedDoc {
            merged: crate::crdt::encode_state(&merged),
            references,
        }))
    }

    async fn retrieve_state_vector(
        &self,
        _room: &str,
        _docid: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(None)
    }

    async fn delete_references(&self, room: &str, docid: &str, refs: &[StorageRef]) {
        let mut guard = self.snapshots.lock().unwrap();
        if let Some(map) = guard.get_mut(&(room.to_string(), docid.to_string())) {
            for r in refs {
                map.remove(&r.0);
            }
        }
    }

    async fn destroy(&self) {}
}
