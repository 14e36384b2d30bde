//! API client (`spec.md` §4.4), embedded in the gateway and usable
//! standalone: reads the snapshot from storage and replays the stream
//! tail to answer `getDoc`/`getStateVector`, and validates + fans out
//! `addUpdate`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use yrs::Doc;
use yrs::updates::decoder::Decode;

use crate::application::ports::storage::{Storage, StorageError, StorageRef};
use crate::application::ports::streams::{RoomStream, StreamError, WorkerQueue};
use crate::crdt;
use crate::domain::RoomKey;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("crdt error: {0}")]
    Crdt(#[from] crdt::CrdtError),
    #[error("malformed update: not a valid CRDT update")]
    InvalidUpdate,
}

pub struct DocBundle {
    pub doc: Doc,
    pub references: Vec<StorageRef>,
    /// The highest room-stream entry ID folded into `doc`, or `"0"` if the
    /// stream was empty at read time. Callers that hand this snapshot to a
    /// freshly subscribed client should advance that client's subscription
    /// cursor to this ID, so the next fan-out pass doesn't redeliver entries
    /// already included in the snapshot (`spec.md` §8 seed scenario 2).
    pub tail_id: String,
}

pub struct ApiClient {
    storage: Arc<dyn Storage>,
    room_stream: Arc<dyn RoomStream>,
    worker_queue: Arc<dyn WorkerQueue>,
    recently_queued: Mutex<HashMap<RoomKey, Instant>>,
    min_message_lifetime: Duration,
}

impl ApiClient {
    pub fn new(
        storage: Arc<dyn Storage>,
        room_stream: Arc<dyn RoomStream>,
        worker_queue: Arc<dyn WorkerQueue>,
        min_message_lifetime: Duration,
    ) -> Self {
        Self {
            storage,
            room_stream,
            worker_queue,
            recently_queued: Mutex::new(HashMap::new()),
            min_message_lifetime,
        }
    }

    /// `getDoc(room, docid)`: merges the storage snapshot(s) with the full
    /// stream range and returns the merged document plus the snapshot
    /// references a caller can later request be deleted.
    pub async fn get_doc(&self, room: &RoomKey) -> Result<DocBundle, ApiError> {
        let snapshot = self.storage.retrieve_doc(&room.room, &room.docid).await?;
        let (doc, references) = match snapshot {
            Some(retrieved) => {
                let doc = crdt::merge_updates(&[retrieved.merged])?;
                (doc, retrieved.references)
            }
            None => (Doc::new(), Vec::new()),
        };

        let tail = self.room_stream.read_range(room).await?;
        let tail_id = tail
            .last()
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| "0".to_string());
        if !tail.is_empty() {
            let updates: Vec<Vec<u8>> = tail.into_iter().map(|(_id, bytes)| bytes).collect();
            crdt::merge_into(&doc, &updates)?;
        }

        Ok(DocBundle {
            doc,
            references,
            tail_id,
        })
    }

    /// `getStateVector(room, docid)`. Falls back to a full-state encoding
    /// (`diff` against the empty state vector) when the storage driver has
    /// no cheaper path, per `spec.md` §4.4.
    pub async fn get_state_vector(&self, room: &RoomKey) -> Result<Vec<u8>, ApiError> {
        if let Some(sv) = self
            .storage
            .retrieve_state_vector(&room.room, &room.docid)
            .await?
        {
            return Ok(sv);
        }
        let bundle = self.get_doc(room).await?;
        Ok(crdt::encode_state(&bundle.doc))
    }

    /// `addUpdate(room, docid, updateBytes)`.
    pub async fn add_update(&self, room: &RoomKey, update: Vec<u8>) -> Result<String, ApiError> {
        yrs::Update::decode_v1(&update).map_err(|_| ApiError::InvalidUpdate)?;

        let id = self.room_stream.publish(room, update).await?;

        if self.should_enqueue_task(room).await {
            self.worker_queue.enqueue_task(room).await?;
        }

        Ok(id)
    }

    async fn should_enqueue_task(&self, room: &RoomKey) -> bool {
        let now = Instant::now();
        let mut guard = self.recently_queued.lock().await;
        guard.retain(|_, queued_at| now.duration_since(*queued_at) < self.min_message_lifetime);
        if guard.contains_key(room) {
            false
        } else {
            guard.insert(room.clone(), now);
            true
        }
    }
}
