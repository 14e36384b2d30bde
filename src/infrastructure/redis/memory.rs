//! In-process fakes of `RoomStream`/`WorkerQueue`, used by tests in place
//! of a live Redis server. IDs are monotonically increasing decimal
//! strings so lexical and numeric ordering agree, matching Redis stream
//! IDs closely enough for ordering tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::ports::streams::{RoomCursor, RoomStream, StreamEntry, StreamError, WorkerQueue};
use crate::domain::RoomKey;

#[derive(Default)]
pub struct MemoryRoomStream {
    streams: Mutex<HashMap<RoomKey, Vec<StreamEntry>>>,
    next_id: AtomicU64,
}

impl MemoryRoomStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl RoomStream for MemoryRoomStream {
    async fn publish(&self, room: &RoomKey, update: Vec<u8>) -> Result<String, StreamError> {
        let id = self.next_id();
        self.streams
            .lock()
            .unwrap()
            .entry(room.clone())
            .or_default()
            .push((id.clone(), update));
        Ok(id)
    }

    async fn read_rooms(
        &self,
        cursors: &[RoomCursor],
        _block_ms: u64,
    ) -> Result<Vec<(RoomKey, StreamEntry)>, StreamError> {
        let streams = self.streams.lock().unwrap();
        let mut out = Vec::new();
        for cursor in cursors {
            let Some(entries) = streams.get(&cursor.room) else {
                continue;
            };
            for (id, bytes) in entries {
                if id.as_str() > cursor.last_id.as_str() {
                    out.push((cursor.room.clone(), (id.clone(), bytes.clone())));
                }
            }
        }
        Ok(out)
    }

    async fn read_range(&self, room: &RoomKey) -> Result<Vec<StreamEntry>, StreamError> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .get(room)
            .cloned()
            .unwrap_or_default())
    }

    async fn trim_stream(&self, room: &RoomKey, upto_id: &str) -> Result<(), StreamError> {
        if let Some(entries) = self.streams.lock().unwrap().get_mut(room) {
            entries.retain(|(id, _)| id.as_str() >= upto_id);
        }
        Ok(())
    }

    async fn stream_len(&self, room: &RoomKey) -> Result<u64, StreamError> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .get(room)
            .map(|e| e.len() as u64)
            .unwrap_or(0))
    }

    async fn delete_stream(&self, room: &RoomKey) -> Result<(), StreamError> {
        self.streams.lock().unwrap().remove(room);
        Ok(())
    }
}

struct PendingTask {
    entry_id: String,
    room: RoomKey,
    claimed_by: Option<String>,
}

#[derive(Default)]
pub struct MemoryWorkerQueue {
    tasks: Mutex<VecDeque<PendingTask>>,
    next_id: AtomicU64,
}

impl MemoryWorkerQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerQueue for MemoryWorkerQueue {
    async fn enqueue_task(&self, room: &RoomKey) -> Result<(), StreamError> {
        let entry_id = format!("w{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.tasks.lock().unwrap().push_back(PendingTask {
            entry_id,
            room: room.clone(),
            claimed_by: None,
        });
        Ok(())
    }

    async fn ensure_group(&self) -> Result<(), StreamError> {
        Ok(())
    }

    async fn claim_next(
        &self,
        consumer: &str,
        _block_ms: u64,
    ) -> Result<Option<(String, RoomKey)>, StreamError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.iter_mut().find(|t| t.claimed_by.is_none());
        match task {
            Some(t) => {
                t.claimed_by = Some(consumer.to_string());
                Ok(Some((t.entry_id.clone(), t.room.clone())))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, entry_id: &str) -> Result<(), StreamError> {
        self.tasks.lock().unwrap().retain(|t| t.entry_id != entry_id);
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        consumer: &str,
        _min_idle_ms: u64,
    ) -> Result<Vec<(String, RoomKey)>, StreamError> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut reclaimed = Vec::new();
        for t in tasks.iter_mut() {
            if t.claimed_by.is_some() {
                t.claimed_by = Some(consumer.to_string());
                reclaimed.push((t.entry_id.clone(), t.room.clone()));
            }
        }
        Ok(reclaimed)
    }

    async fn current_owner(&self, entry_id: &str) -> Result<Option<String>, StreamError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.entry_id == entry_id)
            .and_then(|t| t.claimed_by.clone()))
    }
}
