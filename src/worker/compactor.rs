//! Compaction loop (`spec.md` §4.7): claims a dirty room, merges its
//! snapshot with the stream tail, writes a fresh snapshot, and trims the
//! stream once the new snapshot covers everything up to the recorded tail.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::application::ports::metrics::{MetricEvent, MetricsSink};
use crate::application::ports::storage::Storage;
use crate::application::ports::streams::{RoomStream, WorkerQueue};
use crate::application::services::api_client::ApiClient;
use crate::crdt;
use crate::domain::RoomKey;

/// Result of an attempted `compact_room`: `Stolen` means another consumer
/// reclaimed the task mid-wait and nothing was persisted or trimmed.
enum CompactionOutcome {
    Done,
    Stolen,
}

pub struct Compactor {
    api: Arc<ApiClient>,
    storage: Arc<dyn Storage>,
    room_stream: Arc<dyn RoomStream>,
    worker_queue: Arc<dyn WorkerQueue>,
    metrics: Arc<dyn MetricsSink>,
    consumer: String,
    min_message_lifetime: Duration,
}

impl Compactor {
    pub fn new(
        api: Arc<ApiClient>,
        storage: Arc<dyn Storage>,
        room_stream: Arc<dyn RoomStream>,
        worker_queue: Arc<dyn WorkerQueue>,
        metrics: Arc<dyn MetricsSink>,
        consumer: String,
        min_message_lifetime: Duration,
    ) -> Self {
        Self {
            api,
            storage,
            room_stream,
            worker_queue,
            metrics,
            consumer,
            min_message_lifetime,
        }
    }

    /// One iteration of the worker loop. Returns `true` if a task was
    /// claimed (whether or not compaction ended up doing any work), so the
    /// caller can decide whether to back off before the next claim.
    pub async fn run_once(&self, block_ms: u64) -> anyhow::Result<bool> {
        let Some((entry_id, room)) = self.worker_queue.claim_next(&self.consumer, block_ms).await? else {
            return Ok(false);
        };
        self.metrics.record(MetricEvent::WorkerTaskClaimed);

        match self.compact_room(&entry_id, &room).await {
            Ok(CompactionOutcome::Stolen) => {
                tracing::debug!(room = %room, "worker_compaction_task_stolen");
                return Ok(true);
            }
            Ok(CompactionOutcome::Done) => {}
            Err(e) => {
                tracing::warn!(room = %room, error = %e, "worker_compaction_failed");
                self.metrics.record(MetricEvent::WorkerCompactionFailed);
                return Ok(true);
            }
        }

        self.worker_queue.ack(&entry_id).await?;
        self.metrics.record(MetricEvent::WorkerCompactionCompleted);
        Ok(true)
    }

    /// Merges `room`'s snapshot with its stream tail and persists a fresh
    /// snapshot. After waiting out `min_message_lifetime`, re-checks that
    /// `entry_id` is still held by this consumer before trimming/persisting:
    /// if another consumer reclaimed it via `XAUTOCLAIM` while this worker
    /// slept, aborts without writing anything (`spec.md` §4.7 step 5).
    async fn compact_room(&self, entry_id: &str, room: &RoomKey) -> anyhow::Result<CompactionOutcome> {
        if self.room_stream.stream_len(room).await? == 0 {
            return Ok(CompactionOutcome::Done);
        }

        let tail = self.room_stream.read_range(room).await?;
        let Some((tail_id, _)) = tail.last().cloned() else {
            return Ok(CompactionOutcome::Done);
        };

        let wait = self
            .min_message_lifetime
            .saturating_sub(entry_age(&tail_id));
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        if self.worker_queue.current_owner(entry_id).await?.as_deref() != Some(self.consumer.as_str()) {
            return Ok(CompactionOutcome::Stolen);
        }

        let bundle = self.api.get_doc(room).await?;
        let merged = crdt::encode_state(&bundle.doc);
        let new_reference = self
            .storage
            .persist_doc(&room.room, &room.docid, &merged)
            .await?;
        self.storage
            .delete_references(&room.room, &room.docid, &bundle.references)
            .await;

        self.room_stream
            .trim_stream(room, &increment_stream_id(&tail_id))
            .await?;
        if self.room_stream.stream_len(room).await? == 0 {
            self.room_stream.delete_stream(room).await?;
        }

        tracing::debug!(room = %room, reference = %new_reference, "worker_compacted_room");
        Ok(CompactionOutcome::Done)
    }

    /// Runs `claim_next`/compact forever, backing off briefly when the
    /// queue is empty so an idle worker doesn't spin.
    pub async fn run_forever(&self, block_ms: u64) {
        loop {
            match self.run_once(block_ms).await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(Duration::from_millis(block_ms.min(250))).await,
                Err(e) => {
                    tracing::warn!(error = %e, "worker_claim_failed");
                    tokio::time::sleep(Duration::from_millis(block_ms)).await;
                }
            }
        }
    }

    /// Periodically steals tasks idle for longer than `min_idle`
    /// (`redisWorkerTimeout`), recovering from a worker crash mid-compaction
    /// (`spec.md` §8 scenario 3). Runs on its own interval, separate from
    /// `run_forever`'s claim loop.
    pub async fn run_reclaim_loop(&self, min_idle: Duration, check_every: Duration) {
        loop {
            tokio::time::sleep(check_every).await;
            match self
                .worker_queue
                .reclaim_stale(&self.consumer, min_idle.as_millis() as u64)
                .await
            {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    tracing::info!(count = reclaimed.len(), "worker_reclaimed_stale_tasks");
                    for (entry_id, room) in reclaimed {
                        match self.compact_room(&entry_id, &room).await {
                            Ok(CompactionOutcome::Stolen) => continue,
                            Ok(CompactionOutcome::Done) => {}
                            Err(e) => {
                                tracing::warn!(room = %room, error = %e, "worker_reclaim_compaction_failed");
                                continue;
                            }
                        }
                        if let Err(e) = self.worker_queue.ack(&entry_id).await {
                            tracing::warn!(room = %room, error = %e, "worker_reclaim_ack_failed");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "worker_reclaim_failed"),
            }
        }
    }
}

/// Approximates how long ago a Redis stream ID (`<ms>-<seq>`) was minted.
fn entry_age(id: &str) -> Duration {
    let ms: u128 = id
        .split('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    Duration::from_millis(now_ms.saturating_sub(ms) as u64)
}

/// The smallest ID strictly greater than `id`, used as the `MINID` bound
/// passed to `trim_stream` so entries up to and including `id` are dropped.
fn increment_stream_id(id: &str) -> String {
    match id.split_once('-') {
        Some((ms, seq)) => match seq.parse::<u64>() {
            Ok(seq) => format!("{ms}-{}", seq + 1),
            Err(_) => id.to_string(),
        },
        None => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::metrics::LoggingMetricsSink;
    use crate::infrastructure::redis::memory::{MemoryRoomStream, MemoryWorkerQueue};
    use crate::infrastructure::storage::memory::MemoryStorage;
    use yrs::{Doc, GetString, Text, Transact};

    fn make_update(text: &str) -> Vec<u8> {
        let doc = Doc::new();
        let txt = doc.get_or_insert_text("content");
        {
            let mut txn = doc.transact_mut();
            txt.push(&mut txn, text);
        }
        crdt::encode_state(&doc)
    }

    #[tokio::test]
    async fn compacts_a_dirty_room_into_a_single_snapshot() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let room_stream: Arc<dyn RoomStream> = Arc::new(MemoryRoomStream::new());
        let worker_queue: Arc<dyn WorkerQueue> = Arc::new(MemoryWorkerQueue::new());
        let api = Arc::new(ApiClient::new(
            storage.clone(),
            room_stream.clone(),
            worker_queue.clone(),
            Duration::from_millis(10),
        ));
        let room = RoomKey::with_default_doc("r1");

        api.add_update(&room, make_update("hello ")).await.unwrap();
        api.add_update(&room, make_update("world")).await.unwrap();
        worker_queue.enqueue_task(&room).await.unwrap();

        let compactor = Compactor::new(
            api,
            storage.clone(),
            room_stream.clone(),
            worker_queue,
            Arc::new(LoggingMetricsSink),
            "worker-1".to_string(),
            Duration::from_millis(0),
        );

        assert!(compactor.run_once(0).await.unwrap());

        let retrieved = storage.retrieve_doc("r1", "index").await.unwrap().unwrap();
        assert_eq!(retrieved.references.len(), 1);
        let merged = crdt::merge_updates(&[retrieved.merged]).unwrap();
        let txt = merged.get_or_insert_text("content");
        let txn = merged.transact();
        let text = txt.get_string(&txn);
        assert!(text.contains("hello"));
        assert!(text.contains("world"));

        assert_eq!(room_stream.stream_len(&room).await.unwrap(), 0);
    }

    /// `spec.md` §4.7 step 5: if another consumer reclaims the task via
    /// `XAUTOCLAIM` while this worker is waiting out `min_message_lifetime`,
    /// the original worker must abort without persisting or trimming.
    #[tokio::test]
    async fn compact_room_aborts_silently_when_task_is_stolen_mid_wait() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let room_stream: Arc<dyn RoomStream> = Arc::new(MemoryRoomStream::new());
        let worker_queue: Arc<dyn WorkerQueue> = Arc::new(MemoryWorkerQueue::new());
        let api = Arc::new(ApiClient::new(
            storage.clone(),
            room_stream.clone(),
            worker_queue.clone(),
            Duration::from_millis(0),
        ));
        let room = RoomKey::with_default_doc("r1");
        api.add_update(&room, make_update("hello")).await.unwrap();
        worker_queue.enqueue_task(&room).await.unwrap();

        let (entry_id, claimed_room) = worker_queue.claim_next("worker-a", 0).await.unwrap().unwrap();
        assert_eq!(claimed_room, room);

        // worker-b steals the task while worker-a is still "asleep".
        let reclaimed = worker_queue.reclaim_stale("worker-b", 0).await.unwrap();
        assert_eq!(reclaimed[0].0, entry_id);

        let compactor_a = Compactor::new(
            api,
            storage.clone(),
            room_stream.clone(),
            worker_queue.clone(),
            Arc::new(LoggingMetricsSink),
            "worker-a".to_string(),
            Duration::from_millis(0),
        );

        let outcome = compactor_a.compact_room(&entry_id, &room).await.unwrap();
        assert!(matches!(outcome, CompactionOutcome::Stolen));

        assert!(storage.retrieve_doc("r1", "index").await.unwrap().is_none());
        assert_eq!(room_stream.stream_len(&room).await.unwrap(), 1);

        // worker-a's run_once must not ack the entry it no longer owns.
        assert!(worker_queue.current_owner(&entry_id).await.unwrap().as_deref() == Some("worker-b"));
    }
}
