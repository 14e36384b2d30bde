//! Redis stream client boundary (`spec.md` §4.3), split into the room
//! fan-out stream and the worker task queue because the two ride different
//! Redis primitives (a plain stream vs. a consumer group). Defined as
//! traits so tests can substitute an in-memory fake bus with the same
//! ordering and at-least-once semantics, without a live Redis server.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::RoomKey;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("redis error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// One delivered stream entry: its Redis stream ID and raw payload.
pub type StreamEntry = (String, Vec<u8>);

/// A room currently of interest to `read_rooms`, identified by the last
/// ID already delivered (`"0"` means "from the beginning").
#[derive(Debug, Clone)]
pub struct RoomCursor {
    pub room: RoomKey,
    pub last_id: String,
}

#[async_trait]
pub trait RoomStream: Send + Sync {
    /// `XADD` with a `MAXLEN ~` trim hint. Returns the assigned stream ID.
    async fn publish(&self, room: &RoomKey, update: Vec<u8>) -> Result<String, StreamError>;

    /// Single `XREAD` across every `cursor.room`, blocking up to
    /// `block_ms`. Returns an empty list on timeout. Preserves per-stream
    /// ordering; never skips an entry on reconnect.
    async fn read_rooms(
        &self,
        cursors: &[RoomCursor],
        block_ms: u64,
    ) -> Result<Vec<(RoomKey, StreamEntry)>, StreamError>;

    /// `XRANGE` `-`..`+`: full replay of a room's stream, used by the API
    /// client to merge the stream tail on top of the latest snapshot.
    async fn read_range(&self, room: &RoomKey) -> Result<Vec<StreamEntry>, StreamError>;

    /// `XTRIM MINID`.
    async fn trim_stream(&self, room: &RoomKey, upto_id: &str) -> Result<(), StreamError>;

    /// `XLEN`.
    async fn stream_len(&self, room: &RoomKey) -> Result<u64, StreamError>;

    /// Deletes the stream key entirely (only valid once `stream_len` is 0).
    async fn delete_stream(&self, room: &RoomKey) -> Result<(), StreamError>;
}

#[async_trait]
pub trait WorkerQueue: Send + Sync {
    /// `XADD` onto the worker task stream.
    async fn enqueue_task(&self, room: &RoomKey) -> Result<(), StreamError>;

    /// `XGROUP CREATE ... MKSTREAM`, tolerating `BUSYGROUP`.
    async fn ensure_group(&self) -> Result<(), StreamError>;

    /// `XREADGROUP GROUP worker <consumer> COUNT 1 BLOCK block_ms`.
    async fn claim_next(
        &self,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Option<(String, RoomKey)>, StreamError>;

    /// `XACK` + `XDEL`.
    async fn ack(&self, entry_id: &str) -> Result<(), StreamError>;

    /// `XAUTOCLAIM`: steals tasks idle for at least `min_idle_ms`, for the
    /// crash-recovery seed scenario (`spec.md` §8 scenario 3).
    async fn reclaim_stale(
        &self,
        consumer: &str,
        min_idle_ms: u64,
    ) -> Result<Vec<(String, RoomKey)>, StreamError>;

    /// The consumer currently holding `entry_id` in the consumer group's
    /// pending-entries list, if any (`XPENDING` with an exact ID range).
    /// Used to detect, after waiting out `redisMinMessageLifetime`, whether
    /// a task was reclaimed out from under this worker by another consumer
    /// (`spec.md` §4.7 step 5).
    async fn current_owner(&self, entry_id: &str) -> Result<Option<String>, StreamError>;
}
