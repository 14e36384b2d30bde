//! `WorkerQueue` backed by a single Redis stream with a consumer group
//! (`spec.md` §4.7): every compactor process reads with `XREADGROUP`, so
//! Redis itself guarantees at most one worker holds a given room at a time
//! until it acks or its claim is stolen via `XAUTOCLAIM`.

use async_trait::async_trait;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::application::ports::streams::{StreamError, WorkerQueue};
use crate::domain::RoomKey;
use crate::infrastructure::redis::connection::RedisConn;

const ROOM_FIELD: &str = "room";
const DOCID_FIELD: &str = "docid";

pub struct RedisWorkerQueue {
    conn: RedisConn,
}

impl RedisWorkerQueue {
    pub fn new(conn: RedisConn) -> Self {
        Self { conn }
    }

    fn decode_room(map: &std::collections::HashMap<String, redis::Value>) -> Option<RoomKey> {
        let room: String = map.get(ROOM_FIELD).and_then(|v| redis::from_redis_value(v).ok())?;
        let docid: String = map.get(DOCID_FIELD).and_then(|v| redis::from_redis_value(v).ok())?;
        Some(RoomKey::new(room, docid))
    }
}

#[async_trait]
impl WorkerQueue for RedisWorkerQueue {
    async fn enqueue_task(&self, room: &RoomKey) -> Result<(), StreamError> {
        let mut conn = self.conn.manager.clone();
        let _: String = conn
            .xadd(
                self.conn.worker_queue_key(),
                "*",
                &[(ROOM_FIELD, room.room.as_str()), (DOCID_FIELD, room.docid.as_str())],
            )
            .await
            .map_err(|e| StreamError::Backend(e.into()))?;
        Ok(())
    }

    async fn ensure_group(&self) -> Result<(), StreamError> {
        let mut conn = self.conn.manager.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.conn.worker_queue_key())
            .arg(self.conn.worker_group())
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(StreamError::Backend(e.into())),
        }
    }

    async fn claim_next(
        &self,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Option<(String, RoomKey)>, StreamError> {
        let mut conn = self.conn.manager.clone();
        let opts = StreamReadOptions::default()
            .group(self.conn.worker_group(), consumer)
            .count(1)
            .block(block_ms as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[self.conn.worker_queue_key()], &[">"], &opts)
            .await
            .map_err(|e| StreamError::Backend(e.into()))?;

        for stream_key in reply.keys {
            for id in stream_key.ids {
                if let Some(room) = Self::decode_room(&id.map) {
                    return Ok(Some((id.id, room)));
                }
            }
        }
        Ok(None)
    }

    async fn ack(&self, entry_id: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.manager.clone();
        let _: i64 = conn
            .xack(self.conn.worker_queue_key(), self.conn.worker_group(), &[entry_id])
            .await
            .map_err(|e| StreamError::Backend(e.into()))?;
        let _: i64 = conn
            .xdel(self.conn.worker_queue_key(), &[entry_id])
            .await
            .map_err(|e| StreamError::Backend(e.into()))?;
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        consumer: &str,
        min_idle_ms: u64,
    ) -> Result<Vec<(String, RoomKey)>, StreamError> {
        let mut conn = self.conn.manager.clone();
        let mut claimed = Vec::new();
        let mut start_id = "0-0".to_string();

        loop {
            let reply: (String, Vec<(String, std::collections::HashMap<String, redis::Value>)>, Vec<String>) =
                redis::cmd("XAUTOCLAIM")
                    .arg(self.conn.worker_queue_key())
                    .arg(self.conn.worker_group())
                    .arg(consumer)
                    .arg(min_idle_ms)
                    .arg(&start_id)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| StreamError::Backend(e.into()))?;

            let (next_id, entries, _deleted) = reply;
            for (entry_id, fields) in &entries {
                if let Some(room) = Self::decode_room(fields) {
                    claimed.push((entry_id.clone(), room));
                }
            }
            if next_id == "0-0" || entries.is_empty() {
                break;
            }
            start_id = next_id;
        }
        Ok(claimed)
    }

    async fn current_owner(&self, entry_id: &str) -> Result<Option<String>, StreamError> {
        let mut conn = self.conn.manager.clone();
        let reply: Vec<(String, String, i64, i64)> = redis::cmd("XPENDING")
            .arg(self.conn.worker_queue_key())
            .arg(self.conn.worker_group())
            .arg(entry_id)
            .arg(entry_id)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| StreamError::Backend(e.into()))?;
        Ok(reply.into_iter().next().map(|(_, consumer, _, _)| consumer))
    }
}
