//! `RoomStream` backed by a plain Redis stream per room (`spec.md` §4.3):
//! one `XADD`-appended key per `(room, docid)`, trimmed with `XTRIM MINID`
//! once the worker has persisted a snapshot past a given ID.

use async_trait::async_trait;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::application::ports::streams::{RoomCursor, RoomStream, StreamEntry, StreamError};
use crate::domain::RoomKey;
use crate::infrastructure::redis::connection::RedisConn;

const FIELD: &str = "d";
/// Soft cap passed to `XADD ... MAXLEN ~`: approximate trimming is cheap
/// and the worker's own `XTRIM MINID` pass is the authoritative bound.
const APPROX_MAXLEN: usize = 10_000;

pub struct RedisRoomStream {
    conn: RedisConn,
}

impl RedisRoomStream {
    pub fn new(conn: RedisConn) -> Self {
        Self { conn }
    }

    fn key(&self, room: &RoomKey) -> String {
        self.conn.room_stream_key(&room.room, &room.docid)
    }
}

#[async_trait]
impl RoomStream for RedisRoomStream {
    async fn publish(&self, room: &RoomKey, update: Vec<u8>) -> Result<String, StreamError> {
        let mut conn = self.conn.manager.clone();
        conn.xadd_maxlen(
            self.key(room),
            StreamMaxlen::Approx(APPROX_MAXLEN),
            "*",
            &[(FIELD, update)],
        )
        .await
        .map_err(|e| StreamError::Backend(e.into()))
    }

    async fn read_rooms(
        &self,
        cursors: &[RoomCursor],
        block_ms: u64,
    ) -> Result<Vec<(RoomKey, StreamEntry)>, StreamError> {
        if cursors.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = cursors.iter().map(|c| self.key(&c.room)).collect();
        let ids: Vec<&str> = cursors.iter().map(|c| c.last_id.as_str()).collect();
        let opts = StreamReadOptions::default().block(block_ms as usize);

        let mut conn = self.conn.manager.clone();
        let reply: StreamReadReply = conn
            .xread_options(&keys, &ids, &opts)
            .await
            .map_err(|e| StreamError::Backend(e.into()))?;

        let mut out = Vec::new();
        for stream_key in reply.keys {
            let Some(cursor) = cursors.iter().find(|c| self.key(&c.room) == stream_key.key) else {
                continue;
            };
            for id in stream_key.ids {
                let Some(bytes) = id
                    .map
                    .get(FIELD)
                    .and_then(|v| redis::from_redis_value::<Vec<u8>>(v).ok())
                else {
                    continue;
                };
                out.push((cursor.room.clone(), (id.id, bytes)));
            }
        }
        Ok(out)
    }

    async fn read_range(&self, room: &RoomKey) -> Result<Vec<StreamEntry>, StreamError> {
        let mut conn = self.conn.manager.clone();
        let reply: StreamReadReply = redis::cmd("XRANGE")
            .arg(self.key(room))
            .arg("-")
            .arg("+")
            .query_async(&mut conn)
            .await
            .map_err(|e| StreamError::Backend(e.into()))?;

        let mut out = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                let Some(bytes) = id
                    .map
                    .get(FIELD)
                    .and_then(|v| redis::from_redis_value::<Vec<u8>>(v).ok())
                else {
                    continue;
                };
                out.push((id.id, bytes));
            }
        }
        Ok(out)
    }

    async fn trim_stream(&self, room: &RoomKey, upto_id: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.manager.clone();
        let _: i64 = redis::cmd("XTRIM")
            .arg(self.key(room))
            .arg("MINID")
            .arg(upto_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| StreamError::Backend(e.into()))?;
        Ok(())
    }

    async fn stream_len(&self, room: &RoomKey) -> Result<u64, StreamError> {
        let mut conn = self.conn.manager.clone();
        conn.xlen(self.key(room))
            .await
            .map_err(|e| StreamError::Backend(e.into()))
    }

    async fn delete_stream(&self, room: &RoomKey) -> Result<(), StreamError> {
        let mut conn = self.conn.manager.clone();
        let _: i64 = conn
            .del(self.key(room))
            .await
            .map_err(|e| StreamError::Backend(e.into()))?;
        Ok(())
    }
}
