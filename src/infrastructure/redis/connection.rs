//! Shared `ConnectionManager` wrapper: the manager reconnects transparently
//! on dropped sockets, so every stream client clones the same handle
//! rather than pooling connections itself.

use redis::aio::ConnectionManager;
use redis::Client;

#[derive(Clone)]
pub struct RedisConn {
    pub manager: ConnectionManager,
    pub key_prefix: String,
}

impl RedisConn {
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager,
            key_prefix: key_prefix.into(),
        })
    }

    pub fn room_stream_key(&self, room: &str, docid: &str) -> String {
        format!("{}:room:{}:{}", self.key_prefix, room, docid)
    }

    pub fn worker_queue_key(&self) -> String {
        format!("{}:worker", self.key_prefix)
    }

    pub fn worker_group(&self) -> &'static str {
        "worker"
    }
}
