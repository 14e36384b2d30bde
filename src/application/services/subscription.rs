//! Subscription multiplexer (`spec.md` §4.5): maintains the per-gateway
//! subscription table and fans out Redis-stream entries to local clients
//! in strict per-room order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify, RwLock};

use crate::application::ports::metrics::{MetricEvent, MetricsSink};
use crate::application::ports::streams::{RoomCursor, RoomStream, StreamError};
use crate::domain::{ClientId, RoomKey};

/// Outbound frame channel for one client session, shared across every
/// room it has joined. A full channel means the session is too slow; the
/// multiplexer kicks it rather than blocking the fan-out loop for
/// everyone else (`spec.md` §4.6 backpressure).
#[derive(Clone)]
pub struct ClientHandle {
    pub sink: mpsc::Sender<Vec<u8>>,
    pub kick: Arc<Notify>,
}

struct RoomEntry {
    last_id: String,
    clients: HashMap<ClientId, ClientHandle>,
}

/// Suppresses delivering an update back to the client session that just
/// published it, per the spec's Open Question: an optional, purely
/// in-process correlation between a freshly-published stream ID and its
/// originating client. Entries are claimed (removed) on first lookup and
/// the table is capacity-bounded so an unclaimed entry cannot leak memory.
pub struct OriginRegistry {
    inner: Mutex<(HashMap<String, ClientId>, VecDeque<String>)>,
    capacity: usize,
}

impl OriginRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new((HashMap::new(), VecDeque::new())),
            capacity,
        }
    }

    pub async fn record(&self, entry_id: String, client: ClientId) {
        let mut guard = self.inner.lock().await;
        let (map, order) = &mut *guard;
        if map.len() >= self.capacity
            && let Some(oldest) = order.pop_front()
        {
            map.remove(&oldest);
        }
        order.push_back(entry_id.clone());
        map.insert(entry_id, client);
    }

    pub async fn take(&self, entry_id: &str) -> Option<ClientId> {
        let mut guard = self.inner.lock().await;
        guard.0.remove(entry_id)
    }
}

pub struct SubscriptionTable {
    rooms: RwLock<HashMap<RoomKey, RoomEntry>>,
    client_rooms: RwLock<HashMap<ClientId, HashSet<RoomKey>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            client_rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Adds `client` to `room`'s client set. Returns `true` if the room was
    /// previously absent (so the caller can trigger an immediate catch-up
    /// read before relying on the background fan-out loop).
    pub async fn subscribe(&self, room: RoomKey, client: ClientId, handle: ClientHandle) -> bool {
        let mut rooms = self.rooms.write().await;
        let is_new = !rooms.contains_key(&room);
        let entry = rooms.entry(room.clone()).or_insert_with(|| RoomEntry {
            last_id: "0".to_string(),
            clients: HashMap::new(),
        });
        entry.clients.insert(client, handle);
        drop(rooms);

        self.client_rooms
            .write()
            .await
            .entry(client)
            .or_default()
            .insert(room);
        is_new
    }

    /// Advances `room`'s last-delivered cursor to at least `id`. Called
    /// right after a freshly subscribed client's initial full-document sync
    /// succeeds, using the tail ID that snapshot is known-current as of, so
    /// the next fan-out pass doesn't redeliver entries already folded into
    /// it (`spec.md` §8 seed scenario 2). A no-op if the room is already
    /// past `id` — e.g. a concurrent subscriber's catch-up, or the fan-out
    /// loop itself, got there first; the cursor only ever moves forward.
    pub async fn catch_up(&self, room: &RoomKey, id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(entry) = rooms.get_mut(room)
            && id > entry.last_id.as_str()
        {
            entry.last_id = id.to_string();
        }
    }

    /// Removes `client` from `room`. If the room's client set becomes
    /// empty, the room itself is dropped from the table: the next read
    /// cycle no longer includes it.
    pub async fn unsubscribe(&self, room: &RoomKey, client: ClientId) {
        let mut rooms = self.rooms.write().await;
        if let Some(entry) = rooms.get_mut(room) {
            entry.clients.remove(&client);
            if entry.clients.is_empty() {
                rooms.remove(room);
            }
        }
        drop(rooms);
        if let Some(set) = self.client_rooms.write().await.get_mut(&client) {
            set.remove(room);
        }
    }

    /// Removes `client` from every room (session closure, §4.6 step 5).
    pub async fn unsubscribe_all(&self, client: ClientId) {
        let joined = self
            .client_rooms
            .write()
            .await
            .remove(&client)
            .unwrap_or_default();
        let mut rooms = self.rooms.write().await;
        for room in joined {
            if let Some(entry) = rooms.get_mut(&room) {
                entry.clients.remove(&client);
                if entry.clients.is_empty() {
                    rooms.remove(&room);
                }
            }
        }
    }

    pub async fn cursors(&self) -> Vec<RoomCursor> {
        self.rooms
            .read()
            .await
            .iter()
            .map(|(room, entry)| RoomCursor {
                room: room.clone(),
                last_id: entry.last_id.clone(),
            })
            .collect()
    }

    pub async fn client_count(&self, room: &RoomKey) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|e| e.clients.len())
            .unwrap_or(0)
    }

    /// Advances `room`'s last-delivered ID and forwards `bytes` to every
    /// subscribed client except `exclude`, in the caller's ID order. A
    /// no-op if `id` is at or below the room's current `last_id` — this is
    /// what makes it safe for both the session's immediate local broadcast
    /// and the background fan-out loop to call this for the same entry.
    pub async fn advance_and_fanout(
        &self,
        room: &RoomKey,
        id: &str,
        bytes: &[u8],
        exclude: Option<ClientId>,
        metrics: &dyn MetricsSink,
    ) {
        let mut rooms = self.rooms.write().await;
        let Some(entry) = rooms.get_mut(room) else {
            return;
        };
        if id <= entry.last_id.as_str() {
            return;
        }
        entry.last_id = id.to_string();
        Self::deliver(&mut entry.clients, bytes, exclude, metrics);
    }

    /// Forwards `bytes` to every client in `room` except `exclude`, without
    /// touching `last_id`. Used for awareness frames (`spec.md` §4.6 step
    /// 4), which never go through Redis and so carry no stream ID.
    pub async fn broadcast_local(
        &self,
        room: &RoomKey,
        bytes: &[u8],
        exclude: Option<ClientId>,
        metrics: &dyn MetricsSink,
    ) {
        let mut rooms = self.rooms.write().await;
        let Some(entry) = rooms.get_mut(room) else {
            return;
        };
        Self::deliver(&mut entry.clients, bytes, exclude, metrics);
    }

    fn deliver(
        clients: &mut HashMap<ClientId, ClientHandle>,
        bytes: &[u8],
        exclude: Option<ClientId>,
        metrics: &dyn MetricsSink,
    ) {
        let mut kicked = Vec::new();
        for (client_id, handle) in clients.iter() {
            if Some(*client_id) == exclude {
                continue;
            }
            match handle.sink.try_send(bytes.to_vec()) {
                Ok(()) => metrics.record(MetricEvent::UpdateDelivered),
                Err(_) => {
                    handle.kick.notify_one();
                    kicked.push(*client_id);
                }
            }
        }
        for client_id in kicked {
            clients.remove(&client_id);
        }
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the background loop: repeatedly reads every subscribed room via a
/// single blocking `XREAD` and fans entries out through `table`.
pub async fn run_fanout_loop(
    table: Arc<SubscriptionTable>,
    room_stream: Arc<dyn RoomStream>,
    origins: Arc<OriginRegistry>,
    metrics: Arc<dyn MetricsSink>,
    read_block_ms: u64,
) {
    loop {
        let cursors = table.cursors().await;
        if cursors.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(read_block_ms.min(250))).await;
            continue;
        }
        match room_stream.read_rooms(&cursors, read_block_ms).await {
            Ok(entries) => {
                for (room, (id, bytes)) in entries {
                    let exclude = origins.take(&id).await;
                    table
                        .advance_and_fanout(&room, &id, &bytes, exclude, metrics.as_ref())
                        .await;
                }
            }
            Err(StreamError::Backend(e)) => {
                tracing::warn!(error = ?e, "fanout_loop_read_failed");
                tokio::time::sleep(std::time::Duration::from_millis(read_block_ms)).await;
            }
        }
    }
}
