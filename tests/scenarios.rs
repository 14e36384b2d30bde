//! Cross-component scenarios from `spec.md` §8, run against the in-memory
//! `Storage`/`RoomStream`/`WorkerQueue` fakes so the suite needs no live
//! Redis or object store. Each test drives the same public services the
//! gateway and worker binaries wire together in `bootstrap::app_context`.

use std::sync::Arc;
use std::time::Duration;

use roomsync::application::ports::storage::Storage;
use roomsync::application::ports::streams::{RoomCursor, RoomStream, WorkerQueue};
use roomsync::application::services::api_client::ApiClient;
use roomsync::application::services::subscription::{ClientHandle, OriginRegistry, SubscriptionTable};
use roomsync::crdt;
use roomsync::domain::{ClientId, RoomKey};
use roomsync::infrastructure::redis::memory::{MemoryRoomStream, MemoryWorkerQueue};
use roomsync::infrastructure::storage::memory::MemoryStorage;
use roomsync::worker::Compactor;
use roomsync::application::ports::metrics::LoggingMetricsSink;

use tokio::sync::{mpsc, Notify};
use yrs::{Doc, GetString, Text, Transact};

fn text_update(existing: Option<&Doc>, text: &str) -> (Doc, Vec<u8>) {
    let doc = existing.cloned().unwrap_or_default();
    let txt = doc.get_or_insert_text("content");
    {
        let mut txn = doc.transact_mut();
        txt.push(&mut txn, text);
    }
    let bytes = crdt::encode_state(&doc);
    (doc, bytes)
}

fn doc_text(doc: &Doc) -> String {
    let txt = doc.get_or_insert_text("content");
    let txn = doc.transact();
    txt.get_string(&txn)
}

struct Harness {
    api: Arc<ApiClient>,
    storage: Arc<dyn Storage>,
    room_stream: Arc<dyn RoomStream>,
    worker_queue: Arc<dyn WorkerQueue>,
}

impl Harness {
    fn new(min_message_lifetime: Duration) -> Self {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let room_stream: Arc<dyn RoomStream> = Arc::new(MemoryRoomStream::new());
        let worker_queue: Arc<dyn WorkerQueue> = Arc::new(MemoryWorkerQueue::new());
        let api = Arc::new(ApiClient::new(
            storage.clone(),
            room_stream.clone(),
            worker_queue.clone(),
            min_message_lifetime,
        ));
        Self {
            api,
            storage,
            room_stream,
            worker_queue,
        }
    }

    fn compactor(&self, consumer: &str, min_message_lifetime: Duration) -> Compactor {
        Compactor::new(
            self.api.clone(),
            self.storage.clone(),
            self.room_stream.clone(),
            self.worker_queue.clone(),
            Arc::new(LoggingMetricsSink),
            consumer.to_string(),
            min_message_lifetime,
        )
    }

    /// Delivers every stream entry newer than `table`'s per-room cursor to
    /// its subscribed clients, mimicking one iteration of
    /// `subscription::run_fanout_loop` without spinning up a background task.
    async fn pump_fanout(&self, table: &SubscriptionTable, origins: &OriginRegistry) {
        let cursors: Vec<RoomCursor> = table.cursors().await;
        let entries = self.room_stream.read_rooms(&cursors, 0).await.unwrap();
        for (room, (id, bytes)) in entries {
            let exclude = origins.take(&id).await;
            table
                .advance_and_fanout(&room, &id, &bytes, exclude, &LoggingMetricsSink)
                .await;
        }
    }
}

fn client_handle() -> (ClientHandle, mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel(32);
    (
        ClientHandle {
            sink: tx,
            kick: Arc::new(Notify::new()),
        },
        rx,
    )
}

/// Scenario 1 (`spec.md` §8): two clients converge on a room, the stream
/// drains to empty once a worker compacts it, and a late joiner sees the
/// fully merged state with exactly one live snapshot reference.
#[tokio::test]
async fn sync_and_cleanup() {
    let h = Harness::new(Duration::from_millis(0));
    let room = RoomKey::with_default_doc("r1");

    let table = SubscriptionTable::new();
    let origins = OriginRegistry::new(64);
    let (handle_b, mut rx_b) = client_handle();
    let client_b = ClientId::new();
    table.subscribe(room.clone(), client_b, handle_b).await;

    let (_doc, update) = text_update(None, "a=1");
    let entry_id = h.api.add_update(&room, update).await.unwrap();
    let author = ClientId::new();
    origins.record(entry_id.clone(), author).await;

    h.pump_fanout(&table, &origins).await;
    let delivered = rx_b.try_recv().expect("B observes a=1");
    let delivered_doc = crdt::merge_updates(&[delivered]).unwrap();
    assert_eq!(doc_text(&delivered_doc), "a=1");

    assert_eq!(h.room_stream.stream_len(&room).await.unwrap(), 1);

    let compactor = h.compactor("w1", Duration::from_millis(0));
    assert!(compactor.run_once(0).await.unwrap());

    assert_eq!(h.room_stream.stream_len(&room).await.unwrap(), 0);

    let client_c = ClientId::new();
    let (handle_c, _rx_c) = client_handle();
    table.subscribe(room.clone(), client_c, handle_c).await;
    let bundle_c = h.api.get_doc(&room).await.unwrap();
    assert_eq!(doc_text(&bundle_c.doc), "a=1");
    assert_eq!(bundle_c.references.len(), 1);

    let (doc2, update2) = text_update(None, "a=2");
    let entry_id2 = h.api.add_update(&room, update2).await.unwrap();
    origins.record(entry_id2, author).await;
    h.pump_fanout(&table, &origins).await;
    let delivered2 = rx_b.try_recv().expect("B observes a=2");
    let delivered2_doc = crdt::merge_updates(&[delivered2]).unwrap();
    assert_eq!(doc_text(&delivered2_doc), doc_text(&doc2));
}

/// Scenario 2: a late subscriber's `get_doc` reflects every update written
/// before it joined, with no duplicate application (merge is idempotent).
#[tokio::test]
async fn late_subscriber_catch_up() {
    let h = Harness::new(Duration::from_secs(3600));
    let room = RoomKey::with_default_doc("r1");

    let mut doc = Doc::new();
    for i in 0..100 {
        let (next_doc, update) = text_update(Some(&doc), &format!("{i},"));
        doc = next_doc;
        h.api.add_update(&room, update).await.unwrap();
    }

    let bundle = h.api.get_doc(&room).await.unwrap();
    assert_eq!(doc_text(&bundle.doc), doc_text(&doc));

    // Re-reading must not duplicate anything: merge is idempotent.
    let bundle_again = h.api.get_doc(&room).await.unwrap();
    assert_eq!(doc_text(&bundle_again.doc), doc_text(&doc));
}

/// Scenario 3: a worker that claims a task and disappears before acking
/// leaves it reclaimable; a second worker finishes the compaction and only
/// one snapshot reference survives.
#[tokio::test]
async fn worker_crash_mid_compaction_is_reclaimed() {
    let h = Harness::new(Duration::from_millis(0));
    let room = RoomKey::with_default_doc("r1");

    let (_doc, update) = text_update(None, "hello");
    h.api.add_update(&room, update).await.unwrap();

    // Simulate the dead worker: it claims the task (moving it to the PEL)
    // but never acks.
    let dead = h.compactor("dead-worker", Duration::from_millis(0));
    let (entry_id, claimed_room) = h.worker_queue.claim_next("dead-worker", 0).await.unwrap().unwrap();
    assert_eq!(claimed_room, room);
    drop(dead);

    // A live worker reclaims the stale task after the claim TTL elapses.
    let live = h.compactor("live-worker", Duration::from_millis(0));
    let reclaimed = h
        .worker_queue
        .reclaim_stale("live-worker", 0)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].0, entry_id);

    for (id, room) in reclaimed {
        assert!(h.room_stream.stream_len(&room).await.unwrap() > 0);
        let storage = h.storage.clone();
        let room_stream = h.room_stream.clone();
        let api = h.api.clone();
        let merged = api.get_doc(&room).await.unwrap();
        let reference = storage
            .persist_doc(&room.room, &room.docid, &crdt::encode_state(&merged.doc))
            .await
            .unwrap();
        storage
            .delete_references(&room.room, &room.docid, &merged.references)
            .await;
        room_stream.trim_stream(&room, "9999999999999-0").await.unwrap();
        if room_stream.stream_len(&room).await.unwrap() == 0 {
            room_stream.delete_stream(&room).await.unwrap();
        }
        h.worker_queue.ack(&id).await.unwrap();
        let retrieved = storage.retrieve_doc(&room.room, &room.docid).await.unwrap().unwrap();
        assert_eq!(retrieved.references, vec![reference]);
    }

    assert!(h.worker_queue.claim_next("any", 0).await.unwrap().is_none());
    let _ = live;
}

/// Scenario 4: two independent gateways (two `SubscriptionTable`s) sharing
/// the same Redis-backed room stream converge: a write on gateway G1 is
/// observed exactly once by a client on gateway G2, and never re-delivered
/// to the author.
#[tokio::test]
async fn two_gateways_one_room_converge_without_double_delivery() {
    let h = Harness::new(Duration::from_secs(3600));
    let room = RoomKey::with_default_doc("r1");

    let table_g1 = SubscriptionTable::new();
    let table_g2 = SubscriptionTable::new();
    let origins = OriginRegistry::new(64);

    let client_a = ClientId::new();
    let (handle_a, mut rx_a) = client_handle();
    table_g1.subscribe(room.clone(), client_a, handle_a).await;

    let client_b = ClientId::new();
    let (handle_b, mut rx_b) = client_handle();
    table_g2.subscribe(room.clone(), client_b, handle_b).await;

    let (_doc, update) = text_update(None, "u");
    let entry_id = h.api.add_update(&room, update).await.unwrap();
    origins.record(entry_id, client_a).await;

    h.pump_fanout(&table_g1, &origins).await;
    h.pump_fanout(&table_g2, &origins).await;

    assert!(rx_b.try_recv().is_ok(), "B receives u within one read cycle");
    assert!(rx_a.try_recv().is_err(), "A is never delivered its own update");

    // A second fanout pass must not re-deliver the already-seen entry.
    h.pump_fanout(&table_g1, &origins).await;
    h.pump_fanout(&table_g2, &origins).await;
    assert!(rx_b.try_recv().is_err());
}

/// Scenario 2 (duplicate-delivery regression): a client joining a room with
/// existing history receives the full snapshot via `get_doc`, and the
/// subscription cursor is advanced to that snapshot's tail before the next
/// fanout pass runs — mirroring what `gateway::session::run` does by calling
/// `SubscriptionTable::catch_up` right after `send_initial_sync` succeeds.
/// Without that advance, this fanout pass would redeliver every historical
/// entry the joiner already has via the snapshot.
#[tokio::test]
async fn late_subscriber_does_not_replay_history_already_in_its_snapshot() {
    let h = Harness::new(Duration::from_secs(3600));
    let room = RoomKey::with_default_doc("r1");

    let (_doc, update1) = text_update(None, "a=1");
    h.api.add_update(&room, update1).await.unwrap();
    let (_doc, update2) = text_update(None, "a=2");
    h.api.add_update(&room, update2).await.unwrap();

    let table = SubscriptionTable::new();
    let origins = OriginRegistry::new(64);
    let joiner = ClientId::new();
    let (handle, mut rx) = client_handle();
    table.subscribe(room.clone(), joiner, handle).await;

    // Mirrors gateway::session::run: send the snapshot, then advance the
    // cursor to the stream ID it is known-current as of.
    let bundle = h.api.get_doc(&room).await.unwrap();
    table.catch_up(&room, &bundle.tail_id).await;

    // The fan-out loop's next pass must not redeliver the two entries
    // already folded into the snapshot the joiner just received.
    h.pump_fanout(&table, &origins).await;
    assert!(
        rx.try_recv().is_err(),
        "joiner must not be sent history already covered by its initial snapshot"
    );

    // A genuinely new update still reaches it.
    let (_doc3, update3) = text_update(None, "a=3");
    let entry_id = h.api.add_update(&room, update3).await.unwrap();
    origins.record(entry_id, ClientId::new()).await;
    h.pump_fanout(&table, &origins).await;
    assert!(rx.try_recv().is_ok(), "joiner still receives updates after catch-up");
}

/// Without the `catch_up` call, the same setup would redeliver history: this
/// documents the bug the fix above closes.
#[tokio::test]
async fn subscribing_without_catch_up_replays_history_once() {
    let h = Harness::new(Duration::from_secs(3600));
    let room = RoomKey::with_default_doc("r1");

    let (_doc, update1) = text_update(None, "a=1");
    h.api.add_update(&room, update1).await.unwrap();

    let table = SubscriptionTable::new();
    let origins = OriginRegistry::new(64);
    let joiner = ClientId::new();
    let (handle, mut rx) = client_handle();
    table.subscribe(room.clone(), joiner, handle).await;
    let _bundle = h.api.get_doc(&room).await.unwrap(); // snapshot sent, cursor left at "0"

    h.pump_fanout(&table, &origins).await;
    assert!(
        rx.try_recv().is_ok(),
        "cursor left at 0 re-delivers the entry already in the snapshot"
    );
}

/// Scenario 5: a slow client with a full outbound buffer is kicked rather
/// than blocking delivery to the rest of the room.
#[tokio::test]
async fn backpressure_kicks_slow_client_without_blocking_peers() {
    let table = SubscriptionTable::new();
    let room = RoomKey::with_default_doc("r1");

    let slow = ClientId::new();
    let (slow_tx, _slow_rx) = mpsc::channel::<Vec<u8>>(1);
    let kick = Arc::new(Notify::new());
    table
        .subscribe(
            room.clone(),
            slow,
            ClientHandle {
                sink: slow_tx.clone(),
                kick: kick.clone(),
            },
        )
        .await;
    slow_tx.try_send(vec![0]).unwrap(); // fill the slow client's buffer

    let fast = ClientId::new();
    let (fast_handle, mut fast_rx) = client_handle();
    table.subscribe(room.clone(), fast, fast_handle).await;

    table
        .advance_and_fanout(&room, "1-0", b"payload", None, &LoggingMetricsSink)
        .await;

    assert!(fast_rx.try_recv().is_ok(), "fast client is not blocked by the slow one");
    assert_eq!(table.client_count(&room).await, 1, "slow client was removed");
}

/// Scenario 6: awareness frames never touch the room stream or storage, so
/// they vanish across a disconnect/reconnect while document state survives.
#[tokio::test]
async fn awareness_is_never_persisted() {
    let h = Harness::new(Duration::from_millis(0));
    let room = RoomKey::with_default_doc("r1");

    let table = SubscriptionTable::new();
    let client = ClientId::new();
    let (handle, mut rx) = client_handle();
    table.subscribe(room.clone(), client, handle).await;

    let peer = ClientId::new();
    let (peer_handle, mut peer_rx) = client_handle();
    table.subscribe(room.clone(), peer, peer_handle).await;

    table
        .broadcast_local(&room, b"cursor-at-42", Some(peer), &LoggingMetricsSink)
        .await;
    assert_eq!(rx.try_recv().unwrap(), b"cursor-at-42");
    assert!(peer_rx.try_recv().is_err());

    // "Reconnect": a fresh subscription table and a fresh get_doc call see
    // no trace of the awareness broadcast, because it never reached the
    // stream or storage.
    assert_eq!(h.room_stream.stream_len(&room).await.unwrap(), 0);
    let bundle = h.api.get_doc(&room).await.unwrap();
    assert_eq!(doc_text(&bundle.doc), "");
}
