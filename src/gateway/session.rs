//! Per-connection WebSocket session (`spec.md` §4.6): handshake/auth, the
//! sync-step-1/update/awareness message loop, backpressure, and liveness.

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::application::ports::auth::AuthError;
use crate::application::ports::metrics::MetricEvent;
use crate::application::services::subscription::ClientHandle;
use crate::crdt;
use crate::domain::{ClientId, RoomKey};
use crate::gateway::state::GatewayState;
use crate::protocol::{self, Frame, MessageKind, ProtocolError};

const CLOSE_AUTH_FAILED: u16 = 4001;
const CLOSE_PROTOCOL_ERROR: u16 = 1003;
const CLOSE_SLOW_CONSUMER: u16 = 1008;

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })))
        .await;
}

pub async fn run(room: String, token: Option<String>, mut socket: WebSocket, state: GatewayState) {
    let actor = match state.auth.check(token.as_deref(), &room).await {
        Ok(actor) => actor,
        Err(e) => {
            tracing::info!(room = %room, error = ?e, "gateway_auth_failed");
            close_with(&mut socket, CLOSE_AUTH_FAILED, auth_reason(&e)).await;
            return;
        }
    };

    let client_id = ClientId::new();
    let room_key = RoomKey::with_default_doc(&room);
    state.metrics.record(MetricEvent::SessionOpened);

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(state.outbound_buffer_size);
    let kick = Arc::new(tokio::sync::Notify::new());
    let handle = ClientHandle {
        sink: tx,
        kick: kick.clone(),
    };
    state
        .table
        .subscribe(room_key.clone(), client_id, handle)
        .await;

    match send_initial_sync(&mut socket, &state, &room_key).await {
        Ok(tail_id) => {
            state.table.catch_up(&room_key, &tail_id).await;
        }
        Err(e) => {
            tracing::warn!(room = %room, error = %e, "gateway_initial_sync_failed");
        }
    }

    let (mut ws_sink, mut ws_stream) = socket.split();
    let mut ping_tick = interval(state.ping_interval);
    ping_tick.tick().await; // first tick fires immediately; discard it
    let mut missed_pongs = 0u32;

    let close_code;
    loop {
        tokio::select! {
            biased;

            _ = kick.notified() => {
                close_code = CLOSE_SLOW_CONSUMER;
                break;
            }

            _ = ping_tick.tick() => {
                if missed_pongs >= 2 {
                    close_code = 1001;
                    break;
                }
                if ws_sink.send(Message::Ping(Vec::new())).await.is_err() {
                    close_code = 1001;
                    break;
                }
                missed_pongs += 1;
            }

            outgoing = rx.recv() => {
                match outgoing {
                    Some(bytes) => {
                        let frame = protocol::encode_frame(MessageKind::Update, &bytes);
                        if ws_sink.send(Message::Binary(frame)).await.is_err() {
                            close_code = 1001;
                            break;
                        }
                    }
                    None => {
                        close_code = 1001;
                        break;
                    }
                }
            }

            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => {
                        match handle_client_frames(&bytes, &state, &room_key, client_id, &actor, &mut ws_sink).await {
                            Ok(()) => {}
                            Err(_) => {
                                close_code = CLOSE_PROTOCOL_ERROR;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        close_code = 1000;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(room = %room, error = %e, "gateway_socket_error");
                        close_code = 1001;
                        break;
                    }
                }
            }
        }
    }

    state.table.unsubscribe(&room_key, client_id).await;
    state
        .metrics
        .record(MetricEvent::SessionClosed { code: close_code });
    let mut ws_socket = ws_sink.reunite(ws_stream).ok();
    if let Some(ref mut socket) = ws_socket {
        close_with(socket, close_code, "bye").await;
    }
}

fn auth_reason(e: &AuthError) -> &'static str {
    match e {
        AuthError::MissingToken => "missing token",
        AuthError::InvalidToken => "invalid token",
        AuthError::RoomDenied => "room denied",
    }
}

/// Sends the new subscriber's full-document catch-up snapshot and returns
/// the stream ID it is known-current as of, so the caller can advance the
/// subscription cursor past it (`spec.md` §8 seed scenario 2).
async fn send_initial_sync(
    socket: &mut WebSocket,
    state: &GatewayState,
    room_key: &RoomKey,
) -> anyhow::Result<String> {
    let bundle = state.api.get_doc(room_key).await?;
    let payload = crdt::encode_state(&bundle.doc);
    let frame = protocol::encode_frame(MessageKind::Update, &payload);
    socket.send(Message::Binary(frame)).await?;
    Ok(bundle.tail_id)
}

async fn handle_client_frames(
    bytes: &[u8],
    state: &GatewayState,
    room_key: &RoomKey,
    client_id: ClientId,
    actor: &crate::domain::Actor,
    ws_sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
) -> Result<(), ProtocolError> {
    let frames = protocol::decode_frames(bytes)?;
    for frame in frames {
        handle_one_frame(frame, state, room_key, client_id, actor, ws_sink).await;
    }
    Ok(())
}

async fn handle_one_frame(
    frame: Frame,
    state: &GatewayState,
    room_key: &RoomKey,
    client_id: ClientId,
    actor: &crate::domain::Actor,
    ws_sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
) {
    match frame.kind {
        MessageKind::SyncStep1 => {
            let Ok(bundle) = state.api.get_doc(room_key).await else {
                return;
            };
            let reply = if frame.payload.is_empty() {
                crdt::encode_state(&bundle.doc)
            } else {
                crdt::diff_since(&bundle.doc, &frame.payload).unwrap_or_else(|_| crdt::encode_state(&bundle.doc))
            };
            let out = protocol::encode_frame(MessageKind::Update, &reply);
            let _ = ws_sink.send(Message::Binary(out)).await;
        }
        MessageKind::Update => {
            if !actor.permission.can_write() {
                tracing::debug!(client = %client_id, "gateway_update_denied_read_only");
                return;
            }
            match state.api.add_update(room_key, frame.payload.clone()).await {
                Ok(entry_id) => {
                    state.origins.record(entry_id.clone(), client_id).await;
                    state
                        .table
                        .advance_and_fanout(
                            room_key,
                            &entry_id,
                            &frame.payload,
                            Some(client_id),
                            state.metrics.as_ref(),
                        )
                        .await;
                    state.metrics.record(MetricEvent::UpdatePublished);
                }
                Err(e) => {
                    tracing::warn!(room = %room_key, error = %e, "gateway_add_update_failed");
                }
            }
        }
        MessageKind::Awareness => {
            state
                .table
                .broadcast_local(room_key, &frame.payload, Some(client_id), state.metrics.as_ref())
                .await;
        }
        MessageKind::AuthRequest | MessageKind::AuthReply => {
            // Handled during the handshake only; ignored mid-session.
        }
    }
}
