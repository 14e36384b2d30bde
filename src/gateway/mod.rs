pub mod session;
pub mod state;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

pub use state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// `ws(s)://host:port/{room}?token=...` (`spec.md` §6).
pub async fn axum_ws_entry(
    Path(room): Path<String>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(room, query.token, socket, state))
}

pub fn routes(state: GatewayState) -> Router {
    Router::new()
        .route("/:room", get(axum_ws_entry))
        .with_state(state)
}
