//! Authentication and per-room authorization, abstracted as an interface
//! (`spec.md` §1): `AuthCheck(token, room) -> {userid, permission}`.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Actor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token does not grant access to this room")]
    RoomDenied,
}

#[async_trait]
pub trait AuthCheck: Send + Sync {
    async fn check(&self, token: Option<&str>, room: &str) -> Result<Actor, AuthError>;
}
