//! Core identity types shared across every layer.
//!
//! A room is keyed by `(room, docid)`; `docid` is normally the literal
//! `"index"` and exists only so a room can later host more than one
//! document.

use std::fmt;

pub const DEFAULT_DOC_ID: &str = "index";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey {
    pub room: String,
    pub docid: String,
}

impl RoomKey {
    pub fn new(room: impl Into<String>, docid: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            docid: docid.into(),
        }
    }

    pub fn with_default_doc(room: impl Into<String>) -> Self {
        Self::new(room, DEFAULT_DOC_ID)
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room, self.docid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    pub fn can_write(self) -> bool {
        matches!(self, Permission::Write)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub permission: Permission,
}

/// An opaque CRDT update. Associative, commutative and idempotent under
/// merge; every layer above the `crdt` module treats this as a blob.
pub type UpdateBytes = Vec<u8>;

/// Identifies one client session within a single gateway process. Never
/// serialized onto the wire or into Redis; used only for in-process
/// origin-echo suppression (`spec.md` §4.5, §9 Open Question).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub uuid::Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
