//! Wire protocol between clients and the relay.
//!
//! Messages are JSON text frames tagged by `"type"`:
//! ```json
//! { "type": "join", "room": "room-id", "author_id": "a1", "display_name": "Ann" }
//! { "type": "append", "id": "a1-17", "chunk": { "points": [...], "color": {...}, "width": 4.0 } }
//! { "type": "undo", "target": "a1-17" }
//! { "type": "presence", "x": 100.0, "y": 200.0 }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::operation::{AuthorId, Operation, OperationId, SerializableColor, Sequence, StrokeChunk};

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join (or create) a room
    Join {
        room: String,
        author_id: AuthorId,
        display_name: String,
        /// Assigned from the room palette when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<SerializableColor>,
    },
    /// Leave the current room
    Leave,
    /// Append a stroke chunk
    Append { id: OperationId, chunk: StrokeChunk },
    /// Undo the given operation, or the last active one
    Undo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<OperationId>,
    },
    /// Redo the most recent undo
    Redo,
    /// Ask for a fresh full-state transfer
    SyncRequest,
    /// Cursor position (best effort)
    Presence { x: f64, y: f64 },
}

/// Messages sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authoritative baseline (unicast)
    FullState {
        room: String,
        operations: Vec<Operation>,
        users: HashMap<AuthorId, UserInfo>,
    },
    /// A newly appended operation
    Operation { operation: Operation },
    /// An operation was tombstoned
    UndoApplied { sequence: Sequence, id: OperationId },
    /// An operation was restored at its original sequence
    RedoApplied { operation: Operation },
    /// A user joined the room
    UserJoined { author_id: AuthorId, user: UserInfo },
    /// A user left the room
    UserLeft { author_id: AuthorId },
    /// Cursor position of another user
    Presence { author_id: AuthorId, x: f64, y: f64 },
    /// Request rejected
    Error { code: ErrorCode, message: String },
}

/// Display attributes of a room member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub display_name: String,
    pub color: SerializableColor,
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidMessage,
    DuplicateOperation,
    NotJoined,
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
