//! Client-side collaboration session.
//!
//! Bridges local input and the relay: gestures are drawn optimistically and
//! sent as chunked `append` requests, authoritative broadcasts are applied to
//! the [`ReconstructionEngine`], and any broadcast that does not line up with
//! local state triggers a full-state transfer instead of an incremental merge.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kurbo::Point;
use uuid::Uuid;

use crate::operation::{AuthorId, OperationId, OperationState, SerializableColor, Sequence, StrokeChunk, Tool};
use crate::presence::{DEFAULT_PRESENCE_TTL, PresenceTracker};
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage, UserInfo};
use crate::reconstruct::{ApplyOutcome, EngineConfig, ReconstructionEngine};
use crate::renderer::Renderer;

/// Default number of points per sent chunk.
pub const DEFAULT_POINTS_PER_CHUNK: usize = 6;

/// Session tuning.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub engine: EngineConfig,
    /// Points per chunk when batching a gesture (minimum 2).
    pub points_per_chunk: usize,
    pub presence_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            points_per_chunk: DEFAULT_POINTS_PER_CHUNK,
            presence_ttl: DEFAULT_PRESENCE_TTL,
        }
    }
}

/// What happened when a server message was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Baseline received
    JoinedRoom { room: String, operation_count: usize, user_count: usize },
    /// A new operation was appended
    OperationApplied { sequence: Sequence },
    /// An operation was undone or redone
    OperationStateChanged { sequence: Sequence, state: OperationState },
    /// Local state diverged; a full transfer was requested
    Resynchronizing { expected: Sequence, got: Sequence },
    UserJoined { author_id: AuthorId },
    UserLeft { author_id: AuthorId },
    PresenceUpdated { author_id: AuthorId },
    /// Request rejected by the relay
    Error { code: ErrorCode, message: String },
}

/// A gesture being drawn and not yet fully sent.
#[derive(Debug, Clone)]
struct Gesture {
    color: SerializableColor,
    width: f64,
    tool: Tool,
    /// Unsent points; starts with the last point of the previous chunk.
    points: Vec<Point>,
    sent_any: bool,
}

impl Gesture {
    fn chunk(&self, points: Vec<Point>) -> StrokeChunk {
        StrokeChunk::from_points(points, self.color, self.width).with_tool(self.tool)
    }
}

/// One client's view of a room.
pub struct CollaborationSession<R: Renderer> {
    engine: ReconstructionEngine<R>,
    config: SessionConfig,
    author_id: AuthorId,
    display_name: String,
    color: Option<SerializableColor>,
    /// Current room ID (if joined).
    current_room: Option<String>,
    users: HashMap<AuthorId, UserInfo>,
    presence: PresenceTracker,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
    gesture: Option<Gesture>,
    /// A sync request is in flight; log broadcasts are dropped until the
    /// full state arrives.
    resyncing: bool,
}

impl<R: Renderer> CollaborationSession<R> {
    pub fn new(
        renderer: R,
        author_id: impl Into<AuthorId>,
        display_name: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            engine: ReconstructionEngine::new(renderer, config.engine),
            config,
            author_id: author_id.into(),
            display_name: display_name.into(),
            color: None,
            current_room: None,
            users: HashMap::new(),
            presence: PresenceTracker::new(config.presence_ttl),
            outgoing: Vec::new(),
            gesture: None,
            resyncing: false,
        }
    }

    /// Request a specific user color instead of a palette assignment.
    pub fn with_color(mut self, color: SerializableColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn author_id(&self) -> &str {
        &self.author_id
    }

    pub fn engine(&self) -> &ReconstructionEngine<R> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ReconstructionEngine<R> {
        &mut self.engine
    }

    pub fn users(&self) -> &HashMap<AuthorId, UserInfo> {
        &self.users
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    // --- Room/Connection Management ---

    pub fn current_room(&self) -> Option<&str> {
        self.current_room.as_deref()
    }

    pub fn is_in_room(&self) -> bool {
        self.current_room.is_some()
    }

    /// Request to join a room. The room becomes current once its full state
    /// arrives.
    pub fn join_room(&mut self, room: &str) {
        self.queue(&ClientMessage::Join {
            room: room.to_string(),
            author_id: self.author_id.clone(),
            display_name: self.display_name.clone(),
            color: self.color,
        });
    }

    /// Leave the current room and drop its local state.
    pub fn leave_room(&mut self) {
        if self.current_room.take().is_some() {
            self.queue(&ClientMessage::Leave);
            self.discard_local_state();
            self.users.clear();
        }
    }

    /// Call after the transport reconnects. Unacknowledged local work is
    /// discarded and the room is re-joined for a full-state transfer.
    pub fn on_reconnected(&mut self) {
        // Requests queued for the old connection would reach the relay before
        // the join and be rejected.
        self.outgoing.clear();
        self.discard_local_state();
        if let Some(room) = self.current_room.clone() {
            log::info!("Reconnected; rejoining room {}", room);
            self.join_room(&room);
        }
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    // --- Drawing ---

    /// Start a gesture at `point`. Returns false when not in a room.
    pub fn begin_stroke(&mut self, point: Point, color: SerializableColor, width: f64, tool: Tool) -> bool {
        if self.current_room.is_none() {
            return false;
        }
        let gesture = Gesture {
            color,
            width,
            tool,
            points: vec![point],
            sent_any: false,
        };
        self.engine.draw_preview(&gesture.chunk(vec![point]));
        self.gesture = Some(gesture);
        true
    }

    /// Extend the current gesture, sending a chunk once enough points gather.
    pub fn extend_stroke(&mut self, point: Point) {
        let Some(gesture) = self.gesture.as_mut() else {
            return;
        };
        let last = gesture.points.last().copied().unwrap_or(point);
        gesture.points.push(point);
        let segment = gesture.chunk(vec![last, point]);
        let ready = gesture.points.len() >= self.config.points_per_chunk.max(2);

        self.engine.draw_preview(&segment);
        if ready {
            self.flush_gesture();
        }
    }

    /// Finish the current gesture, sending any remaining points.
    pub fn end_stroke(&mut self) {
        let needs_flush = self
            .gesture
            .as_ref()
            .is_some_and(|g| g.points.len() > 1 || !g.sent_any);
        if needs_flush {
            self.flush_gesture();
        }
        self.gesture = None;
    }

    pub fn is_drawing(&self) -> bool {
        self.gesture.is_some()
    }

    fn flush_gesture(&mut self) {
        let Some(gesture) = self.gesture.as_mut() else {
            return;
        };
        let Some(&carry) = gesture.points.last() else {
            return;
        };
        let points = std::mem::replace(&mut gesture.points, vec![carry]);
        gesture.sent_any = true;
        let chunk = gesture.chunk(points);

        // Drawn again in full: a redraw since the preview may have wiped it.
        let id = Uuid::new_v4().to_string();
        self.engine.draw_local(id.clone(), chunk.clone());
        self.queue(&ClientMessage::Append { id, chunk });
    }

    // --- Undo/Redo ---

    /// Undo a specific operation, or the last active one in the room.
    pub fn request_undo(&mut self, target: Option<OperationId>) {
        if self.current_room.is_some() {
            self.queue(&ClientMessage::Undo { target });
        }
    }

    pub fn request_redo(&mut self) {
        if self.current_room.is_some() {
            self.queue(&ClientMessage::Redo);
        }
    }

    /// Redraw from the log, reconciling any optimistic drawing.
    pub fn redraw(&mut self) {
        self.engine.render();
    }

    // --- Presence ---

    /// Send the local cursor position. Never queued for retry.
    pub fn set_cursor(&mut self, x: f64, y: f64) {
        if self.current_room.is_some() {
            self.queue(&ClientMessage::Presence { x, y });
        }
    }

    /// Hide remote cursors that went quiet. Returns who was hidden.
    pub fn expire_presence(&mut self, now: Instant) -> Vec<AuthorId> {
        self.presence.expire(now)
    }

    // --- Incoming Message Handling ---

    /// Handle an incoming server message.
    pub fn handle_message(&mut self, json: &str) -> Option<SyncEvent> {
        self.handle_message_at(json, Instant::now())
    }

    /// Handle an incoming server message received at `now`.
    pub fn handle_message_at(&mut self, json: &str, now: Instant) -> Option<SyncEvent> {
        let msg: ServerMessage = match serde_json::from_str(json) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Failed to parse server message: {}", e);
                return None;
            }
        };

        match msg {
            ServerMessage::FullState { room, operations, users } => {
                let operation_count = operations.len();
                if let Err(e) = self.engine.load_full_state(operations) {
                    log::warn!("Rejected full state for room {}: {}", room, e);
                    return Some(SyncEvent::Error {
                        code: ErrorCode::InvalidMessage,
                        message: e.to_string(),
                    });
                }
                self.gesture = None;
                self.resyncing = false;
                let user_count = users.len();
                self.users = users;
                self.current_room = Some(room.clone());
                Some(SyncEvent::JoinedRoom {
                    room,
                    operation_count,
                    user_count,
                })
            }
            ServerMessage::Operation { .. } | ServerMessage::UndoApplied { .. } | ServerMessage::RedoApplied { .. }
                if self.resyncing =>
            {
                None
            }
            ServerMessage::Operation { operation } => {
                let sequence = operation.sequence;
                match self.engine.apply_operation(operation) {
                    Ok(ApplyOutcome::Applied) => Some(SyncEvent::OperationApplied { sequence }),
                    Ok(ApplyOutcome::Ignored) => None,
                    Ok(ApplyOutcome::Stale { expected, got }) => Some(self.resync(expected, got)),
                    Err(e) => {
                        log::warn!("Failed to apply operation {}: {}", sequence, e);
                        Some(self.resync(self.engine.log().len(), sequence))
                    }
                }
            }
            ServerMessage::UndoApplied { sequence, id } => {
                self.apply_state(sequence, &id, OperationState::Undone)
            }
            ServerMessage::RedoApplied { operation } => {
                self.apply_state(operation.sequence, &operation.id, OperationState::Active)
            }
            ServerMessage::UserJoined { author_id, user } => {
                self.users.insert(author_id.clone(), user);
                Some(SyncEvent::UserJoined { author_id })
            }
            ServerMessage::UserLeft { author_id } => {
                self.users.remove(&author_id);
                self.presence.remove(&author_id);
                Some(SyncEvent::UserLeft { author_id })
            }
            ServerMessage::Presence { author_id, x, y } => {
                if author_id == self.author_id {
                    return None;
                }
                self.presence.update(author_id.clone(), Point::new(x, y), now);
                Some(SyncEvent::PresenceUpdated { author_id })
            }
            ServerMessage::Error { code, message } => {
                log::warn!("Relay error ({:?}): {}", code, message);
                Some(SyncEvent::Error { code, message })
            }
        }
    }

    fn apply_state(&mut self, sequence: Sequence, id: &str, state: OperationState) -> Option<SyncEvent> {
        match self.engine.apply_state(sequence, Some(id), state) {
            Ok(ApplyOutcome::Applied) => Some(SyncEvent::OperationStateChanged { sequence, state }),
            Ok(ApplyOutcome::Ignored) => None,
            Ok(ApplyOutcome::Stale { expected, got }) => Some(self.resync(expected, got)),
            Err(e) => {
                log::warn!("Failed to apply state change at {}: {}", sequence, e);
                Some(self.resync(self.engine.log().len(), sequence))
            }
        }
    }

    /// Drop local state and ask for a full transfer.
    fn resync(&mut self, expected: Sequence, got: Sequence) -> SyncEvent {
        log::info!(
            "Out of sync (expected sequence {}, got {}); requesting full state",
            expected,
            got
        );
        self.discard_local_state();
        self.resyncing = true;
        self.queue(&ClientMessage::SyncRequest);
        SyncEvent::Resynchronizing { expected, got }
    }

    fn discard_local_state(&mut self) {
        self.engine.reset();
        self.presence.clear();
        self.gesture = None;
        self.resyncing = false;
    }

    fn queue(&mut self, msg: &ClientMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::warn!("Failed to encode client message: {}", e),
        }
    }
}
