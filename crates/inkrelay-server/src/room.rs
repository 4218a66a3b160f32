//! Room state and the task that owns it.
//!
//! Each room is an actor: one task owns the [`Room`] and processes
//! [`RoomCommand`]s from a bounded queue in arrival order. That single
//! serialized path gives every append/undo/redo in a room a total order
//! without locks. Rooms are independent and run in parallel.

use std::collections::HashMap;

use inkrelay_core::{
    AuthorId, ErrorCode, LogError, Operation, OperationId, OperationLog, SerializableColor, Sequence, ServerMessage,
    StrokeChunk, UndoEngine, UserInfo,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;

/// Connection-scoped peer identifier.
pub type PeerId = String;

/// Colors handed out to members that do not pick one.
pub const PALETTE: [&str; 10] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6", "#bcf60c", "#fabebe",
];

/// Room request errors. None of them mutate the log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Duplicate operation id: {0}")]
    DuplicateOperation(OperationId),
    #[error("Malformed stroke chunk")]
    MalformedChunk,
    #[error("Peer has not joined the room")]
    NotJoined,
    #[error("Room is no longer running")]
    Closed,
    #[error(transparent)]
    Log(LogError),
}

impl RoomError {
    /// Wire code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::DuplicateOperation(_) => ErrorCode::DuplicateOperation,
            RoomError::NotJoined => ErrorCode::NotJoined,
            RoomError::MalformedChunk | RoomError::Closed | RoomError::Log(_) => ErrorCode::InvalidMessage,
        }
    }
}

impl From<LogError> for RoomError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::DuplicateOperation(id) => RoomError::DuplicateOperation(id),
            other => RoomError::Log(other),
        }
    }
}

/// A message fanned out to room members.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: PeerId,
    /// Do not deliver back to `from`.
    pub skip_sender: bool,
    pub message: ServerMessage,
}

impl Envelope {
    /// Whether `peer_id` should receive this message.
    pub fn is_for(&self, peer_id: &str) -> bool {
        !(self.skip_sender && self.from == peer_id)
    }
}

/// Authoritative state of one room.
#[derive(Debug)]
pub struct Room {
    id: String,
    log: OperationLog,
    undo: UndoEngine,
    users: HashMap<AuthorId, UserInfo>,
    /// Connected peers and the author each speaks for.
    members: HashMap<PeerId, AuthorId>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            log: OperationLog::new(),
            undo: UndoEngine::new(),
            users: HashMap::new(),
            members: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn users(&self) -> &HashMap<AuthorId, UserInfo> {
        &self.users
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Attach a peer. Returns the user entry it now speaks for.
    pub fn join(
        &mut self,
        peer_id: &str,
        author_id: &str,
        display_name: &str,
        color: Option<SerializableColor>,
    ) -> UserInfo {
        let color = color
            .or_else(|| self.users.get(author_id).map(|u| u.color))
            .unwrap_or_else(|| self.assign_color());
        let user = UserInfo {
            display_name: display_name.to_string(),
            color,
        };
        self.users.insert(author_id.to_string(), user.clone());
        self.members.insert(peer_id.to_string(), author_id.to_string());
        user
    }

    /// Detach a peer. Returns the author if no other peer still speaks for it.
    pub fn leave(&mut self, peer_id: &str) -> Option<AuthorId> {
        let author = self.members.remove(peer_id)?;
        if self.members.values().any(|a| *a == author) {
            return None;
        }
        self.users.remove(&author);
        Some(author)
    }

    /// Append a chunk on behalf of a joined peer.
    pub fn append(&mut self, peer_id: &str, id: OperationId, chunk: StrokeChunk) -> Result<Operation, RoomError> {
        let author = self.members.get(peer_id).ok_or(RoomError::NotJoined)?.clone();
        if !chunk.is_well_formed() {
            return Err(RoomError::MalformedChunk);
        }
        Ok(self.log.append(id, author, chunk)?.clone())
    }

    /// Undo the operation with id `target`, or the last active one.
    ///
    /// `Ok(None)` means nothing was eligible and nothing changed.
    pub fn undo(&mut self, peer_id: &str, target: Option<&str>) -> Result<Option<(Sequence, OperationId)>, RoomError> {
        if !self.members.contains_key(peer_id) {
            return Err(RoomError::NotJoined);
        }
        let sequence = match target {
            Some(id) => match self.log.sequence_of(id) {
                Some(sequence) => Some(sequence),
                None => return Ok(None),
            },
            None => None,
        };
        let Some(flip) = self.undo.undo(&mut self.log, sequence) else {
            return Ok(None);
        };
        let op = self.log.get(flip.sequence)?;
        Ok(Some((op.sequence, op.id.clone())))
    }

    /// Restore the most recently undone operation at its original sequence.
    pub fn redo(&mut self, peer_id: &str) -> Result<Option<Operation>, RoomError> {
        if !self.members.contains_key(peer_id) {
            return Err(RoomError::NotJoined);
        }
        let Some(flip) = self.undo.redo(&mut self.log) else {
            return Ok(None);
        };
        Ok(Some(self.log.get(flip.sequence)?.clone()))
    }

    /// Authoritative baseline for a joining or resynchronizing client.
    pub fn full_state(&self) -> ServerMessage {
        ServerMessage::FullState {
            room: self.id.clone(),
            operations: self.log.operations().to_vec(),
            users: self.users.clone(),
        }
    }

    /// First palette color no current user has, or black.
    fn assign_color(&self) -> SerializableColor {
        PALETTE
            .iter()
            .filter_map(|hex| SerializableColor::from_hex(hex))
            .find(|c| !self.users.values().any(|u| u.color == *c))
            .unwrap_or_else(SerializableColor::black)
    }
}

/// Requests processed by a room task.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        peer_id: PeerId,
        author_id: AuthorId,
        display_name: String,
        color: Option<SerializableColor>,
        reply: oneshot::Sender<JoinTicket>,
    },
    Leave {
        peer_id: PeerId,
    },
    Append {
        peer_id: PeerId,
        id: OperationId,
        chunk: StrokeChunk,
        reply: oneshot::Sender<Result<Sequence, RoomError>>,
    },
    Undo {
        peer_id: PeerId,
        target: Option<OperationId>,
        reply: oneshot::Sender<Result<Option<Sequence>, RoomError>>,
    },
    Redo {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<Option<Sequence>, RoomError>>,
    },
    FullState {
        reply: oneshot::Sender<ServerMessage>,
    },
}

/// What a peer gets back from joining.
#[derive(Debug)]
pub struct JoinTicket {
    /// Room broadcasts issued after `full_state` was taken.
    pub events: broadcast::Receiver<Envelope>,
    /// Cursor positions. Lossy and kept apart from `events`.
    pub presence: broadcast::Receiver<Envelope>,
    pub full_state: ServerMessage,
    pub user: UserInfo,
}

/// Cheap, cloneable handle to a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: String,
    commands: mpsc::Sender<RoomCommand>,
    presence: broadcast::Sender<Envelope>,
}

impl RoomHandle {
    /// Start a room task. Must be called within a Tokio runtime.
    pub fn spawn(id: &str, config: &ServerConfig) -> Self {
        let (commands, rx) = mpsc::channel(config.room_queue_capacity);
        let (events, _) = broadcast::channel(config.broadcast_capacity);
        let (presence, _) = broadcast::channel(config.broadcast_capacity);
        tokio::spawn(run_room(Room::new(id), rx, events, presence.clone()));
        info!("Created room {}", id);
        Self {
            id: id.to_string(),
            commands,
            presence,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether both handles refer to the same room task.
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.commands.same_channel(&other.commands)
    }

    pub async fn join(
        &self,
        peer_id: &str,
        author_id: &str,
        display_name: &str,
        color: Option<SerializableColor>,
    ) -> Result<JoinTicket, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Join {
            peer_id: peer_id.to_string(),
            author_id: author_id.to_string(),
            display_name: display_name.to_string(),
            color,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    pub async fn leave(&self, peer_id: &str) -> Result<(), RoomError> {
        self.send(RoomCommand::Leave {
            peer_id: peer_id.to_string(),
        })
        .await
    }

    pub async fn append(&self, peer_id: &str, id: OperationId, chunk: StrokeChunk) -> Result<Sequence, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Append {
            peer_id: peer_id.to_string(),
            id,
            chunk,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    pub async fn undo(&self, peer_id: &str, target: Option<OperationId>) -> Result<Option<Sequence>, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Undo {
            peer_id: peer_id.to_string(),
            target,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    pub async fn redo(&self, peer_id: &str) -> Result<Option<Sequence>, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Redo {
            peer_id: peer_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    pub async fn full_state(&self) -> Result<ServerMessage, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::FullState { reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    /// Relay a cursor position to the other members.
    ///
    /// Bypasses the room queue and uses its own channel, so a burst of
    /// cursor moves never pushes log broadcasts out of a member's buffer.
    pub fn presence(&self, peer_id: &str, author_id: &str, x: f64, y: f64) {
        let _ = self.presence.send(Envelope {
            from: peer_id.to_string(),
            skip_sender: true,
            message: ServerMessage::Presence {
                author_id: author_id.to_string(),
                x,
                y,
            },
        });
    }

    async fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.commands.send(command).await.map_err(|_| RoomError::Closed)
    }
}

async fn run_room(
    mut room: Room,
    mut commands: mpsc::Receiver<RoomCommand>,
    events: broadcast::Sender<Envelope>,
    presence: broadcast::Sender<Envelope>,
) {
    while let Some(command) = commands.recv().await {
        handle_command(&mut room, command, &events, &presence);
    }
    debug!("Room {} stopped", room.id());
}

fn broadcast(events: &broadcast::Sender<Envelope>, from: &str, skip_sender: bool, message: ServerMessage) {
    // No subscribers is not an error: the room simply has no members.
    let _ = events.send(Envelope {
        from: from.to_string(),
        skip_sender,
        message,
    });
}

fn handle_command(
    room: &mut Room,
    command: RoomCommand,
    events: &broadcast::Sender<Envelope>,
    presence: &broadcast::Sender<Envelope>,
) {
    match command {
        RoomCommand::Join {
            peer_id,
            author_id,
            display_name,
            color,
            reply,
        } => {
            let user = room.join(&peer_id, &author_id, &display_name, color);
            broadcast(
                events,
                &peer_id,
                true,
                ServerMessage::UserJoined {
                    author_id: author_id.clone(),
                    user: user.clone(),
                },
            );
            // Nothing else is broadcast until this command returns, so the
            // receiver picks up exactly where the baseline ends.
            let rx = events.subscribe();
            let full_state = room.full_state();
            info!("Peer {} ({}) joined room {}", peer_id, author_id, room.id());
            let _ = reply.send(JoinTicket {
                events: rx,
                presence: presence.subscribe(),
                full_state,
                user,
            });
        }
        RoomCommand::Leave { peer_id } => {
            if let Some(author_id) = room.leave(&peer_id) {
                broadcast(events, &peer_id, true, ServerMessage::UserLeft { author_id });
            }
            info!("Peer {} left room {}", peer_id, room.id());
        }
        RoomCommand::Append {
            peer_id,
            id,
            chunk,
            reply,
        } => {
            let result = room.append(&peer_id, id, chunk).map(|operation| {
                let sequence = operation.sequence;
                broadcast(events, &peer_id, false, ServerMessage::Operation { operation });
                sequence
            });
            if let Err(ref e) = result {
                warn!("Rejected append from {} in room {}: {}", peer_id, room.id(), e);
            }
            let _ = reply.send(result);
        }
        RoomCommand::Undo { peer_id, target, reply } => {
            let result = room.undo(&peer_id, target.as_deref()).map(|applied| {
                applied.map(|(sequence, id)| {
                    broadcast(events, &peer_id, false, ServerMessage::UndoApplied { sequence, id });
                    sequence
                })
            });
            if matches!(result, Ok(None)) {
                debug!("Undo {:?} in room {} had no eligible target", target, room.id());
            }
            let _ = reply.send(result);
        }
        RoomCommand::Redo { peer_id, reply } => {
            let result = room.redo(&peer_id).map(|restored| {
                restored.map(|operation| {
                    let sequence = operation.sequence;
                    broadcast(events, &peer_id, false, ServerMessage::RedoApplied { operation });
                    sequence
                })
            });
            if matches!(result, Ok(None)) {
                debug!("Redo in room {} had nothing to restore", room.id());
            }
            let _ = reply.send(result);
        }
        RoomCommand::FullState { reply } => {
            let _ = reply.send(room.full_state());
        }
    }
}
