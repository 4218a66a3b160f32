//! Per-connection message loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use inkrelay_core::{AuthorId, ClientMessage, ErrorCode, ServerMessage};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::room::{Envelope, PeerId, RoomError, RoomHandle};

/// The room a connection is attached to.
struct Membership {
    room: RoomHandle,
    author_id: AuthorId,
    events: broadcast::Receiver<Envelope>,
    presence: broadcast::Receiver<Envelope>,
}

/// Next item from one of the room's two streams.
enum RoomMessage {
    Event(Result<Envelope, RecvError>),
    Presence(Result<Envelope, RecvError>),
}

/// Serve one WebSocket client until it disconnects.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id: PeerId = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => handle_client_message(&state, &peer_id, &mut membership, client_msg).await,
                            Err(e) => {
                                warn!("Invalid message from {}: {}", peer_id, e);
                                vec![ServerMessage::error(ErrorCode::InvalidMessage, format!("Invalid message: {}", e))]
                            }
                        };
                        if send_all(&mut sender, &replies).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let err = ServerMessage::error(ErrorCode::InvalidMessage, "Binary frames are not supported");
                        if send_message(&mut sender, &err).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                }
            }

            message = next_room_message(&mut membership) => {
                let replies = match message {
                    RoomMessage::Event(event) => {
                        let Some(ref m) = membership else { continue };
                        match room_event_replies(&m.room, &peer_id, event).await {
                            Some(replies) => replies,
                            None => {
                                warn!("Room closed under peer {}", peer_id);
                                membership = None;
                                continue;
                            }
                        }
                    }
                    RoomMessage::Presence(Ok(envelope)) if envelope.is_for(&peer_id) => vec![envelope.message],
                    RoomMessage::Presence(Ok(_)) => Vec::new(),
                    RoomMessage::Presence(Err(RecvError::Lagged(skipped))) => {
                        debug!("Peer {} dropped {} cursor updates", peer_id, skipped);
                        Vec::new()
                    }
                    RoomMessage::Presence(Err(RecvError::Closed)) => {
                        membership = None;
                        continue;
                    }
                };
                if send_all(&mut sender, &replies).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(m) = membership.take() {
        let _ = m.room.leave(&peer_id).await;
    }
    info!("Connection closed: {}", peer_id);
}

async fn next_room_message(membership: &mut Option<Membership>) -> RoomMessage {
    match membership {
        Some(m) => tokio::select! {
            biased;
            event = m.events.recv() => RoomMessage::Event(event),
            cursor = m.presence.recv() => RoomMessage::Presence(cursor),
        },
        None => std::future::pending().await,
    }
}

/// What to send for one item of the room's log stream. `None` once the room
/// is gone.
///
/// A lagged receiver has lost log mutations, so the whole baseline is resent.
pub(crate) async fn room_event_replies(
    room: &RoomHandle,
    peer_id: &str,
    event: Result<Envelope, RecvError>,
) -> Option<Vec<ServerMessage>> {
    match event {
        Ok(envelope) if envelope.is_for(peer_id) => Some(vec![envelope.message]),
        Ok(_) => Some(Vec::new()),
        Err(RecvError::Lagged(skipped)) => {
            warn!("Peer {} lagged by {} messages, resending full state", peer_id, skipped);
            match room.full_state().await {
                Ok(full_state) => Some(vec![full_state]),
                Err(e) => {
                    warn!("Full state for {} failed: {}", peer_id, e);
                    Some(Vec::new())
                }
            }
        }
        Err(RecvError::Closed) => None,
    }
}

/// Apply one client request. Returns the unicast replies for the sender.
async fn handle_client_message(
    state: &AppState,
    peer_id: &str,
    membership: &mut Option<Membership>,
    msg: ClientMessage,
) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::Join {
            room,
            author_id,
            display_name,
            color,
        } => {
            if let Some(old) = membership.take() {
                let _ = old.room.leave(peer_id).await;
            }
            let handle = state.registry.ensure_room(&room);
            match handle.join(peer_id, &author_id, &display_name, color).await {
                Ok(ticket) => {
                    *membership = Some(Membership {
                        room: handle,
                        author_id,
                        events: ticket.events,
                        presence: ticket.presence,
                    });
                    vec![ticket.full_state]
                }
                Err(e) => vec![room_error(&e)],
            }
        }
        ClientMessage::Leave => {
            if let Some(old) = membership.take() {
                let _ = old.room.leave(peer_id).await;
            }
            Vec::new()
        }
        ClientMessage::Presence { x, y } => {
            if let Some(m) = membership {
                m.room.presence(peer_id, &m.author_id, x, y);
            }
            Vec::new()
        }
        request => {
            let Some(m) = membership else {
                return vec![ServerMessage::error(ErrorCode::NotJoined, RoomError::NotJoined.to_string())];
            };
            let result = match request {
                ClientMessage::Append { id, chunk } => m.room.append(peer_id, id, chunk).await.map(|_| None),
                ClientMessage::Undo { target } => m.room.undo(peer_id, target).await.map(|_| None),
                ClientMessage::Redo => m.room.redo(peer_id).await.map(|_| None),
                ClientMessage::SyncRequest => m.room.full_state().await.map(Some),
                other => {
                    debug!("Unhandled message from {}: {:?}", peer_id, other);
                    Ok(None)
                }
            };
            match result {
                Ok(reply) => reply.into_iter().collect(),
                Err(e) => vec![room_error(&e)],
            }
        }
    }
}

fn room_error(e: &RoomError) -> ServerMessage {
    ServerMessage::error(e.code(), e.to_string())
}

async fn send_all(sender: &mut SplitSink<WebSocket, Message>, messages: &[ServerMessage]) -> Result<(), axum::Error> {
    for message in messages {
        send_message(sender, message).await?;
    }
    Ok(())
}

async fn send_message(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            error!("Failed to serialize {:?}: {}", message, e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::RoomRegistry;
    use inkrelay_core::{SerializableColor, StrokeChunk};
    use kurbo::Point;

    fn dot(x: f64) -> StrokeChunk {
        StrokeChunk::from_points(vec![Point::new(x, 0.0)], SerializableColor::black(), 2.0)
    }

    #[tokio::test]
    async fn test_lagged_member_gets_full_state() {
        let registry = RoomRegistry::new(ServerConfig {
            broadcast_capacity: 2,
            ..ServerConfig::default()
        });
        let room = registry.ensure_room("lobby");
        let mut ann = room.join("p1", "ann", "Ann", None).await.unwrap();
        for i in 0..5 {
            room.append("p1", format!("op-{i}"), dot(i as f64)).await.unwrap();
        }

        let event = ann.events.recv().await;
        assert!(matches!(event, Err(RecvError::Lagged(_))));
        let replies = room_event_replies(&room, "p1", event).await.unwrap();
        match &replies[..] {
            [ServerMessage::FullState { operations, .. }] => assert_eq!(operations.len(), 5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_own_skipped_envelope_sends_nothing() {
        let registry = RoomRegistry::default();
        let room = registry.ensure_room("lobby");
        let envelope = Envelope {
            from: "p1".to_string(),
            skip_sender: true,
            message: ServerMessage::UserLeft {
                author_id: "ann".to_string(),
            },
        };
        assert_eq!(room_event_replies(&room, "p1", Ok(envelope.clone())).await, Some(Vec::new()));
        assert_eq!(room_event_replies(&room, "p2", Ok(envelope.clone())).await, Some(vec![envelope.message]));
        assert_eq!(room_event_replies(&room, "p1", Err(RecvError::Closed)).await, None);
    }
}
