//! Room actors driven through the registry, as connections drive them.

use inkrelay_core::{OperationState, SerializableColor, ServerMessage, StrokeChunk};
use inkrelay_server::{Envelope, PALETTE, RoomError, RoomRegistry, ServerConfig};
use kurbo::Point;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

fn dot(x: f64) -> StrokeChunk {
    StrokeChunk::from_points(vec![Point::new(x, 0.0)], SerializableColor::black(), 2.0)
}

fn operation_count(state: &ServerMessage) -> usize {
    match state {
        ServerMessage::FullState { operations, .. } => operations.len(),
        other => panic!("expected full state, got {other:?}"),
    }
}

async fn next(rx: &mut Receiver<Envelope>) -> Envelope {
    rx.recv().await.unwrap()
}

#[tokio::test]
async fn test_ensure_room_is_idempotent() {
    let registry = RoomRegistry::default();
    let a = registry.ensure_room("lobby");
    let b = registry.ensure_room("lobby");
    let other = registry.ensure_room("studio");

    assert!(a.same_room(&b));
    assert!(!a.same_room(&other));
    assert_eq!(registry.room_count(), 2);
}

#[tokio::test]
async fn test_concurrent_ensure_room_creates_one_room() {
    let registry = std::sync::Arc::new(RoomRegistry::default());
    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.ensure_room("race") })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    assert!(handles.windows(2).all(|w| w[0].same_room(&w[1])));
    assert_eq!(registry.room_count(), 1);
}

#[tokio::test]
async fn test_join_returns_baseline_and_announces_user() {
    let registry = RoomRegistry::default();
    let room = registry.ensure_room("lobby");

    let mut ann = room.join("p1", "ann", "Ann", None).await.unwrap();
    assert_eq!(ann.user.color, SerializableColor::from_hex(PALETTE[0]).unwrap());
    room.append("p1", "a".into(), dot(0.0)).await.unwrap();
    let _ = next(&mut ann.events).await;

    let bob = room.join("p2", "bob", "Bob", None).await.unwrap();
    assert_eq!(operation_count(&bob.full_state), 1);
    match bob.full_state {
        ServerMessage::FullState { users, .. } => assert_eq!(users.len(), 2),
        other => panic!("unexpected {other:?}"),
    }

    let envelope = next(&mut ann.events).await;
    assert!(envelope.is_for("p1"));
    assert!(matches!(envelope.message, ServerMessage::UserJoined { ref author_id, .. } if author_id == "bob"));
}

#[tokio::test]
async fn test_operations_broadcast_in_sequence_order() {
    let registry = RoomRegistry::default();
    let room = registry.ensure_room("lobby");
    let mut ann = room.join("p1", "ann", "Ann", None).await.unwrap();
    let _bob = room.join("p2", "bob", "Bob", None).await.unwrap();
    let _ = next(&mut ann.events).await; // user_joined

    assert_eq!(room.append("p1", "a".into(), dot(0.0)).await, Ok(0));
    assert_eq!(room.append("p2", "b".into(), dot(1.0)).await, Ok(1));

    for expected in 0..2 {
        match next(&mut ann.events).await.message {
            ServerMessage::Operation { operation } => assert_eq!(operation.sequence, expected),
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_retroactive_undo_and_redo() {
    let registry = RoomRegistry::default();
    let room = registry.ensure_room("lobby");
    let mut ann = room.join("p1", "ann", "Ann", None).await.unwrap();
    for i in 0..3 {
        room.append("p1", format!("op-{i}"), dot(i as f64)).await.unwrap();
        let _ = next(&mut ann.events).await;
    }

    assert_eq!(room.undo("p1", None).await, Ok(Some(2)));
    assert_eq!(room.undo("p1", Some("op-0".into())).await, Ok(Some(0)));
    assert_eq!(room.redo("p1").await, Ok(Some(0)));

    assert!(matches!(next(&mut ann.events).await.message, ServerMessage::UndoApplied { sequence: 2, .. }));
    assert!(matches!(next(&mut ann.events).await.message, ServerMessage::UndoApplied { sequence: 0, .. }));
    match next(&mut ann.events).await.message {
        ServerMessage::RedoApplied { operation } => {
            assert_eq!(operation.sequence, 0);
            assert_eq!(operation.state, OperationState::Active);
        }
        other => panic!("unexpected {other:?}"),
    }

    match room.full_state().await.unwrap() {
        ServerMessage::FullState { operations, .. } => {
            let states: Vec<_> = operations.iter().map(|op| op.state).collect();
            assert_eq!(states, vec![OperationState::Active, OperationState::Active, OperationState::Undone]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_ineligible_undo_does_not_broadcast() {
    let registry = RoomRegistry::default();
    let room = registry.ensure_room("lobby");
    let mut ann = room.join("p1", "ann", "Ann", None).await.unwrap();
    room.append("p1", "a".into(), dot(0.0)).await.unwrap();
    room.undo("p1", Some("a".into())).await.unwrap();
    let _ = next(&mut ann.events).await;
    let _ = next(&mut ann.events).await;

    assert_eq!(room.undo("p1", Some("a".into())).await, Ok(None));
    assert_eq!(room.undo("p1", Some("missing".into())).await, Ok(None));
    assert_eq!(room.undo("p1", None).await, Ok(None));
    assert!(matches!(ann.events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_rejected_requests_leave_log_untouched() {
    let registry = RoomRegistry::default();
    let room = registry.ensure_room("lobby");
    room.join("p1", "ann", "Ann", None).await.unwrap();
    room.append("p1", "a".into(), dot(0.0)).await.unwrap();

    assert_eq!(
        room.append("p1", "a".into(), dot(1.0)).await,
        Err(RoomError::DuplicateOperation("a".to_string()))
    );
    assert_eq!(room.append("ghost", "b".into(), dot(1.0)).await, Err(RoomError::NotJoined));
    assert_eq!(room.append("p1", "c".into(), dot(f64::NAN)).await, Err(RoomError::MalformedChunk));

    assert_eq!(operation_count(&room.full_state().await.unwrap()), 1);
    assert_eq!(room.append("p1", "d".into(), dot(2.0)).await, Ok(1));
}

#[tokio::test]
async fn test_presence_skips_sender() {
    let registry = RoomRegistry::default();
    let room = registry.ensure_room("lobby");
    let mut ann = room.join("p1", "ann", "Ann", None).await.unwrap();
    let mut bob = room.join("p2", "bob", "Bob", None).await.unwrap();

    room.presence("p1", "ann", 3.0, 4.0);

    let envelope = next(&mut bob.presence).await;
    assert!(envelope.is_for("p2"));
    assert_eq!(
        envelope.message,
        ServerMessage::Presence {
            author_id: "ann".to_string(),
            x: 3.0,
            y: 4.0
        }
    );
    let own = next(&mut ann.presence).await;
    assert!(!own.is_for("p1"));
    assert!(matches!(bob.events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_cursor_burst_does_not_lag_log_events() {
    let registry = RoomRegistry::new(ServerConfig {
        broadcast_capacity: 16,
        ..ServerConfig::default()
    });
    let room = registry.ensure_room("lobby");
    let mut ann = room.join("p1", "ann", "Ann", None).await.unwrap();
    room.join("p2", "bob", "Bob", None).await.unwrap();
    room.append("p2", "b".into(), dot(1.0)).await.unwrap();
    for i in 0..40 {
        room.presence("p2", "bob", i as f64, 0.0);
    }

    assert!(matches!(
        next(&mut ann.events).await.message,
        ServerMessage::UserJoined { ref author_id, .. } if author_id == "bob"
    ));
    assert!(matches!(next(&mut ann.events).await.message, ServerMessage::Operation { .. }));
    assert!(matches!(ann.events.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(ann.presence.recv().await, Err(RecvError::Lagged(_))));
}

#[tokio::test]
async fn test_leave_announces_user_left() {
    let registry = RoomRegistry::default();
    let room = registry.ensure_room("lobby");
    let mut ann = room.join("p1", "ann", "Ann", None).await.unwrap();
    room.join("p2", "bob", "Bob", None).await.unwrap();
    let _ = next(&mut ann.events).await;

    room.leave("p2").await.unwrap();
    assert_eq!(
        next(&mut ann.events).await.message,
        ServerMessage::UserLeft {
            author_id: "bob".to_string()
        }
    );
    match room.full_state().await.unwrap() {
        ServerMessage::FullState { users, .. } => assert!(!users.contains_key("bob")),
        other => panic!("unexpected {other:?}"),
    }
}
