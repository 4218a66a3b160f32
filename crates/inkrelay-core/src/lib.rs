//! InkRelay Core Library
//!
//! The synchronization and reconstruction engine for a shared drawing
//! surface: the authoritative per-room operation log, undo/redo over it, and
//! snapshot-accelerated canvas reconstruction on the client.

pub mod collaboration;
pub mod operation;
pub mod oplog;
pub mod presence;
pub mod protocol;
pub mod reconstruct;
pub mod renderer;
pub mod snapshot;
pub mod undo;

#[cfg(not(target_arch = "wasm32"))]
pub mod transport;

pub use collaboration::{CollaborationSession, SessionConfig, SyncEvent};
pub use operation::{AuthorId, Operation, OperationId, OperationState, SerializableColor, Sequence, StrokeChunk, Tool};
pub use oplog::{LogError, LogResult, OperationLog};
pub use presence::{PresenceTracker, RemoteCursor};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage, UserInfo};
pub use reconstruct::{ApplyOutcome, EngineConfig, ReconstructionEngine, RenderStats};
pub use renderer::Renderer;
pub use snapshot::{Snapshot, SnapshotCache};
pub use undo::{Flip, UndoEngine};

#[cfg(not(target_arch = "wasm32"))]
pub use transport::{ConnectionState, NativeTransport, TransportError, TransportEvent};
