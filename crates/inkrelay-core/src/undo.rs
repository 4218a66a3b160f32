//! Undo/redo over a shared operation log.
//!
//! Undo is last-active-wins across all authors, or targeted at any past
//! operation. Redo restores operations at their original sequence; they are
//! never re-appended. Appends do not clear the undo stack, so a redo target
//! survives other authors drawing in the meantime.

use crate::oplog::OperationLog;
use crate::operation::{OperationState, Sequence};

/// A state change applied to one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flip {
    pub sequence: Sequence,
    pub previous: OperationState,
    pub state: OperationState,
}

/// Tracks the order in which tombstones were created.
#[derive(Debug, Clone, Default)]
pub struct UndoEngine {
    /// Undone sequences, most recent last.
    stack: Vec<Sequence>,
}

impl UndoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Undo `target`, or the highest-sequence active operation if `None`.
    ///
    /// Returns `None` when the target is out of range or already undone, or
    /// when no operation is active.
    pub fn undo(&mut self, log: &mut OperationLog, target: Option<Sequence>) -> Option<Flip> {
        let sequence = match target {
            Some(sequence) => sequence,
            None => log.last_active()?,
        };

        let previous = log.set_state(sequence, OperationState::Undone).ok()?;
        if previous != OperationState::Active {
            log::debug!("Undo target {} is already undone", sequence);
            return None;
        }

        self.stack.push(sequence);
        Some(Flip {
            sequence,
            previous,
            state: OperationState::Undone,
        })
    }

    /// Restore the most recently undone operation.
    pub fn redo(&mut self, log: &mut OperationLog) -> Option<Flip> {
        while let Some(sequence) = self.stack.pop() {
            match log.set_state(sequence, OperationState::Active) {
                Ok(OperationState::Undone) => {
                    return Some(Flip {
                        sequence,
                        previous: OperationState::Undone,
                        state: OperationState::Active,
                    });
                }
                // Entry no longer undone; nothing to restore for it.
                Ok(OperationState::Active) => {
                    log::debug!("Skipping stale redo entry {}", sequence);
                }
                Err(e) => {
                    log::warn!("Dropping invalid redo entry: {}", e);
                }
            }
        }
        None
    }

    pub fn can_redo(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Number of entries a bare redo could restore.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }
}
