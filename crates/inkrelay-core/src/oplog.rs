//! Append-only, densely indexed operation log.
//!
//! Operations are never removed: undo flips an operation's state to
//! [`OperationState::Undone`] in place. This keeps `operations[i].sequence == i`
//! for the lifetime of the log, which is what lets snapshots be keyed by
//! sequence.

use std::collections::HashMap;

use thiserror::Error;

use crate::operation::{AuthorId, Operation, OperationId, OperationState, Sequence, StrokeChunk};

/// Operation log errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    #[error("Duplicate operation id: {0}")]
    DuplicateOperation(OperationId),
    #[error("Sequence {sequence} out of range (log length {len})")]
    IndexOutOfRange { sequence: Sequence, len: usize },
    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: Sequence, got: Sequence },
}

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// A room's ordered operation history.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    operations: Vec<Operation>,
    /// Operation id -> sequence.
    ids: HashMap<OperationId, Sequence>,
    active: usize,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from a transferred operation list.
    ///
    /// The list must be dense (`operations[i].sequence == i`) with unique ids.
    pub fn from_operations(operations: Vec<Operation>) -> LogResult<Self> {
        let mut log = Self::new();
        for op in operations {
            log.insert(op)?;
        }
        Ok(log)
    }

    /// Assign the next sequence to a new active operation and append it.
    pub fn append(
        &mut self,
        id: impl Into<OperationId>,
        author_id: impl Into<AuthorId>,
        payload: StrokeChunk,
    ) -> LogResult<&Operation> {
        let id = id.into();
        if self.ids.contains_key(&id) {
            return Err(LogError::DuplicateOperation(id));
        }

        let sequence = self.operations.len();
        self.ids.insert(id.clone(), sequence);
        self.operations.push(Operation {
            id,
            sequence,
            author_id: author_id.into(),
            payload,
            state: OperationState::Active,
        });
        self.active += 1;

        Ok(&self.operations[sequence])
    }

    /// Append an operation whose sequence was assigned elsewhere.
    ///
    /// Used by replicas mirroring the authoritative log: the operation must
    /// land exactly at the end.
    pub fn insert(&mut self, op: Operation) -> LogResult<()> {
        let expected = self.operations.len();
        if op.sequence != expected {
            return Err(LogError::SequenceGap {
                expected,
                got: op.sequence,
            });
        }
        if self.ids.contains_key(&op.id) {
            return Err(LogError::DuplicateOperation(op.id));
        }

        self.ids.insert(op.id.clone(), op.sequence);
        if op.is_active() {
            self.active += 1;
        }
        self.operations.push(op);
        Ok(())
    }

    pub fn get(&self, sequence: Sequence) -> LogResult<&Operation> {
        self.operations
            .get(sequence)
            .ok_or(LogError::IndexOutOfRange {
                sequence,
                len: self.operations.len(),
            })
    }

    /// Look up the sequence of an operation by id.
    pub fn sequence_of(&self, id: &str) -> Option<Sequence> {
        self.ids.get(id).copied()
    }

    /// Set the tombstone state of an operation, returning the previous state.
    ///
    /// Setting the state an operation already has is a no-op.
    pub fn set_state(&mut self, sequence: Sequence, state: OperationState) -> LogResult<OperationState> {
        let len = self.operations.len();
        let op = self
            .operations
            .get_mut(sequence)
            .ok_or(LogError::IndexOutOfRange { sequence, len })?;

        let previous = op.state;
        if previous != state {
            op.state = state;
            match state {
                OperationState::Active => self.active += 1,
                OperationState::Undone => self.active -= 1,
            }
        }
        Ok(previous)
    }

    /// Highest-sequence operation that is still active.
    pub fn last_active(&self) -> Option<Sequence> {
        self.operations.iter().rposition(Operation::is_active)
    }

    /// Total number of operations, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Sequence the next appended operation will receive.
    pub fn next_sequence(&self) -> Sequence {
        self.operations.len()
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Active operations with `sequence >= from`, in log order.
    pub fn active_from(&self, from: Sequence) -> impl Iterator<Item = &Operation> {
        self.operations
            .get(from..)
            .unwrap_or_default()
            .iter()
            .filter(|op| op.is_active())
    }

    /// Sequences of all active operations, in order.
    pub fn active_sequences(&self) -> Vec<Sequence> {
        self.active_from(0).map(|op| op.sequence).collect()
    }

    /// Per-operation states, in order.
    pub fn states(&self) -> Vec<OperationState> {
        self.operations.iter().map(|op| op.state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::SerializableColor;
    use kurbo::Point;

    fn chunk() -> StrokeChunk {
        StrokeChunk::from_points(vec![Point::new(1.0, 1.0)], SerializableColor::black(), 2.0)
    }

    #[test]
    fn test_append_assigns_dense_sequences() {
        let mut log = OperationLog::new();
        for i in 0..5 {
            let op = log.append(format!("op-{i}"), "alice", chunk()).unwrap();
            assert_eq!(op.sequence, i);
        }
        for (i, op) in log.operations().iter().enumerate() {
            assert_eq!(op.sequence, i);
        }
        assert_eq!(log.len(), 5);
        assert_eq!(log.next_sequence(), 5);
        assert_eq!(log.active_count(), 5);
    }

    #[test]
    fn test_duplicate_id_rejected_without_mutation() {
        let mut log = OperationLog::new();
        log.append("a", "alice", chunk()).unwrap();

        let err = log.append("a", "bob", chunk()).unwrap_err();
        assert_eq!(err, LogError::DuplicateOperation("a".to_string()));
        assert_eq!(log.len(), 1);
        assert_eq!(log.next_sequence(), 1);
    }

    #[test]
    fn test_get_out_of_range() {
        let log = OperationLog::new();
        assert_eq!(
            log.get(3).unwrap_err(),
            LogError::IndexOutOfRange { sequence: 3, len: 0 }
        );
    }

    #[test]
    fn test_set_state_returns_previous_and_is_idempotent() {
        let mut log = OperationLog::new();
        log.append("a", "alice", chunk()).unwrap();
        log.append("b", "alice", chunk()).unwrap();

        assert_eq!(log.set_state(0, OperationState::Undone).unwrap(), OperationState::Active);
        assert_eq!(log.set_state(0, OperationState::Undone).unwrap(), OperationState::Undone);
        assert_eq!(log.active_count(), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(0).unwrap().sequence, 0);
        assert_eq!(log.last_active(), Some(1));

        assert_eq!(log.set_state(0, OperationState::Active).unwrap(), OperationState::Undone);
        assert_eq!(log.active_count(), 2);
    }

    #[test]
    fn test_insert_requires_contiguous_sequence() {
        let mut source = OperationLog::new();
        source.append("a", "alice", chunk()).unwrap();
        source.append("b", "alice", chunk()).unwrap();

        let mut replica = OperationLog::new();
        let err = replica.insert(source.get(1).unwrap().clone()).unwrap_err();
        assert_eq!(err, LogError::SequenceGap { expected: 0, got: 1 });

        replica.insert(source.get(0).unwrap().clone()).unwrap();
        replica.insert(source.get(1).unwrap().clone()).unwrap();
        assert_eq!(replica.len(), 2);
        assert_eq!(replica.sequence_of("b"), Some(1));
    }

    #[test]
    fn test_from_operations_counts_tombstones() {
        let mut source = OperationLog::new();
        source.append("a", "alice", chunk()).unwrap();
        source.append("b", "alice", chunk()).unwrap();
        source.set_state(0, OperationState::Undone).unwrap();

        let replica = OperationLog::from_operations(source.operations().to_vec()).unwrap();
        assert_eq!(replica.active_count(), 1);
        assert_eq!(replica.states(), vec![OperationState::Undone, OperationState::Active]);
        assert_eq!(replica.active_sequences(), vec![1]);
    }

    #[test]
    fn test_active_from_past_end_is_empty() {
        let mut log = OperationLog::new();
        log.append("a", "alice", chunk()).unwrap();
        assert_eq!(log.active_from(5).count(), 0);
        assert_eq!(log.active_from(1).count(), 0);
        assert_eq!(log.active_from(0).count(), 1);
    }
}
