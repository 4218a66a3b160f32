//! Raster snapshots that bound replay cost.
//!
//! A snapshot taken at `sequence = n` holds the pixels of every operation with
//! sequence `< n` that was active at capture time. Those pixels cannot be
//! patched: once an operation below `n` changes state, the snapshot is
//! discarded. A generation counter records every such invalidation, and a
//! snapshot is only returned when its `valid_as_of` matches it.

use std::collections::VecDeque;

use crate::operation::Sequence;

/// Default number of operations between captures.
pub const DEFAULT_SNAPSHOT_INTERVAL: usize = 50;

/// Default number of snapshots retained.
pub const DEFAULT_SNAPSHOT_RETENTION: usize = 5;

/// A captured canvas raster.
#[derive(Debug, Clone)]
pub struct Snapshot<R> {
    /// Number of log entries baked into `raster`.
    pub sequence: Sequence,
    pub raster: R,
    /// Generation the snapshot was captured (or last revalidated) at.
    pub valid_as_of: u64,
}

/// Bounded, generation-checked cache of canvas snapshots.
#[derive(Debug)]
pub struct SnapshotCache<R> {
    /// Snapshots in capture order (oldest first).
    snapshots: VecDeque<Snapshot<R>>,
    /// Capture every `interval` operations. Zero disables capture.
    interval: usize,
    /// Maximum number of valid snapshots kept.
    retention: usize,
    generation: u64,
}

impl<R> SnapshotCache<R> {
    pub fn new(interval: usize, retention: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            interval,
            retention,
            generation: 0,
        }
    }

    /// Current generation. Bumps on every retroactive invalidation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    /// Whether a log of `log_len` entries sits on a capture boundary.
    pub fn is_boundary(&self, log_len: usize) -> bool {
        self.interval > 0 && self.retention > 0 && log_len > 0 && log_len % self.interval == 0
    }

    /// Capture a snapshot at `log_len` if it is a boundary and none exists yet.
    ///
    /// `capture` is only invoked when a snapshot is actually taken. Returns
    /// whether one was.
    pub fn maybe_capture(&mut self, log_len: usize, capture: impl FnOnce() -> R) -> bool {
        if !self.is_boundary(log_len) {
            return false;
        }

        let generation = self.generation;
        self.snapshots.retain(|s| s.valid_as_of == generation);
        if self.snapshots.iter().any(|s| s.sequence == log_len) {
            return false;
        }

        self.snapshots.push_back(Snapshot {
            sequence: log_len,
            raster: capture(),
            valid_as_of: generation,
        });
        while self.snapshots.len() > self.retention {
            self.snapshots.pop_front();
        }

        log::debug!("Captured snapshot at sequence {} (generation {})", log_len, generation);
        true
    }

    /// Discard every snapshot that baked in the operation at `sequence`.
    ///
    /// Snapshots with `snapshot.sequence > sequence` are dropped and the
    /// generation advances; snapshots at or below `sequence` do not contain
    /// the operation and are carried into the new generation. Returns the
    /// number discarded.
    pub fn invalidate_from(&mut self, sequence: Sequence) -> usize {
        let generation = self.generation;
        let stale = self
            .snapshots
            .iter()
            .filter(|s| s.valid_as_of == generation && s.sequence > sequence)
            .count();
        if stale == 0 {
            return 0;
        }

        self.generation += 1;
        let next = self.generation;
        self.snapshots
            .retain(|s| s.valid_as_of == generation && s.sequence <= sequence);
        for snapshot in &mut self.snapshots {
            snapshot.valid_as_of = next;
        }

        log::debug!(
            "Invalidated {} snapshot(s) above sequence {} (generation {})",
            stale,
            sequence,
            next
        );
        stale
    }

    /// Highest snapshot with `sequence <= target` that is valid for `generation`.
    pub fn best_snapshot_for(&self, target: Sequence, generation: u64) -> Option<&Snapshot<R>> {
        self.snapshots
            .iter()
            .filter(|s| s.valid_as_of == generation && s.sequence <= target)
            .max_by_key(|s| s.sequence)
    }

    /// Drop everything, e.g. when the log is replaced wholesale.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Sequences of the cached snapshots, in capture order.
    pub fn sequences(&self) -> Vec<Sequence> {
        self.snapshots.iter().map(|s| s.sequence).collect()
    }
}

impl<R> Default for SnapshotCache<R> {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_INTERVAL, DEFAULT_SNAPSHOT_RETENTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(interval: usize, retention: usize, up_to: usize) -> SnapshotCache<usize> {
        let mut cache = SnapshotCache::new(interval, retention);
        for len in 1..=up_to {
            cache.maybe_capture(len, || len);
        }
        cache
    }

    #[test]
    fn test_captures_only_on_boundaries() {
        let cache = filled(2, 5, 5);
        assert_eq!(cache.sequences(), vec![2, 4]);
    }

    #[test]
    fn test_zero_interval_disables_capture() {
        let mut cache: SnapshotCache<usize> = SnapshotCache::new(0, 5);
        assert!(!cache.maybe_capture(10, || 10));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_no_duplicate_capture_at_same_sequence() {
        let mut cache = filled(2, 5, 2);
        let mut called = false;
        assert!(!cache.maybe_capture(2, || {
            called = true;
            2
        }));
        assert!(!called);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let cache = filled(1, 3, 6);
        assert_eq!(cache.sequences(), vec![4, 5, 6]);
    }

    #[test]
    fn test_best_snapshot_picks_highest_at_or_below_target() {
        let cache = filled(2, 5, 8);
        let generation = cache.generation();
        assert_eq!(cache.best_snapshot_for(7, generation).map(|s| s.sequence), Some(6));
        assert_eq!(cache.best_snapshot_for(8, generation).map(|s| s.sequence), Some(8));
        assert!(cache.best_snapshot_for(1, generation).is_none());
        assert!(cache.best_snapshot_for(8, generation + 1).is_none());
    }

    #[test]
    fn test_invalidate_drops_snapshots_above_sequence() {
        let mut cache = filled(2, 5, 8);
        let before = cache.generation();

        assert_eq!(cache.invalidate_from(3), 3);
        assert_eq!(cache.generation(), before + 1);
        assert_eq!(cache.sequences(), vec![2]);

        let generation = cache.generation();
        for target in 3..=8 {
            let best = cache.best_snapshot_for(target, generation);
            assert!(best.is_none_or(|s| s.sequence <= 3));
        }
        assert_eq!(cache.best_snapshot_for(8, generation).map(|s| s.sequence), Some(2));
    }

    #[test]
    fn test_invalidate_at_snapshot_sequence_keeps_it() {
        // A snapshot at 4 holds ops 0..=3; flipping op 4 does not touch it.
        let mut cache = filled(2, 5, 4);
        let before = cache.generation();
        assert_eq!(cache.invalidate_from(4), 0);
        assert_eq!(cache.generation(), before);
        assert_eq!(cache.sequences(), vec![2, 4]);
    }

    #[test]
    fn test_invalidate_everything_for_first_operation() {
        let mut cache = filled(2, 5, 4);
        assert_eq!(cache.invalidate_from(0), 2);
        assert!(cache.is_empty());
        assert!(cache.best_snapshot_for(4, cache.generation()).is_none());
    }

    #[test]
    fn test_capture_after_invalidation_uses_new_generation() {
        let mut cache = filled(2, 5, 4);
        cache.invalidate_from(0);
        assert!(cache.maybe_capture(6, || 6));
        let best = cache.best_snapshot_for(6, cache.generation()).unwrap();
        assert_eq!(best.sequence, 6);
        assert_eq!(best.valid_as_of, cache.generation());
    }

    #[test]
    fn test_clear_bumps_generation() {
        let mut cache = filled(2, 5, 4);
        let before = cache.generation();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.generation(), before + 1);
    }
}
