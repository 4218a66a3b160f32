//! Client-side canvas reconstruction.
//!
//! The engine mirrors the authoritative log, draws it through a [`Renderer`],
//! and keeps a [`SnapshotCache`] so that a redraw blits the best valid
//! snapshot and replays only the tail after it.
//!
//! Local strokes are drawn optimistically before the relay assigns them a
//! sequence. They are not reconciled pixel-for-pixel when echoed back; the
//! next full render (at a snapshot boundary, an undo/redo, or an explicit
//! redraw) is the reconciliation point.

use crate::oplog::{LogError, LogResult, OperationLog};
use crate::operation::{Operation, OperationId, OperationState, Sequence, StrokeChunk};
use crate::renderer::Renderer;
use crate::snapshot::{DEFAULT_SNAPSHOT_INTERVAL, DEFAULT_SNAPSHOT_RETENTION, SnapshotCache};

/// Reconstruction tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Operations between snapshot captures. Zero disables snapshots.
    pub snapshot_interval: usize,
    /// Number of snapshots retained.
    pub snapshot_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            snapshot_retention: DEFAULT_SNAPSHOT_RETENTION,
        }
    }
}

/// What a full render pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    /// Sequence of the snapshot blitted, if any.
    pub snapshot: Option<Sequence>,
    /// Number of operations replayed on top.
    pub replayed: usize,
}

/// Result of applying an authoritative update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update changed the mirrored log.
    Applied,
    /// Already reflected locally; nothing changed.
    Ignored,
    /// The update does not line up with local state. The caller must discard
    /// local state and request a full transfer.
    Stale { expected: Sequence, got: Sequence },
}

/// A locally drawn chunk awaiting its authoritative echo.
#[derive(Debug, Clone)]
struct PendingChunk {
    id: OperationId,
    chunk: StrokeChunk,
}

/// Rebuilds the visible canvas from the mirrored log.
pub struct ReconstructionEngine<R: Renderer> {
    renderer: R,
    log: OperationLog,
    snapshots: SnapshotCache<R::Raster>,
    pending: Vec<PendingChunk>,
}

impl<R: Renderer> ReconstructionEngine<R> {
    pub fn new(renderer: R, config: EngineConfig) -> Self {
        Self {
            renderer,
            log: OperationLog::new(),
            snapshots: SnapshotCache::new(config.snapshot_interval, config.snapshot_retention),
            pending: Vec::new(),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn snapshots(&self) -> &SnapshotCache<R::Raster> {
        &self.snapshots
    }

    /// Number of local chunks not yet echoed by the relay.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Replace the mirrored log with a full transfer and redraw.
    ///
    /// Any unacknowledged local chunks are discarded.
    pub fn load_full_state(&mut self, operations: Vec<Operation>) -> LogResult<RenderStats> {
        let log = OperationLog::from_operations(operations)?;
        self.log = log;
        self.snapshots.clear();
        self.pending.clear();

        let stats = self.render_authoritative();
        let len = self.log.len();
        let renderer = &self.renderer;
        self.snapshots.maybe_capture(len, || renderer.capture_raster());
        Ok(stats)
    }

    /// Discard all local state and blank the canvas.
    pub fn reset(&mut self) {
        self.log = OperationLog::new();
        self.snapshots.clear();
        self.pending.clear();
        self.renderer.clear();
    }

    /// Draw a preview segment of a gesture that has not been sent yet.
    pub fn draw_preview(&mut self, chunk: &StrokeChunk) {
        self.renderer.draw_chunk(chunk);
    }

    /// Draw a local chunk immediately and track it until echoed.
    pub fn draw_local(&mut self, id: impl Into<OperationId>, chunk: StrokeChunk) {
        self.renderer.draw_chunk(&chunk);
        self.pending.push(PendingChunk { id: id.into(), chunk });
    }

    /// Apply an `operation` broadcast.
    pub fn apply_operation(&mut self, op: Operation) -> LogResult<ApplyOutcome> {
        let expected = self.log.len();
        if op.sequence < expected {
            let known = self.log.get(op.sequence)?;
            if known.id == op.id {
                return Ok(ApplyOutcome::Ignored);
            }
            return Ok(ApplyOutcome::Stale {
                expected,
                got: op.sequence,
            });
        }
        if op.sequence > expected {
            return Ok(ApplyOutcome::Stale {
                expected,
                got: op.sequence,
            });
        }

        let acknowledged = match self.pending.iter().position(|p| p.id == op.id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        };
        let active = op.is_active();
        let payload = op.payload.clone();
        match self.log.insert(op) {
            Ok(()) => {}
            // Same id at a different sequence: our view has diverged.
            Err(LogError::DuplicateOperation(_)) => {
                return Ok(ApplyOutcome::Stale {
                    expected,
                    got: expected,
                });
            }
            Err(e) => return Err(e),
        }

        if active && self.snapshots.is_boundary(self.log.len()) {
            self.render_authoritative();
            let len = self.log.len();
            let renderer = &self.renderer;
            self.snapshots.maybe_capture(len, || renderer.capture_raster());
            self.draw_pending();
        } else if active && !acknowledged {
            self.renderer.draw_chunk(&payload);
        }

        Ok(ApplyOutcome::Applied)
    }

    /// Apply an `undo_applied`/`redo_applied` broadcast for `sequence`.
    ///
    /// When `id` is given it must match the mirrored operation.
    pub fn apply_state(
        &mut self,
        sequence: Sequence,
        id: Option<&str>,
        state: OperationState,
    ) -> LogResult<ApplyOutcome> {
        let expected = self.log.len();
        let matches = match self.log.get(sequence) {
            Ok(op) => id.is_none_or(|id| op.id == id),
            Err(_) => false,
        };
        if !matches {
            return Ok(ApplyOutcome::Stale {
                expected,
                got: sequence,
            });
        }

        let previous = self.log.set_state(sequence, state)?;
        if previous == state {
            return Ok(ApplyOutcome::Ignored);
        }

        self.snapshots.invalidate_from(sequence);
        self.render();
        Ok(ApplyOutcome::Applied)
    }

    /// Full reconstruction followed by the optimistic overlay.
    pub fn render(&mut self) -> RenderStats {
        let stats = self.render_authoritative();
        self.draw_pending();
        stats
    }

    /// Rebuild the canvas from the log alone.
    ///
    /// Blits the best valid snapshot and replays active operations from its
    /// sequence onward, or clears and replays from zero if none is usable.
    fn render_authoritative(&mut self) -> RenderStats {
        let target = self.log.len();
        let generation = self.snapshots.generation();

        let start = match self.snapshots.best_snapshot_for(target, generation) {
            Some(snapshot) => {
                self.renderer.blit_raster(&snapshot.raster);
                Some(snapshot.sequence)
            }
            None => {
                self.renderer.clear();
                None
            }
        };

        let mut replayed = 0;
        for op in self.log.active_from(start.unwrap_or(0)) {
            self.renderer.draw_chunk(&op.payload);
            replayed += 1;
        }

        log::debug!(
            "Rendered {} operation(s) from snapshot {:?} (log length {})",
            replayed,
            start,
            target
        );
        RenderStats {
            snapshot: start,
            replayed,
        }
    }

    fn draw_pending(&mut self) {
        for pending in &self.pending {
            self.renderer.draw_chunk(&pending.chunk);
        }
    }
}
