//! Remote cursor tracking.
//!
//! Presence is best effort: no ordering, no retries. The latest update per
//! author wins and entries disappear after a period of silence.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kurbo::Point;

use crate::operation::AuthorId;

/// Default inactivity window after which a cursor is hidden.
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(2);

/// Last known cursor of a remote author.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteCursor {
    pub position: Point,
    pub updated_at: Instant,
}

/// Last-update-wins cursor table with expiry.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    ttl: Duration,
    cursors: HashMap<AuthorId, RemoteCursor>,
}

impl PresenceTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cursors: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a cursor position received at `now`.
    pub fn update(&mut self, author_id: impl Into<AuthorId>, position: Point, now: Instant) {
        self.cursors.insert(
            author_id.into(),
            RemoteCursor {
                position,
                updated_at: now,
            },
        );
    }

    pub fn remove(&mut self, author_id: &str) {
        self.cursors.remove(author_id);
    }

    /// Drop cursors silent for longer than the TTL. Returns who was dropped.
    pub fn expire(&mut self, now: Instant) -> Vec<AuthorId> {
        let ttl = self.ttl;
        let expired: Vec<AuthorId> = self
            .cursors
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.updated_at) > ttl)
            .map(|(author, _)| author.clone())
            .collect();
        for author in &expired {
            self.cursors.remove(author);
        }
        expired
    }

    pub fn get(&self, author_id: &str) -> Option<&RemoteCursor> {
        self.cursors.get(author_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AuthorId, &RemoteCursor)> {
        self.cursors.iter()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PRESENCE_TTL)
    }
}
