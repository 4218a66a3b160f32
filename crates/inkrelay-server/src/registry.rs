//! Room lookup and lazy creation.

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::room::RoomHandle;

/// Owns every room in the process. Rooms are never evicted.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
    config: ServerConfig,
}

impl RoomRegistry {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get or create the room with `id`.
    ///
    /// The entry lock is held across creation, so concurrent callers always
    /// observe the same room task.
    pub fn ensure_room(&self, id: &str) -> RoomHandle {
        self.rooms
            .entry(id.to_string())
            .or_insert_with(|| RoomHandle::spawn(id, &self.config))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<RoomHandle> {
        self.rooms.get(id).map(|room| room.clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}
