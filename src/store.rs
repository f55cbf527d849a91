//! Entity store — the per-floor in-memory cache of nodes and rooms.
//!
//! DESIGN
//! ======
//! One store per open floor view, owned by the session and mutated only by
//! the dispatcher (local edits) and the resolver (remote patches). Typed
//! entities are bridged to JSON for patch application: a patch runs
//! against the serialized form and the result is deserialized back, so a
//! failing patch leaves the stored entity untouched.
//!
//! Staleness flags stand in for cache invalidation: a failed save marks
//! the collection stale, the embedder refetches and calls the matching
//! `load_*`.

use std::collections::HashMap;

use crate::model::{EntityId, EntityKind, FloorCode, Node, Room, Timestamp};
use crate::patch::{self, Operation, PatchError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown {kind:?} entity: {id}")]
    Missing { kind: EntityKind, id: EntityId },
    #[error("patch application failed: {0}")]
    Patch(#[from] PatchError),
    #[error("entity decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// In-memory graph and room set for one floor.
#[derive(Debug, Default)]
pub struct FloorStore {
    pub floor_code: FloorCode,
    nodes: HashMap<EntityId, Node>,
    rooms: HashMap<EntityId, Room>,
    nodes_stale: bool,
    rooms_stale: bool,
}

impl FloorStore {
    #[must_use]
    pub fn new(floor_code: impl Into<FloorCode>) -> Self {
        Self { floor_code: floor_code.into(), ..Self::default() }
    }

    // =========================================================================
    // TYPED ACCESS
    // =========================================================================

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    #[must_use]
    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    #[must_use]
    pub fn nodes(&self) -> &HashMap<EntityId, Node> {
        &self.nodes
    }

    #[must_use]
    pub fn rooms(&self) -> &HashMap<EntityId, Room> {
        &self.rooms
    }

    pub fn insert_node(&mut self, id: impl Into<EntityId>, node: Node) {
        self.nodes.insert(id.into(), node);
    }

    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        self.nodes.remove(id)
    }

    pub fn insert_room(&mut self, id: impl Into<EntityId>, room: Room) {
        self.rooms.insert(id.into(), room);
    }

    pub fn remove_room(&mut self, id: &str) -> Option<Room> {
        self.rooms.remove(id)
    }

    // =========================================================================
    // JSON BRIDGE
    // =========================================================================

    /// Serialized form of an entity, used as the base for diffing.
    #[must_use]
    pub fn entity_value(&self, kind: EntityKind, id: &str) -> Option<serde_json::Value> {
        match kind {
            EntityKind::Node => self.nodes.get(id).and_then(|n| serde_json::to_value(n).ok()),
            EntityKind::Room => self.rooms.get(id).and_then(|r| serde_json::to_value(r).ok()),
        }
    }

    /// Apply a patch to an entity's serialized form and store the result.
    /// All-or-nothing: any failure leaves the stored entity as it was.
    ///
    /// # Errors
    ///
    /// `Missing` if the entity is unknown, `Patch` if an operation fails,
    /// `Decode` if the patched JSON no longer parses as the entity type.
    pub fn apply_ops(&mut self, kind: EntityKind, id: &str, ops: &[Operation]) -> Result<(), StoreError> {
        let current = self
            .entity_value(kind, id)
            .ok_or_else(|| StoreError::Missing { kind, id: id.to_owned() })?;
        let patched = patch::apply(&current, ops)?;
        match kind {
            EntityKind::Node => {
                let node: Node = serde_json::from_value(patched)?;
                self.nodes.insert(id.to_owned(), node);
            }
            EntityKind::Room => {
                let room: Room = serde_json::from_value(patched)?;
                self.rooms.insert(id.to_owned(), room);
            }
        }
        Ok(())
    }

    // =========================================================================
    // TIMESTAMPS
    // =========================================================================

    #[must_use]
    pub fn timestamp(&self, kind: EntityKind, id: &str) -> Option<&Timestamp> {
        match kind {
            EntityKind::Node => self.nodes.get(id).map(|n| &n.updated_at),
            EntityKind::Room => self.rooms.get(id).map(|r| &r.updated_at),
        }
    }

    pub fn set_timestamp(&mut self, kind: EntityKind, id: &str, ts: Timestamp) {
        match kind {
            EntityKind::Node => {
                if let Some(node) = self.nodes.get_mut(id) {
                    node.updated_at = ts;
                }
            }
            EntityKind::Room => {
                if let Some(room) = self.rooms.get_mut(id) {
                    room.updated_at = ts;
                }
            }
        }
    }

    // =========================================================================
    // STALENESS
    // =========================================================================

    /// Mark the node cache as needing a refetch after a failed save.
    pub fn invalidate_nodes(&mut self) {
        self.nodes_stale = true;
    }

    pub fn invalidate_rooms(&mut self) {
        self.rooms_stale = true;
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.nodes_stale || self.rooms_stale
    }

    /// Replace the node set with a fresh fetch.
    pub fn load_nodes(&mut self, nodes: HashMap<EntityId, Node>) {
        self.nodes = nodes;
        self.nodes_stale = false;
    }

    /// Replace the room set with a fresh fetch.
    pub fn load_rooms(&mut self, rooms: HashMap<EntityId, Room>) {
        self.rooms = rooms;
        self.rooms_stale = false;
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
