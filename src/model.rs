//! Shared data model — floors, nodes, edges, rooms, timestamps.
//!
//! DESIGN
//! ======
//! Entities serialize with camelCase field names so the in-memory shape is
//! also the wire shape (`updatedAt`, `labelPosition`, `toFloorInfo`).
//! A node's neighbor map is keyed by neighbor id; a room id is derived from
//! building code + room name and doubles as the node's room membership key.
//!
//! Timestamps are server-issued RFC 3339 strings. They are compared as
//! plain strings, which for RFC 3339 at fixed precision is time order, so
//! the engine never parses them on the hot path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// IDS AND COORDINATES
// =============================================================================

/// Opaque entity identifier. Node ids are client-assigned UUIDs; room ids
/// are `{buildingCode}-{roomName}`.
pub type EntityId = String;

/// Client-assigned id for a freshly created node. First write wins: the
/// persistence service accepts whatever id the creating client chose.
#[must_use]
pub fn new_node_id() -> EntityId {
    uuid::Uuid::new_v4().to_string()
}

/// Floor code, e.g. `"GHC-4"`. One graph and room set exist per floor.
pub type FloorCode = String;

/// Which collection an entity id refers to. Carried on graph-patch
/// payloads so the receiver knows what to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Room,
}

/// A 2-D position on the floor plan.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Euclidean distance between two points, rounded to two decimals the way
/// the persisted graphs store edge lengths.
#[must_use]
pub fn dist(a: Point, b: Point) -> f64 {
    let d = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
    (d * 100.0).round() / 100.0
}

/// Extract the building code from a floor code (`"GHC-4"` → `"GHC"`).
#[must_use]
pub fn building_code(floor_code: &str) -> &str {
    floor_code.split('-').next().unwrap_or(floor_code)
}

/// Derive a room id from a floor code and room name.
#[must_use]
pub fn room_id(floor_code: &str, room_name: &str) -> EntityId {
    format!("{}-{room_name}", building_code(floor_code))
}

/// Split a room id back into building code and room name.
#[must_use]
pub fn split_room_id(room_id: &str) -> (&str, &str) {
    room_id.split_once('-').unwrap_or((room_id, ""))
}

// =============================================================================
// TIMESTAMPS
// =============================================================================

/// Server-issued confirmation timestamp (RFC 3339). Ordered by string
/// comparison; no clock synchronization is assumed beyond the persistence
/// service's own clock.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub String);

impl Timestamp {
    /// The zero timestamp, older than any server-issued one.
    #[must_use]
    pub fn epoch() -> Self {
        Self(String::new())
    }

    /// Current wall-clock time as an RFC 3339 string, for local fakes and
    /// tooling. The real persistence service stamps its own responses.
    #[must_use]
    pub fn now() -> Self {
        let now = time::OffsetDateTime::now_utc();
        let formatted = now
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        Self(formatted)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Timestamp {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// =============================================================================
// EDGES AND NODES
// =============================================================================

/// Tag on a cross-floor edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Ramp,
    Stairs,
    Elevator,
    #[serde(rename = "")]
    #[default]
    Unset,
}

/// Marker on an edge whose far endpoint lives on another floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToFloorInfo {
    pub to_floor: FloorCode,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}

/// One direction of an edge, stored in the owning node's neighbor map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Precomputed Euclidean length. Recomputed whenever an edge is created
    /// by the engine; may be absent in older persisted graphs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist: Option<f64>,
    /// Present only on edges that cross floors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_floor_info: Option<ToFloorInfo>,
}

impl Edge {
    /// Same-floor edge with a computed length.
    #[must_use]
    pub fn with_dist(dist: f64) -> Self {
        Self { dist: Some(dist), to_floor_info: None }
    }

    /// Cross-floor edge.
    #[must_use]
    pub fn across_floors(to_floor: impl Into<FloorCode>, edge_type: EdgeType) -> Self {
        Self { dist: None, to_floor_info: Some(ToFloorInfo { to_floor: to_floor.into(), edge_type }) }
    }
}

/// A way-finding node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Position on the floor plan.
    pub pos: Point,
    /// Neighbor id → edge toward that neighbor.
    #[serde(default)]
    pub neighbors: HashMap<EntityId, Edge>,
    /// Id of the room this node belongs to; empty when outside any room.
    #[serde(default)]
    pub room_id: EntityId,
    /// Last server-confirmed update.
    #[serde(default = "Timestamp::epoch")]
    pub updated_at: Timestamp,
}

impl Node {
    #[must_use]
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            pos: Point { x, y },
            neighbors: HashMap::new(),
            room_id: EntityId::new(),
            updated_at: Timestamp::epoch(),
        }
    }
}

// =============================================================================
// ROOMS
// =============================================================================

/// Room type vocabulary. `Inaccessible` rooms are excluded from
/// connectivity counterexamples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoomType {
    Default,
    Corridor,
    Auditorium,
    Office,
    Classroom,
    Operational,
    Conference,
    Study,
    Laboratory,
    #[serde(rename = "Computer Lab")]
    ComputerLab,
    Studio,
    Workshop,
    Vestibule,
    Storage,
    Restroom,
    Stairs,
    Elevator,
    Ramp,
    Dining,
    Food,
    Store,
    Library,
    Sport,
    Parking,
    Inaccessible,
    #[serde(rename = "")]
    #[default]
    Unset,
}

/// Room types a routing consumer treats as walkable corridors.
pub const WALKWAY_TYPES: [RoomType; 3] = [RoomType::Corridor, RoomType::Ramp, RoomType::Library];

/// A polygon ring: a closed sequence of `[x, y]` positions (first and last
/// identical). An empty ring means "unset".
pub type Ring = Vec<[f64; 2]>;

/// Room outline: outer ring plus zero or more holes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polygon {
    pub coordinates: Vec<Ring>,
}

impl Polygon {
    /// True when the outer ring is missing or empty.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.coordinates.first().is_none_or(Vec::is_empty)
    }

    /// Even-odd point containment over the non-empty rings. Empty rings
    /// (unset polygon, unset holes) are skipped rather than treated as
    /// degenerate geometry.
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        if self.is_unset() {
            return false;
        }
        let mut inside = false;
        for ring in &self.coordinates {
            if ring.is_empty() {
                continue;
            }
            if ring_contains(ring, point) {
                inside = !inside;
            }
        }
        inside
    }
}

fn ring_contains(ring: &[[f64; 2]], p: Point) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = (ring[i][0], ring[i][1]);
        let (xj, yj) = (ring[j][0], ring[j][1]);
        if ((yi > p.y) != (yj > p.y)) && (p.x < (xj - xi) * (p.y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A polygon-bearing region of the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Short name without the building prefix, e.g. `"121"`.
    pub name: String,
    /// Where the room label is drawn.
    pub label_position: Point,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    /// Display name, e.g. `"McConomy Auditorium"`.
    #[serde(default)]
    pub display_alias: String,
    /// Additional names used for search.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub polygon: Polygon,
    #[serde(default = "Timestamp::epoch")]
    pub updated_at: Timestamp,
}

/// Find the room containing `point`, skipping rooms with unset polygons.
/// When polygons overlap, the last room scanned wins.
#[must_use]
pub fn find_room_at(rooms: &HashMap<EntityId, Room>, point: Point) -> Option<EntityId> {
    let mut found = None;
    for (id, room) in rooms {
        if room.polygon.contains(point) {
            found = Some(id.clone());
        }
    }
    found
}
