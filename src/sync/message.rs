//! Wire messages for the sync channel.
//!
//! DESIGN
//! ======
//! Broadcasts travel as a JSON envelope `{ "type": ..., "payload": ... }`;
//! control messages sent to the service (floor switching, user-count
//! refresh) are flat `{ "action": ..., "floorCode": ... }` objects. Both
//! shapes share one outbound enum so the writer task serializes blindly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{EntityId, EntityKind, FloorCode, Point, Timestamp};
use crate::patch::Operation;

// =============================================================================
// BROADCAST ENVELOPE
// =============================================================================

/// A message on the persistent channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncMessage {
    /// A confirmed mutation to one entity.
    #[serde(rename = "graph-patch")]
    GraphPatch(GraphPatch),
    /// Cursor positions accumulated since the sender's last broadcast.
    #[serde(rename = "cursor")]
    Cursor(CursorUpdate),
    /// A peer left a floor (disconnect or switch).
    #[serde(rename = "leave-floor")]
    LeaveFloor(LeaveFloor),
    /// Snapshot of the other users active on this floor.
    #[serde(rename = "users")]
    Users(UsersSnapshot),
}

/// Payload of a graph-patch broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphPatch {
    pub entity_id: EntityId,
    /// Which collection `entity_id` refers to.
    pub entity: EntityKind,
    pub diff: Vec<Operation>,
    pub timestamp: Timestamp,
    pub sender_id: String,
}

/// One sampled cursor position, optionally mid-drag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorInfo {
    pub cursor_pos: Point,
    /// Set while the sender is dragging a node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_pos: Option<Point>,
    /// Set while the sender is dragging a polygon vertex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hole_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex_pos: Option<Point>,
}

impl CursorInfo {
    #[must_use]
    pub fn at(pos: Point) -> Self {
        Self {
            cursor_pos: pos,
            node_id: None,
            node_pos: None,
            room_id: None,
            hole_index: None,
            vertex_index: None,
            vertex_pos: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub sender_id: String,
    pub cursor_info_list: Vec<CursorInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveFloor {
    pub floor_code: FloorCode,
    pub user_id: String,
}

/// A peer as shown in presence UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub user_name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersSnapshot {
    pub users: HashMap<String, Peer>,
}

// =============================================================================
// CONTROL MESSAGES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlAction {
    SwitchFloor,
    RefreshUserCount,
}

/// Flat control message consumed by the sync service itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    pub action: ControlAction,
    pub floor_code: FloorCode,
}

/// Everything the writer task can put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Message(SyncMessage),
    Control(ControlMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graph_patch_envelope_shape() {
        let msg = SyncMessage::GraphPatch(GraphPatch {
            entity_id: "n1".into(),
            entity: EntityKind::Node,
            diff: vec![Operation::Replace { path: "/pos/x".into(), value: json!(2.0) }],
            timestamp: Timestamp::from("2024-03-01T10:00:00Z"),
            sender_id: "u1".into(),
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "graph-patch");
        assert_eq!(value["payload"]["entityId"], "n1");
        assert_eq!(value["payload"]["entity"], "node");
        assert_eq!(value["payload"]["senderId"], "u1");
        assert_eq!(value["payload"]["diff"][0]["op"], "replace");

        let parsed: SyncMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn control_message_is_flat() {
        let msg = ControlMessage { action: ControlAction::SwitchFloor, floor_code: "GHC-5".into() };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"action": "switchFloor", "floorCode": "GHC-5"}));
    }

    #[test]
    fn outbound_serializes_both_shapes() {
        let control = Outbound::Control(ControlMessage {
            action: ControlAction::RefreshUserCount,
            floor_code: "GHC-4".into(),
        });
        let value = serde_json::to_value(&control).unwrap();
        assert_eq!(value["action"], "refreshUserCount");

        let broadcast = Outbound::Message(SyncMessage::Users(UsersSnapshot { users: HashMap::new() }));
        let value = serde_json::to_value(&broadcast).unwrap();
        assert_eq!(value["type"], "users");
    }

    #[test]
    fn cursor_update_round_trip() {
        let mut info = CursorInfo::at(Point { x: 1.0, y: 2.0 });
        info.node_id = Some("n1".into());
        info.node_pos = Some(Point { x: 1.5, y: 2.5 });
        let msg = SyncMessage::Cursor(CursorUpdate { sender_id: "u1".into(), cursor_info_list: vec![info] });

        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"cursorPos\""));
        assert!(!text.contains("roomId"), "unset drag fields stay off the wire");
        let parsed: SyncMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, msg);
    }
}
