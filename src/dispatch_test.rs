use super::*;
use crate::model::{EdgeType, Node, Point, Polygon, Room, RoomType, Timestamp};
use crate::persist::test_helpers::FakePersistence;
use crate::session::test_helpers::{drain_alerts, seeded_session};
use crate::sync::channel::SyncChannel;
use crate::sync::message::{GraphPatch as WirePatch, Outbound};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

const T2: &str = "2024-03-01T10:00:05Z";

fn moved(x: f64, y: f64) -> Node {
    let mut node = Node::at(x, y);
    node.updated_at = Timestamp::from("2024-03-01T10:00:00Z");
    node
}

fn room(name: &str) -> Room {
    Room {
        name: name.to_owned(),
        label_position: Point { x: 1.0, y: 1.0 },
        room_type: RoomType::Office,
        display_alias: String::new(),
        aliases: vec![],
        polygon: Polygon::default(),
        updated_at: Timestamp::from("2024-03-01T10:00:00Z"),
    }
}

fn sent_patches(rx: &mut UnboundedReceiver<Outbound>) -> Vec<WirePatch> {
    let mut out = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Message(SyncMessage::GraphPatch(p)) = outbound {
            out.push(p);
        }
    }
    out
}

#[tokio::test]
async fn move_node_confirms_and_broadcasts() {
    let (mut session, _alerts) = seeded_session();
    let (channel, mut wire) = SyncChannel::test_pair();
    session.attach_channel(channel);
    let persist = FakePersistence::confirming(T2);

    let mut new_node = session.store.node("a").cloned().unwrap();
    new_node.pos = Point { x: 9.0, y: 9.0 };
    dispatch(
        &mut session,
        &persist,
        Edit::MoveNode { node_id: "a".into(), node: new_node },
        RecordMode::Record,
    )
    .await
    .unwrap();

    let node = session.store.node("a").unwrap();
    assert!((node.pos.x - 9.0).abs() < f64::EPSILON);
    assert_eq!(node.updated_at, Timestamp::from(T2));
    assert!(!session.locks.is_locked("a"));
    assert_eq!(persist.seen(), ["update_node a"]);

    let patches = sent_patches(&mut wire);
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].entity_id, "a");
    assert_eq!(patches[0].sender_id, "local-user");
    assert_eq!(patches[0].timestamp, Timestamp::from(T2));
    assert!(patches[0].diff.iter().any(|op| op.path() == "/pos/x"));
}

#[tokio::test]
async fn record_mode_pushes_history_and_replay_does_not() {
    let (mut session, _alerts) = seeded_session();
    let persist = FakePersistence::confirming(T2);

    dispatch(
        &mut session,
        &persist,
        Edit::MoveNode { node_id: "a".into(), node: moved(5.0, 0.0) },
        RecordMode::Record,
    )
    .await
    .unwrap();
    assert_eq!(session.history.len(), 1);

    dispatch(
        &mut session,
        &persist,
        Edit::MoveNode { node_id: "a".into(), node: moved(6.0, 0.0) },
        RecordMode::Replay,
    )
    .await
    .unwrap();
    assert_eq!(session.history.len(), 1, "replays must not re-enter history");
}

#[tokio::test]
async fn failed_persistence_invalidates_and_alerts() {
    let (mut session, mut alerts) = seeded_session();
    let persist = FakePersistence::failing("boom");

    let result = dispatch(
        &mut session,
        &persist,
        Edit::MoveNode { node_id: "a".into(), node: moved(5.0, 0.0) },
        RecordMode::Record,
    )
    .await;

    assert!(result.is_err());
    assert!(session.store.is_stale(), "failed save forces a refetch");
    assert!(!session.locks.is_locked("a"));

    let messages = drain_alerts(&mut alerts);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], "boom", "server-sent message is shown verbatim");
    assert!(messages[1].contains("Refetching"));
}

#[tokio::test]
async fn failure_discards_patches_queued_behind_the_lock() {
    let (mut session, _alerts) = seeded_session();
    let persist = FakePersistence::failing("boom");

    // A remote patch that arrives mid-flight would be queued; emulate the
    // arrival by queueing while the dispatcher holds the lock, which is
    // what handle_remote_patch does.
    session.locks.lock("a");
    session.overwrites.enqueue(
        "a",
        crate::lock::QueuedPatch {
            kind: EntityKind::Node,
            ops: vec![],
            timestamp: Timestamp::from("2024-03-01T10:00:01Z"),
            sender_id: "u2".into(),
        },
    );
    session.locks.unlock("a");

    let _ = dispatch(
        &mut session,
        &persist,
        Edit::MoveNode { node_id: "a".into(), node: moved(5.0, 0.0) },
        RecordMode::Record,
    )
    .await;

    assert!(session.overwrites.is_empty("a"), "queue entries never outlive the lock");
}

#[tokio::test]
async fn reconciliation_scenario_t1_t2_t3() {
    // Our move confirms at T2 while T1 and T3 patches sit queued behind
    // the lock of an earlier still-unsettled mutation.
    let (mut session, mut alerts) = seeded_session();

    // Earlier local mutation of "a" still in flight.
    session.locks.lock("a");
    session.handle_message(SyncMessage::GraphPatch(WirePatch {
        entity_id: "a".into(),
        entity: EntityKind::Node,
        diff: vec![Operation::Replace { path: "/roomId".into(), value: json!("GHC-4102") }],
        timestamp: Timestamp::from("2024-03-01T10:00:01Z"),
        sender_id: "u2".into(),
    }));
    session.handle_message(SyncMessage::GraphPatch(WirePatch {
        entity_id: "a".into(),
        entity: EntityKind::Node,
        diff: vec![Operation::Replace { path: "/pos/y".into(), value: json!(77.0) }],
        timestamp: Timestamp::from("2024-03-01T10:00:09Z"),
        sender_id: "u2".into(),
    }));
    assert_eq!(session.overwrites.len("a"), 2);

    // Our move confirms at T2.
    let persist = FakePersistence::confirming(T2);
    dispatch(
        &mut session,
        &persist,
        Edit::MoveNode { node_id: "a".into(), node: moved(9.0, 0.0) },
        RecordMode::Record,
    )
    .await
    .unwrap();

    let node = session.store.node("a").unwrap();
    assert_eq!(node.room_id, "GHC-4102", "T1 content applied");
    assert_eq!(node.updated_at, Timestamp::from(T2), "store timestamp stays at T2");
    assert!((node.pos.y - 0.0).abs() < f64::EPSILON, "T3 not applied yet");
    assert_eq!(session.overwrites.len("a"), 1, "T3 remains queued");

    let messages = drain_alerts(&mut alerts);
    assert!(
        messages.iter().any(|m| m.starts_with("Your saved change")),
        "overwrite attributed to the local user: {messages:?}"
    );

    // The earlier mutation settles; lock reaches zero and T3 merges.
    assert_eq!(session.locks.unlock("a"), 0);
    crate::resolve::merge_remaining(&mut session, EntityKind::Node, "a");

    let node = session.store.node("a").unwrap();
    assert!((node.pos.y - 77.0).abs() < f64::EPSILON);
    assert_eq!(node.updated_at, Timestamp::from("2024-03-01T10:00:09Z"));
}

#[tokio::test]
async fn add_edge_updates_both_endpoints() {
    let (mut session, _alerts) = seeded_session();
    let (channel, mut wire) = SyncChannel::test_pair();
    session.attach_channel(channel);
    let persist = FakePersistence::confirming(T2);

    dispatch(
        &mut session,
        &persist,
        Edit::AddEdge {
            in_node_id: "a".into(),
            out_node_id: "c".into(),
            in_edge: Edge::with_dist(3.0),
            out_edge: Edge::with_dist(3.0),
        },
        RecordMode::Record,
    )
    .await
    .unwrap();

    assert!(session.store.node("a").unwrap().neighbors.contains_key("c"));
    assert!(session.store.node("c").unwrap().neighbors.contains_key("a"));
    assert_eq!(persist.seen(), ["add_edge a c"]);
    assert_eq!(sent_patches(&mut wire).len(), 2, "one patch per endpoint");
}

#[tokio::test]
async fn delete_edge_reverse_restores_both_halves() {
    let (mut session, _alerts) = seeded_session();
    let persist = FakePersistence::confirming(T2);

    dispatch(
        &mut session,
        &persist,
        Edit::DeleteEdge { in_node_id: "a".into(), out_node_id: "b".into() },
        RecordMode::Record,
    )
    .await
    .unwrap();
    assert!(!session.store.node("a").unwrap().neighbors.contains_key("b"));

    session.undo(&persist).await;
    assert!(session.store.node("a").unwrap().neighbors.contains_key("b"));
    assert!(session.store.node("b").unwrap().neighbors.contains_key("a"));
}

#[tokio::test]
async fn delete_node_reconnects_two_neighbors() {
    let (mut session, _alerts) = seeded_session();
    let persist = FakePersistence::confirming(T2);

    // "b" sits between "a" (0,0) and "c" (3,0).
    dispatch(
        &mut session,
        &persist,
        Edit::DeleteNode { node_id: "b".into() },
        RecordMode::Record,
    )
    .await
    .unwrap();

    assert!(session.store.node("b").is_none());
    let a = session.store.node("a").unwrap();
    let edge = a.neighbors.get("c").expect("neighbors reconnected");
    assert!((edge.dist.unwrap() - 3.0).abs() < f64::EPSILON, "recomputed length");
    assert!(!a.neighbors.contains_key("b"));
    assert!(!session.store.node("c").unwrap().neighbors.contains_key("b"));
}

#[tokio::test]
async fn delete_node_removes_cross_floor_reverse_edges_first() {
    let (mut session, _alerts) = seeded_session();
    let persist = FakePersistence::confirming(T2);

    session
        .store
        .node_mut("a")
        .unwrap()
        .neighbors
        .insert("upstairs".into(), Edge::across_floors("GHC-5", EdgeType::Elevator));

    dispatch(
        &mut session,
        &persist,
        Edit::DeleteNode { node_id: "a".into() },
        RecordMode::Record,
    )
    .await
    .unwrap();

    assert_eq!(persist.seen(), ["delete_edge upstairs a", "delete_node a"]);
}

#[tokio::test]
async fn add_node_mirrors_edges_onto_neighbors() {
    let (mut session, _alerts) = seeded_session();
    let persist = FakePersistence::confirming(T2);

    let node_id = crate::model::new_node_id();
    let mut node = Node::at(0.0, 1.0);
    node.neighbors.insert("a".into(), Edge::with_dist(1.0));
    dispatch(
        &mut session,
        &persist,
        Edit::AddNode { node_id: node_id.clone(), node },
        RecordMode::Record,
    )
    .await
    .unwrap();

    assert!(session.store.node(&node_id).is_some());
    assert!(session.store.node("a").unwrap().neighbors.contains_key(&node_id));
}

#[tokio::test]
async fn upsert_existing_room_round_trips_through_undo() {
    let (mut session, _alerts) = seeded_session();
    let persist = FakePersistence::scripted(vec![
        Ok(Timestamp::from(T2)),
        Ok(Timestamp::from("2024-03-01T10:00:06Z")),
        Ok(Timestamp::from("2024-03-01T10:00:07Z")),
    ]);

    dispatch(
        &mut session,
        &persist,
        Edit::UpsertRoom { room_id: "GHC-4102".into(), room: room("renamed") },
        RecordMode::Record,
    )
    .await
    .unwrap();
    assert_eq!(session.store.room("GHC-4102").unwrap().name, "renamed");

    session.undo(&persist).await;
    assert_eq!(session.store.room("GHC-4102").unwrap().name, "4102");

    session.redo(&persist).await;
    assert_eq!(session.store.room("GHC-4102").unwrap().name, "renamed");
}

#[tokio::test]
async fn creating_a_room_records_unreplayable_markers() {
    let (mut session, mut alerts) = seeded_session();
    let persist = FakePersistence::confirming(T2);

    dispatch(
        &mut session,
        &persist,
        Edit::UpsertRoom { room_id: "GHC-NEW".into(), room: room("NEW") },
        RecordMode::Record,
    )
    .await
    .unwrap();
    assert!(session.store.room("GHC-NEW").is_some());
    drain_alerts(&mut alerts);

    session.undo(&persist).await;
    let messages = drain_alerts(&mut alerts);
    assert_eq!(messages, ["Can't undo create room!"]);
    // The room itself is untouched by the skipped undo.
    assert!(session.store.room("GHC-NEW").is_some());

    session.redo(&persist).await;
    let messages = drain_alerts(&mut alerts);
    assert_eq!(messages, ["Can't redo create room!"]);
}

#[tokio::test]
async fn concurrent_room_renames_adopt_second_confirmation() {
    let (mut session, _alerts) = seeded_session();
    let persist = FakePersistence::scripted(vec![
        Ok(Timestamp::from("2024-03-01T10:00:05Z")), // T_a: our rename
        Ok(Timestamp::from("2024-03-01T10:00:08Z")), // unrelated room edit
    ]);

    dispatch(
        &mut session,
        &persist,
        Edit::UpsertRoom { room_id: "GHC-4102".into(), room: room("ours") },
        RecordMode::Record,
    )
    .await
    .unwrap();

    // The other client's rename confirmed later (T_b > T_a) and arrives as
    // a patch; it wins and its timestamp is adopted.
    session.handle_message(SyncMessage::GraphPatch(WirePatch {
        entity_id: "GHC-4102".into(),
        entity: EntityKind::Room,
        diff: vec![Operation::Replace { path: "/name".into(), value: json!("theirs") }],
        timestamp: Timestamp::from("2024-03-01T10:00:06Z"),
        sender_id: "u2".into(),
    }));
    let stored = session.store.room("GHC-4102").unwrap();
    assert_eq!(stored.name, "theirs");
    assert_eq!(stored.updated_at, Timestamp::from("2024-03-01T10:00:06Z"));

    // A subsequent local edit to an unrelated room is unaffected.
    dispatch(
        &mut session,
        &persist,
        Edit::UpsertRoom { room_id: "GHC-4200".into(), room: room("4200") },
        RecordMode::Record,
    )
    .await
    .unwrap();
    assert_eq!(session.store.room("GHC-4200").unwrap().name, "4200");
    assert_eq!(session.store.room("GHC-4102").unwrap().name, "theirs");
}

#[tokio::test]
async fn unknown_entity_is_rejected_before_any_persistence_call() {
    let (mut session, _alerts) = seeded_session();
    let persist = FakePersistence::confirming(T2);

    let result = dispatch(
        &mut session,
        &persist,
        Edit::MoveNode { node_id: "ghost".into(), node: moved(0.0, 0.0) },
        RecordMode::Record,
    )
    .await;

    assert!(matches!(result, Err(DispatchError::UnknownEntity(_))));
    assert!(persist.seen().is_empty());
    assert!(session.history.is_empty());
}

#[tokio::test]
async fn dropped_broadcast_when_channel_closed() {
    let (mut session, _alerts) = seeded_session();
    let (channel, wire) = SyncChannel::test_pair();
    drop(wire);
    session.attach_channel(channel);
    let persist = FakePersistence::confirming(T2);

    // Succeeds despite the closed channel: broadcasts are fire-and-forget.
    dispatch(
        &mut session,
        &persist,
        Edit::MoveNode { node_id: "a".into(), node: moved(5.0, 0.0) },
        RecordMode::Record,
    )
    .await
    .unwrap();
    assert_eq!(session.store.node("a").unwrap().updated_at, Timestamp::from(T2));
}
