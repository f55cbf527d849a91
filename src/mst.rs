//! Connectivity checker — Prim's algorithm over the floor graph.
//!
//! A read-only consumer of the entity store: builds a minimum spanning
//! tree from an arbitrary start node, ignoring cross-floor edges, and
//! reports the nearest stranded node when the graph is disconnected.
//! Rooms typed `Inaccessible` are expected to be unreachable, so their
//! nodes are skipped when picking the counterexample.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;

use crate::model::{EntityId, Node, Room, RoomType, dist};

/// Result of a connectivity check.
#[derive(Debug, Clone, PartialEq)]
pub struct MstReport {
    /// Undirected tree edges, stored symmetrically for O(1) lookup when
    /// highlighting an edge from either endpoint.
    pub tree: HashMap<EntityId, HashSet<EntityId>>,
    pub total_weight: f64,
    pub connected: bool,
    /// When disconnected: the unvisited, non-inaccessible node closest to
    /// the visited set.
    pub disconnected_node: Option<EntityId>,
}

/// Candidate edge in the priority queue: min-weight first, insertion order
/// breaking ties.
struct Candidate {
    weight: f64,
    seq: u64,
    from: EntityId,
    to: EntityId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse both keys for min-first.
        other
            .weight
            .total_cmp(&self.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Run Prim's from an arbitrary node. Returns `None` for an empty graph.
#[must_use]
pub fn check_connectivity(
    nodes: &HashMap<EntityId, Node>,
    rooms: &HashMap<EntityId, Room>,
) -> Option<MstReport> {
    let start = pick_start(nodes)?;
    Some(check_connectivity_from(nodes, rooms, &start))
}

fn pick_start(nodes: &HashMap<EntityId, Node>) -> Option<EntityId> {
    if nodes.is_empty() {
        return None;
    }
    let mut ids: Vec<&EntityId> = nodes.keys().collect();
    ids.sort();
    let index = rand::rng().random_range(0..ids.len());
    Some(ids[index].clone())
}

/// Deterministic variant taking the start node explicitly.
#[must_use]
pub fn check_connectivity_from(
    nodes: &HashMap<EntityId, Node>,
    rooms: &HashMap<EntityId, Room>,
    start: &str,
) -> MstReport {
    let mut tree: HashMap<EntityId, HashSet<EntityId>> = HashMap::new();
    let mut visited: HashSet<EntityId> = HashSet::new();
    let mut queue: BinaryHeap<Candidate> = BinaryHeap::new();
    let mut seq: u64 = 0;
    let mut total_weight = 0.0;

    let enqueue_from = |node_id: &str,
                        visited: &HashSet<EntityId>,
                        queue: &mut BinaryHeap<Candidate>,
                        seq: &mut u64| {
        let Some(node) = nodes.get(node_id) else {
            return;
        };
        for (neighbor_id, edge) in &node.neighbors {
            if visited.contains(neighbor_id) {
                continue;
            }
            // Cross-floor edges never participate in same-floor spanning.
            if edge.to_floor_info.is_some() {
                continue;
            }
            let Some(neighbor) = nodes.get(neighbor_id) else {
                continue;
            };
            let weight = edge.dist.unwrap_or_else(|| dist(node.pos, neighbor.pos));
            queue.push(Candidate { weight, seq: *seq, from: node_id.to_owned(), to: neighbor_id.clone() });
            *seq += 1;
        }
    };

    visited.insert(start.to_owned());
    enqueue_from(start, &visited, &mut queue, &mut seq);

    while let Some(candidate) = queue.pop() {
        if visited.contains(&candidate.to) {
            continue;
        }
        visited.insert(candidate.to.clone());
        total_weight += candidate.weight;
        tree.entry(candidate.from.clone())
            .or_default()
            .insert(candidate.to.clone());
        tree.entry(candidate.to.clone())
            .or_default()
            .insert(candidate.from.clone());
        enqueue_from(&candidate.to, &visited, &mut queue, &mut seq);
    }

    let connected = visited.len() == nodes.len();
    let disconnected_node = if connected {
        None
    } else {
        nearest_stranded(nodes, rooms, &visited)
    };

    MstReport { tree, total_weight, connected, disconnected_node }
}

/// The unvisited node (outside inaccessible rooms) with the smallest
/// distance to any visited node.
fn nearest_stranded(
    nodes: &HashMap<EntityId, Node>,
    rooms: &HashMap<EntityId, Room>,
    visited: &HashSet<EntityId>,
) -> Option<EntityId> {
    let mut best: Option<(f64, EntityId)> = None;
    for (id, node) in nodes {
        if visited.contains(id) {
            continue;
        }
        if rooms
            .get(&node.room_id)
            .is_some_and(|room| room.room_type == RoomType::Inaccessible)
        {
            continue;
        }
        let closest = visited
            .iter()
            .filter_map(|vid| nodes.get(vid))
            .map(|v| dist(node.pos, v.pos))
            .fold(f64::INFINITY, f64::min);
        let better = match &best {
            Some((d, _)) => closest < *d,
            None => true,
        };
        if better {
            best = Some((closest, id.clone()));
        }
    }
    best.map(|(_, id)| id)
}
