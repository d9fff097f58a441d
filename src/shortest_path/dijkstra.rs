use std::collections::BinaryHeap;

use crate::config::NumericConfig;
use crate::graph::{LinkIdx, Network, NodeIdx, Route};

#[derive(Debug, Clone, PartialEq)]
struct QueueItem {
    node_id: NodeIdx,
    potential: f64,
}
impl Eq for QueueItem {}
impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueItem {
    /// Smallest potential first, ties go to the lowest node index.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .potential
            .total_cmp(&self.potential)
            .then_with(|| other.node_id.0.cmp(&self.node_id.0))
    }
}

/// Travel time from every node of `route` to its destination node, searching backwards
/// over incoming links.
///
/// `potentials` is indexed by node. Nodes off the route stay `None` unless they are gates
/// of other destinations, which are pinned to `numeric.pinned_potential` and never lowered.
/// Route nodes the destination cannot be reached from keep `numeric.unreachable`.
/// Links with infinite weight (stopped streams) are impassable.
pub fn potentials_to_destination(
    network: &Network,
    route: &Route,
    weight: impl Fn(LinkIdx) -> f64,
    numeric: &NumericConfig,
    potentials: &mut [Option<f64>],
) {
    debug_assert_eq!(potentials.len(), network.num_nodes());
    potentials.fill(None);
    for &node in route.nodes.iter() {
        potentials[node.0 as usize] = Some(numeric.unreachable);
    }

    let mut settled = vec![false; network.num_nodes()];
    let mut pinned = vec![false; network.num_nodes()];
    let mut queue: BinaryHeap<QueueItem> = BinaryHeap::new();
    potentials[route.destination.0 as usize] = Some(0.0);
    queue.push(QueueItem {
        node_id: route.destination,
        potential: 0.0,
    });
    for &gate in network.gate_nodes() {
        if gate == route.destination {
            continue;
        }
        potentials[gate.0 as usize] = Some(numeric.pinned_potential);
        pinned[gate.0 as usize] = true;
        queue.push(QueueItem {
            node_id: gate,
            potential: numeric.pinned_potential,
        });
    }

    while let Some(QueueItem { node_id, potential }) = queue.pop() {
        if settled[node_id.0 as usize] {
            continue;
        }
        settled[node_id.0 as usize] = true;

        for &link_idx in network.node(node_id).incoming.iter() {
            let neighbor = network.link(link_idx).from;
            if settled[neighbor.0 as usize] || pinned[neighbor.0 as usize] || !route.contains(neighbor)
            {
                continue;
            }
            let w = weight(link_idx);
            if !w.is_finite() {
                continue;
            }
            let candidate = potential + w;
            let current = potentials[neighbor.0 as usize].unwrap_or(numeric.unreachable);
            if candidate < current {
                potentials[neighbor.0 as usize] = Some(candidate);
                queue.push(QueueItem {
                    node_id: neighbor,
                    potential: candidate,
                });
            }
        }
    }
}
