//! Graph path searcher.
//!
//! Modified Dijkstra algorithm over outbound connections which works with an arbitrary [`PathMetric`]. Transit and
//! target nodes must be servers, clients can only originate transfers.

use std::cmp::Ordering;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::DfsError;
use crate::metrics::{PathMetric, SearchContext, TransferRequest};
use crate::topology::{ConnectionKey, NodeId};

/// Path found by the searcher.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult<C> {
    /// Target server.
    pub target: NodeId,
    /// Connections from the origin to the target.
    pub links: Vec<ConnectionKey>,
    /// Accumulated cost.
    pub cost: C,
}

/// Searches best paths with the given metric.
pub struct PathSearcher<'a, M: PathMetric> {
    ctx: SearchContext<'a>,
    metric: &'a M,
}

impl<'a, M: PathMetric> PathSearcher<'a, M> {
    /// Creates searcher over the engine state.
    pub fn new(ctx: SearchContext<'a>, metric: &'a M) -> Self {
        Self { ctx, metric }
    }

    /// Returns the best path from `origin` to `target`, if the target is reachable.
    pub fn shortest_path(
        &self,
        origin: NodeId,
        target: NodeId,
        request: &TransferRequest,
        time: f64,
    ) -> Option<SearchResult<M::Cost>> {
        if origin == target {
            return Some(SearchResult {
                target,
                links: Vec::new(),
                cost: self.metric.identity(),
            });
        }
        let disk_bandwidth = self.metric.possible_disk_bandwidth(&self.ctx, target, request);
        let size = self.ctx.object_size(target, request);

        let mut costs: FxHashMap<NodeId, M::Cost> = FxHashMap::default();
        let mut predecessors: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut settled: FxHashSet<NodeId> = FxHashSet::default();
        let mut frontier = vec![origin];
        costs.insert(origin, self.metric.identity());

        while !frontier.is_empty() {
            // frontier is small, a linear scan keeps ties resolved by node id
            let mut best_pos = 0;
            for pos in 1..frontier.len() {
                let ordering = self
                    .metric
                    .compare(&costs[&frontier[pos]], &costs[&frontier[best_pos]])
                    .then(frontier[pos].cmp(&frontier[best_pos]));
                if ordering == Ordering::Less {
                    best_pos = pos;
                }
            }
            let current = frontier.swap_remove(best_pos);
            if !settled.insert(current) {
                continue;
            }
            if current == target {
                break;
            }
            let Some(node) = self.ctx.topology.node(current) else {
                continue;
            };
            let current_cost = costs[&current];
            for connection in node.connections() {
                let neighbour = connection.neighbour;
                if settled.contains(&neighbour) {
                    continue;
                }
                if !self.ctx.topology.node(neighbour).map_or(false, |n| n.is_server()) {
                    continue;
                }
                let weight = self.metric.edge_weight(connection, size, disk_bandwidth, time);
                let candidate = self.metric.combine(current_cost, weight);
                let known = costs.get(&neighbour).copied().unwrap_or_else(|| self.metric.worst());
                if self.metric.compare(&candidate, &known) == Ordering::Less {
                    costs.insert(neighbour, candidate);
                    predecessors.insert(neighbour, current);
                    if !frontier.contains(&neighbour) {
                        frontier.push(neighbour);
                    }
                }
            }
        }

        if !settled.contains(&target) {
            return None;
        }
        let mut links = Vec::new();
        let mut current = target;
        while current != origin {
            let previous = predecessors[&current];
            links.push((previous, current));
            current = previous;
        }
        links.reverse();
        Some(SearchResult {
            target,
            links,
            cost: costs[&target],
        })
    }

    /// Returns the best path among paths to each candidate. Ties are resolved in favor of the smaller node id.
    pub fn best_path(
        &self,
        origin: NodeId,
        candidates: &[NodeId],
        request: &TransferRequest,
        time: f64,
    ) -> Result<SearchResult<M::Cost>, DfsError> {
        let mut sorted = candidates.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut best: Option<SearchResult<M::Cost>> = None;
        for candidate in sorted {
            if let Some(result) = self.shortest_path(origin, candidate, request, time) {
                let better = match &best {
                    None => true,
                    Some(current) => self.metric.compare(&result.cost, &current.cost) == Ordering::Less,
                };
                if better {
                    best = Some(result);
                }
            }
        }
        best.ok_or_else(|| DfsError::NoPathAvailable {
            origin: self.ctx.topology.label(origin),
            path: request.path.to_string(),
        })
    }
}
