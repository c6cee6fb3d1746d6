//! Global registry of file replicas.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use dslab_dfs_storage::DeviceId;

use crate::topology::NodeId;

/// Server and device holding a copy of a file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaTarget {
    /// Server node.
    pub server: NodeId,
    /// Device of the server.
    pub device: DeviceId,
}

impl ReplicaTarget {
    /// Creates new target.
    pub fn new(server: NodeId, device: DeviceId) -> Self {
        Self { server, device }
    }
}

impl fmt::Display for ReplicaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server, self.device)
    }
}

/// Maps logical file paths to the sets of their replicas.
///
/// A path is replicated iff it has more than one target. Targets are kept in the order they were added.
#[derive(Default)]
pub struct ReplicaRegistry {
    sets: IndexMap<String, Vec<ReplicaTarget>>,
}

impl ReplicaRegistry {
    /// Creates empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns replica targets of the path.
    pub fn targets(&self, path: &str) -> &[ReplicaTarget] {
        self.sets.get(path).map(|t| t.as_slice()).unwrap_or(&[])
    }

    /// Returns replica target located on the server.
    pub fn target_on(&self, path: &str, server: NodeId) -> Option<ReplicaTarget> {
        self.targets(path).iter().find(|t| t.server == server).copied()
    }

    /// Returns servers holding a replica of the path.
    pub fn holders(&self, path: &str) -> Vec<NodeId> {
        self.targets(path).iter().map(|t| t.server).collect()
    }

    /// Returns whether the path has more than one replica.
    pub fn is_replicated(&self, path: &str) -> bool {
        self.targets(path).len() > 1
    }

    /// Adds target to the path. Returns `false` if it is already present.
    pub fn add(&mut self, path: &str, target: ReplicaTarget) -> bool {
        let targets = self.sets.entry(path.to_string()).or_default();
        if targets.contains(&target) {
            return false;
        }
        targets.push(target);
        true
    }

    /// Removes target from the path. Paths without targets are forgotten.
    pub fn remove(&mut self, path: &str, target: ReplicaTarget) -> bool {
        let Some(targets) = self.sets.get_mut(path) else {
            return false;
        };
        let len = targets.len();
        targets.retain(|t| *t != target);
        let removed = len != targets.len();
        if targets.is_empty() {
            self.sets.shift_remove(path);
        }
        removed
    }

    /// Moves targets of `from` to `to`.
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(targets) = self.sets.shift_remove(from) {
            self.sets.insert(to.to_string(), targets);
        }
    }

    /// Replaces device of the replica located on `server`.
    pub fn relocate(&mut self, path: &str, server: NodeId, device: DeviceId) {
        if let Some(targets) = self.sets.get_mut(path) {
            for target in targets.iter_mut().filter(|t| t.server == server) {
                target.device = device;
            }
        }
    }

    /// Removes all targets located on the server.
    pub fn remove_server(&mut self, server: NodeId) {
        for targets in self.sets.values_mut() {
            targets.retain(|t| t.server != server);
        }
        self.sets.retain(|_, targets| !targets.is_empty());
    }

    /// Iterates over paths and their targets.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ReplicaTarget])> {
        self.sets.iter().map(|(path, targets)| (path.as_str(), targets.as_slice()))
    }
}
