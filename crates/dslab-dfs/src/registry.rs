//! Registry of node labels.

use rustc_hash::FxHashMap;

use crate::error::DfsError;
use crate::topology::NodeId;

/// Keeps node labels unique within a topology.
///
/// Generated labels have the form `<prefix><n>`, the counter is advanced until a free label is found.
#[derive(Default)]
pub struct LabelRegistry {
    labels: FxHashMap<String, NodeId>,
    counters: FxHashMap<String, usize>,
}

impl LabelRegistry {
    /// Creates empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `label` for `node`.
    pub fn register(&mut self, label: &str, node: NodeId) -> Result<(), DfsError> {
        if self.labels.contains_key(label) {
            return Err(DfsError::DuplicateLabel(label.to_string()));
        }
        self.labels.insert(label.to_string(), node);
        Ok(())
    }

    /// Generates a free label with the given prefix and registers it for `node`.
    pub fn register_generated(&mut self, prefix: &str, node: NodeId) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let label = format!("{}{}", prefix, counter);
            if !self.labels.contains_key(&label) {
                self.labels.insert(label.clone(), node);
                return label;
            }
        }
    }

    /// Moves node from `old` label to `new` one.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), DfsError> {
        if old == new {
            return Ok(());
        }
        if self.labels.contains_key(new) {
            return Err(DfsError::DuplicateLabel(new.to_string()));
        }
        let node = self
            .labels
            .remove(old)
            .ok_or_else(|| DfsError::UnknownNode(old.to_string()))?;
        self.labels.insert(new.to_string(), node);
        Ok(())
    }

    /// Releases the label.
    pub fn unregister(&mut self, label: &str) -> Option<NodeId> {
        self.labels.remove(label)
    }

    /// Returns node registered under `label`.
    pub fn lookup(&self, label: &str) -> Option<NodeId> {
        self.labels.get(label).copied()
    }

    /// Returns whether `label` is taken.
    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains_key(label)
    }
}
