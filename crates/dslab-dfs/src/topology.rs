//! Topology model: labeled server and client nodes connected by directed connections.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use dslab_dfs_storage::DeviceId;

use crate::characteristic::BandwidthCharacteristic;
use crate::error::DfsError;
use crate::fs::FileTree;
use crate::registry::LabelRegistry;
use crate::task::TaskId;

/// Unique node id.
pub type NodeId = usize;

/// Directed connection identified by its endpoints `(origin, neighbour)`.
pub type ConnectionKey = (NodeId, NodeId);

/// Directed connection from `origin` to `neighbour`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Node the connection goes from.
    pub origin: NodeId,
    /// Node the connection goes to.
    pub neighbour: NodeId,
    /// Nominal bandwidth in bytes per second.
    pub max_bandwidth: f64,
    /// Latency in milliseconds.
    pub latency: f64,
    /// Time-varying modifier of the nominal bandwidth.
    pub characteristic: BandwidthCharacteristic,
}

impl Connection {
    /// Creates connection with a characteristic which does not modify the bandwidth.
    pub fn new(origin: NodeId, neighbour: NodeId, max_bandwidth: f64, latency: f64) -> Self {
        Self {
            origin,
            neighbour,
            max_bandwidth,
            latency,
            characteristic: BandwidthCharacteristic::default(),
        }
    }

    /// Bandwidth at simulation `time` (in seconds).
    pub fn bandwidth_at(&self, time: f64) -> f64 {
        self.max_bandwidth * self.characteristic.modifier_at(time * 1000.)
    }

    /// Average bandwidth over `[time, time + duration]` (in seconds).
    pub fn average_bandwidth(&self, time: f64, duration: f64) -> f64 {
        self.max_bandwidth * self.characteristic.average_modifier(time * 1000., duration * 1000.)
    }

    /// Connection key.
    pub fn key(&self) -> ConnectionKey {
        (self.origin, self.neighbour)
    }
}

/// State specific to server nodes.
#[derive(Default)]
pub struct ServerNode {
    /// Storage devices owned by the server.
    pub devices: Vec<DeviceId>,
    /// File tree whose objects are mounted on the server devices.
    pub fs: FileTree,
    /// Whether accessed files are moved to faster devices.
    pub hierarchical: bool,
}

/// State specific to client nodes.
#[derive(Default)]
pub struct ClientNode {
    /// Tasks executed by the client in order.
    pub plan: Vec<TaskId>,
}

/// Node variants.
pub enum NodeKind {
    /// Node which stores data.
    Server(ServerNode),
    /// Node which runs tasks.
    Client(ClientNode),
}

/// Node of the topology.
pub struct Node {
    id: NodeId,
    label: String,
    kind: NodeKind,
    connections: IndexMap<NodeId, Connection>,
}

impl Node {
    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Node variant.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns whether the node is a server.
    pub fn is_server(&self) -> bool {
        matches!(self.kind, NodeKind::Server(_))
    }

    /// Server state, if the node is a server.
    pub fn as_server(&self) -> Option<&ServerNode> {
        match &self.kind {
            NodeKind::Server(server) => Some(server),
            NodeKind::Client(_) => None,
        }
    }

    /// Mutable server state, if the node is a server.
    pub fn as_server_mut(&mut self) -> Option<&mut ServerNode> {
        match &mut self.kind {
            NodeKind::Server(server) => Some(server),
            NodeKind::Client(_) => None,
        }
    }

    /// Client state, if the node is a client.
    pub fn as_client(&self) -> Option<&ClientNode> {
        match &self.kind {
            NodeKind::Client(client) => Some(client),
            NodeKind::Server(_) => None,
        }
    }

    /// Mutable client state, if the node is a client.
    pub fn as_client_mut(&mut self) -> Option<&mut ClientNode> {
        match &mut self.kind {
            NodeKind::Client(client) => Some(client),
            NodeKind::Server(_) => None,
        }
    }

    /// Outbound connections in creation order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Outbound connection to `neighbour`.
    pub fn connection(&self, neighbour: NodeId) -> Option<&Connection> {
        self.connections.get(&neighbour)
    }
}

/// Graph of nodes and directed connections.
#[derive(Default)]
pub struct Topology {
    nodes: IndexMap<NodeId, Node>,
    registry: LabelRegistry,
    next_node_id: NodeId,
}

impl Topology {
    /// Creates empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&mut self, label: Option<&str>, prefix: &str, kind: NodeKind) -> Result<NodeId, DfsError> {
        let id = self.next_node_id;
        let label = match label {
            Some(label) => {
                self.registry.register(label, id)?;
                label.to_string()
            }
            None => self.registry.register_generated(prefix, id),
        };
        self.next_node_id += 1;
        self.nodes.insert(
            id,
            Node {
                id,
                label,
                kind,
                connections: IndexMap::new(),
            },
        );
        Ok(id)
    }

    /// Adds server node. If `label` is not given, a free label `serverN` is generated.
    pub fn add_server(&mut self, label: Option<&str>) -> Result<NodeId, DfsError> {
        self.add_node(label, "server", NodeKind::Server(ServerNode::default()))
    }

    /// Adds client node. If `label` is not given, a free label `clientN` is generated.
    pub fn add_client(&mut self, label: Option<&str>) -> Result<NodeId, DfsError> {
        self.add_node(label, "client", NodeKind::Client(ClientNode::default()))
    }

    /// Removes node along with its inbound and outbound connections.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, DfsError> {
        let node = self
            .nodes
            .shift_remove(&id)
            .ok_or_else(|| DfsError::UnknownNode(id.to_string()))?;
        self.registry.unregister(&node.label);
        for other in self.nodes.values_mut() {
            other.connections.shift_remove(&id);
        }
        Ok(node)
    }

    /// Changes node label keeping labels unique.
    pub fn rename_node(&mut self, id: NodeId, label: &str) -> Result<(), DfsError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| DfsError::UnknownNode(id.to_string()))?;
        self.registry.rename(&node.label, label)?;
        node.label = label.to_string();
        Ok(())
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Returns mutable node by id.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Returns node id by label.
    pub fn node_id(&self, label: &str) -> Option<NodeId> {
        self.registry.lookup(label)
    }

    /// Returns node label by id, or the id itself if there is no such node.
    pub fn label(&self, id: NodeId) -> String {
        self.nodes
            .get(&id)
            .map(|n| n.label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Iterates over nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Ids of server nodes in creation order.
    pub fn servers(&self) -> Vec<NodeId> {
        self.nodes.values().filter(|n| n.is_server()).map(|n| n.id).collect()
    }

    /// Ids of client nodes in creation order.
    pub fn clients(&self) -> Vec<NodeId> {
        self.nodes.values().filter(|n| !n.is_server()).map(|n| n.id).collect()
    }

    /// Server state of node `id`.
    pub fn server(&self, id: NodeId) -> Result<&ServerNode, DfsError> {
        self.nodes
            .get(&id)
            .and_then(|n| n.as_server())
            .ok_or_else(|| DfsError::UnknownNode(id.to_string()))
    }

    /// Mutable server state of node `id`.
    pub fn server_mut(&mut self, id: NodeId) -> Result<&mut ServerNode, DfsError> {
        self.nodes
            .get_mut(&id)
            .and_then(|n| n.as_server_mut())
            .ok_or_else(|| DfsError::UnknownNode(id.to_string()))
    }

    /// Adds directed connection. There can be at most one connection per ordered pair of nodes.
    pub fn connect(
        &mut self,
        origin: NodeId,
        neighbour: NodeId,
        max_bandwidth: f64,
        latency: f64,
    ) -> Result<&mut Connection, DfsError> {
        if max_bandwidth.is_nan() || max_bandwidth <= 0. || latency.is_nan() || latency < 0. {
            return Err(DfsError::InvalidParameter(format!(
                "connection bandwidth must be > 0 and latency >= 0, got {} and {}",
                max_bandwidth, latency
            )));
        }
        if !self.nodes.contains_key(&neighbour) {
            return Err(DfsError::UnknownNode(neighbour.to_string()));
        }
        let label = self.label(neighbour);
        let node = self
            .nodes
            .get_mut(&origin)
            .ok_or_else(|| DfsError::UnknownNode(origin.to_string()))?;
        if origin == neighbour || node.connections.contains_key(&neighbour) {
            return Err(DfsError::AlreadyExists(format!(
                "connection {} -> {}",
                node.label, label
            )));
        }
        node.connections
            .insert(neighbour, Connection::new(origin, neighbour, max_bandwidth, latency));
        Ok(&mut node.connections[&neighbour])
    }

    /// Adds a pair of independent connections in both directions with the same attributes.
    pub fn connect_both(
        &mut self,
        first: NodeId,
        second: NodeId,
        max_bandwidth: f64,
        latency: f64,
    ) -> Result<(), DfsError> {
        self.connect(first, second, max_bandwidth, latency)?;
        self.connect(second, first, max_bandwidth, latency)?;
        Ok(())
    }

    /// Removes directed connection.
    pub fn disconnect(&mut self, origin: NodeId, neighbour: NodeId) -> Option<Connection> {
        self.nodes
            .get_mut(&origin)
            .and_then(|n| n.connections.shift_remove(&neighbour))
    }

    /// Returns connection by key.
    pub fn connection(&self, key: ConnectionKey) -> Option<&Connection> {
        self.nodes.get(&key.0).and_then(|n| n.connections.get(&key.1))
    }

    /// Returns mutable connection by key.
    pub fn connection_mut(&mut self, key: ConnectionKey) -> Option<&mut Connection> {
        self.nodes.get_mut(&key.0).and_then(|n| n.connections.get_mut(&key.1))
    }

    /// Iterates over all connections grouped by origin.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.nodes.values().flat_map(|n| n.connections.values())
    }
}
