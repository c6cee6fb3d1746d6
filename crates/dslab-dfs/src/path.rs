//! Transfer paths.

use dslab_dfs_storage::{DeviceId, DevicePool, OperationRef};

use crate::task::TaskId;
use crate::topology::{ConnectionKey, NodeId, Topology};

/// Selected sequence of connections from the origin to the target server.
///
/// The path refers to connections by their keys, so it stays valid only while the topology is unchanged. Once the
/// transfer starts, the path is bound to the storage operation on the target device.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferPath {
    /// Task which requested the path, if any.
    pub task: Option<TaskId>,
    /// Node the transfer starts from.
    pub origin: NodeId,
    /// Server holding or receiving the object.
    pub target: NodeId,
    /// Device of the target server used by the transfer.
    pub device: DeviceId,
    /// Connections in order.
    pub links: Vec<ConnectionKey>,
    /// Time when the path was selected.
    pub time: f64,
    operation: Option<OperationRef>,
}

impl TransferPath {
    /// Creates unbound path.
    pub fn new(
        task: Option<TaskId>,
        origin: NodeId,
        target: NodeId,
        device: DeviceId,
        links: Vec<ConnectionKey>,
        time: f64,
    ) -> Self {
        Self {
            task,
            origin,
            target,
            device,
            links,
            time,
            operation: None,
        }
    }

    /// Binds the path to the running operation.
    pub fn bind(&mut self, operation: OperationRef) {
        self.operation = Some(operation);
    }

    /// Operation the path is bound to.
    pub fn operation(&self) -> Option<OperationRef> {
        self.operation
    }

    /// Number of connections.
    pub fn hops(&self) -> usize {
        self.links.len()
    }

    /// Bottleneck link bandwidth at `time`. Empty path is not limited.
    pub fn link_bandwidth(&self, topology: &Topology, time: f64) -> f64 {
        self.links
            .iter()
            .map(|key| topology.connection(*key).map_or(0., |c| c.bandwidth_at(time)))
            .fold(f64::INFINITY, f64::min)
    }

    /// Bottleneck of link bandwidths averaged over `[time, time + duration]`.
    pub fn average_link_bandwidth(&self, topology: &Topology, time: f64, duration: f64) -> f64 {
        self.links
            .iter()
            .map(|key| {
                topology
                    .connection(*key)
                    .map_or(0., |c| c.average_bandwidth(time, duration))
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Total latency in milliseconds.
    pub fn latency(&self, topology: &Topology) -> f64 {
        self.links
            .iter()
            .filter_map(|key| topology.connection(*key))
            .map(|c| c.latency)
            .sum()
    }

    /// Storage bandwidth available to the transfer.
    ///
    /// For a bound path it is the current throughput of the operation, otherwise the fair share a new operation
    /// would get on the device.
    pub fn storage_bandwidth(&self, pool: &DevicePool) -> f64 {
        if let Some(op) = self.operation.and_then(|op| pool.operation(op)) {
            return op.throughput();
        }
        pool.device(self.device)
            .map_or(0., |d| d.max_speed() / (d.running_count() + 1) as f64)
    }

    /// Throughput the transfer can achieve at `time`: the smaller of link and storage bandwidth.
    pub fn possible_throughput(&self, topology: &Topology, pool: &DevicePool, time: f64) -> f64 {
        self.link_bandwidth(topology, time).min(self.storage_bandwidth(pool))
    }
}
