//! Path metrics.
//!
//! A metric defines what the best path is: the weight of a single connection, how weights are accumulated along a
//! path and how accumulated costs are compared. The searcher in [`search`](crate::search) is generic over the metric.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dslab_dfs_storage::{DeviceId, DevicePool};

use crate::replicas::ReplicaRegistry;
use crate::task::TaskKind;
use crate::topology::{Connection, NodeId, Topology};

/// Read-only view of the engine state used by metrics and the searcher.
#[derive(Copy, Clone)]
pub struct SearchContext<'a> {
    /// Topology.
    pub topology: &'a Topology,
    /// Storage devices.
    pub pool: &'a DevicePool,
    /// Replica registry.
    pub replicas: &'a ReplicaRegistry,
}

impl<'a> SearchContext<'a> {
    /// Returns device which holds (for downloads) or would receive (for uploads) the object on the server.
    pub fn object_device(&self, server: NodeId, request: &TransferRequest) -> Option<DeviceId> {
        if let Some(target) = self.replicas.target_on(request.path, server) {
            return Some(target.device);
        }
        match request.kind {
            TaskKind::Download => None,
            TaskKind::Upload => self.topology.server(server).ok()?.fs.resolve_mount(request.path),
        }
    }

    /// Throughput a new operation on the device would get if the speed were split evenly.
    pub fn fair_share(&self, device: DeviceId) -> f64 {
        self.pool
            .device(device)
            .map_or(0., |d| d.max_speed() / (d.running_count() + 1) as f64)
    }

    /// Size of the transferred data: the file size for downloads, the requested size for uploads.
    pub fn object_size(&self, server: NodeId, request: &TransferRequest) -> u64 {
        match request.kind {
            TaskKind::Upload => request.size,
            TaskKind::Download => self
                .topology
                .server(server)
                .ok()
                .and_then(|s| s.fs.file(request.path))
                .map_or(request.size, |f| f.size),
        }
    }
}

/// Transfer for which the path is searched.
#[derive(Copy, Clone, Debug)]
pub struct TransferRequest<'a> {
    /// Transfer direction.
    pub kind: TaskKind,
    /// Logical path of the object.
    pub path: &'a str,
    /// Transfer size.
    pub size: u64,
}

/// Edge cost function together with accumulation and comparison rules.
pub trait PathMetric {
    /// Accumulated cost of a path.
    type Cost: Copy + fmt::Debug;

    /// Cost of a single connection.
    fn edge_weight(&self, connection: &Connection, size: u64, disk_bandwidth: f64, time: f64) -> Self::Cost;

    /// Cost of a path extended by an edge.
    fn combine(&self, path: Self::Cost, edge: Self::Cost) -> Self::Cost;

    /// Compares costs, `Ordering::Less` means that `a` is better.
    fn compare(&self, a: &Self::Cost, b: &Self::Cost) -> Ordering;

    /// Cost of the empty path.
    fn identity(&self) -> Self::Cost;

    /// Cost of an unreachable node.
    fn worst(&self) -> Self::Cost;

    /// Disk bandwidth the server can provide for the transfer.
    ///
    /// By default it is the fair share of the device which holds or receives the object.
    fn possible_disk_bandwidth(&self, ctx: &SearchContext, server: NodeId, request: &TransferRequest) -> f64 {
        ctx.object_device(server, request).map_or(0., |d| ctx.fair_share(d))
    }
}

// Hop count -----------------------------------------------------------------------------------------------------------

/// Minimizes the number of connections.
#[derive(Default)]
pub struct HopCount;

impl PathMetric for HopCount {
    type Cost = usize;

    fn edge_weight(&self, _connection: &Connection, _size: u64, _disk_bandwidth: f64, _time: f64) -> usize {
        1
    }

    fn combine(&self, path: usize, edge: usize) -> usize {
        path.saturating_add(edge)
    }

    fn compare(&self, a: &usize, b: &usize) -> Ordering {
        a.cmp(b)
    }

    fn identity(&self) -> usize {
        0
    }

    fn worst(&self) -> usize {
        usize::MAX
    }
}

// Widest bandwidth ----------------------------------------------------------------------------------------------------

/// Maximizes the bottleneck bandwidth of the path.
#[derive(Default)]
pub struct WidestBandwidth;

impl PathMetric for WidestBandwidth {
    type Cost = f64;

    fn edge_weight(&self, connection: &Connection, _size: u64, _disk_bandwidth: f64, time: f64) -> f64 {
        connection.bandwidth_at(time)
    }

    fn combine(&self, path: f64, edge: f64) -> f64 {
        path.min(edge)
    }

    fn compare(&self, a: &f64, b: &f64) -> Ordering {
        b.total_cmp(a)
    }

    fn identity(&self) -> f64 {
        f64::INFINITY
    }

    fn worst(&self) -> f64 {
        0.
    }
}

// Bandwidth and latency -----------------------------------------------------------------------------------------------

/// Bottleneck bandwidth and total latency of a path.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BandwidthLatencyCost {
    /// Bottleneck bandwidth.
    pub bandwidth: f64,
    /// Total latency in milliseconds.
    pub latency: f64,
}

/// Maximizes the bottleneck bandwidth, ties are broken by the smaller total latency.
#[derive(Default)]
pub struct BandwidthLatency;

impl PathMetric for BandwidthLatency {
    type Cost = BandwidthLatencyCost;

    fn edge_weight(&self, connection: &Connection, _size: u64, _disk_bandwidth: f64, time: f64) -> Self::Cost {
        BandwidthLatencyCost {
            bandwidth: connection.bandwidth_at(time),
            latency: connection.latency,
        }
    }

    fn combine(&self, path: Self::Cost, edge: Self::Cost) -> Self::Cost {
        BandwidthLatencyCost {
            bandwidth: path.bandwidth.min(edge.bandwidth),
            latency: path.latency + edge.latency,
        }
    }

    fn compare(&self, a: &Self::Cost, b: &Self::Cost) -> Ordering {
        b.bandwidth
            .total_cmp(&a.bandwidth)
            .then(a.latency.total_cmp(&b.latency))
    }

    fn identity(&self) -> Self::Cost {
        BandwidthLatencyCost {
            bandwidth: f64::INFINITY,
            latency: 0.,
        }
    }

    fn worst(&self) -> Self::Cost {
        BandwidthLatencyCost {
            bandwidth: 0.,
            latency: f64::INFINITY,
        }
    }
}

// Throughput ----------------------------------------------------------------------------------------------------------

/// End-to-end estimate of a transfer over a path.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ThroughputCost {
    /// Bottleneck of link and disk bandwidth.
    pub bandwidth: f64,
    /// Total latency in milliseconds.
    pub latency: f64,
    /// Transfer size.
    pub size: u64,
}

impl ThroughputCost {
    /// Estimated transfer time in seconds.
    pub fn transfer_time(&self) -> f64 {
        if self.size == 0 {
            return self.latency / 1000.;
        }
        if self.bandwidth <= 0. {
            return f64::INFINITY;
        }
        self.size as f64 / self.bandwidth + self.latency / 1000.
    }
}

fn throughput_weight(connection: &Connection, size: u64, disk_bandwidth: f64, time: f64) -> ThroughputCost {
    ThroughputCost {
        bandwidth: connection.bandwidth_at(time).min(disk_bandwidth),
        latency: connection.latency,
        size,
    }
}

fn throughput_combine(path: ThroughputCost, edge: ThroughputCost) -> ThroughputCost {
    ThroughputCost {
        bandwidth: path.bandwidth.min(edge.bandwidth),
        latency: path.latency + edge.latency,
        size: path.size.max(edge.size),
    }
}

fn throughput_compare(a: &ThroughputCost, b: &ThroughputCost) -> Ordering {
    a.transfer_time()
        .total_cmp(&b.transfer_time())
        .then(b.bandwidth.total_cmp(&a.bandwidth))
}

const THROUGHPUT_IDENTITY: ThroughputCost = ThroughputCost {
    bandwidth: f64::INFINITY,
    latency: 0.,
    size: 0,
};

const THROUGHPUT_WORST: ThroughputCost = ThroughputCost {
    bandwidth: 0.,
    latency: f64::INFINITY,
    size: u64::MAX,
};

/// Minimizes estimated transfer time taking both links and the disk of the target server into account.
#[derive(Default)]
pub struct Throughput;

impl PathMetric for Throughput {
    type Cost = ThroughputCost;

    fn edge_weight(&self, connection: &Connection, size: u64, disk_bandwidth: f64, time: f64) -> Self::Cost {
        throughput_weight(connection, size, disk_bandwidth, time)
    }

    fn combine(&self, path: Self::Cost, edge: Self::Cost) -> Self::Cost {
        throughput_combine(path, edge)
    }

    fn compare(&self, a: &Self::Cost, b: &Self::Cost) -> Ordering {
        throughput_compare(a, b)
    }

    fn identity(&self) -> Self::Cost {
        THROUGHPUT_IDENTITY
    }

    fn worst(&self) -> Self::Cost {
        THROUGHPUT_WORST
    }
}

// Hierarchical --------------------------------------------------------------------------------------------------------

/// Same as [`Throughput`], but the disk bandwidth is the one of the fastest tier which holds or can receive the object.
///
/// On servers with tiering enabled an accessed file is moved to the fastest device with enough space, so this is the
/// bandwidth subsequent transfers are going to see.
#[derive(Default)]
pub struct Hierarchical;

impl PathMetric for Hierarchical {
    type Cost = ThroughputCost;

    fn edge_weight(&self, connection: &Connection, size: u64, disk_bandwidth: f64, time: f64) -> Self::Cost {
        throughput_weight(connection, size, disk_bandwidth, time)
    }

    fn combine(&self, path: Self::Cost, edge: Self::Cost) -> Self::Cost {
        throughput_combine(path, edge)
    }

    fn compare(&self, a: &Self::Cost, b: &Self::Cost) -> Ordering {
        throughput_compare(a, b)
    }

    fn identity(&self) -> Self::Cost {
        THROUGHPUT_IDENTITY
    }

    fn worst(&self) -> Self::Cost {
        THROUGHPUT_WORST
    }

    fn possible_disk_bandwidth(&self, ctx: &SearchContext, server: NodeId, request: &TransferRequest) -> f64 {
        let Some(current) = ctx.object_device(server, request) else {
            return 0.;
        };
        let Ok(node) = ctx.topology.server(server) else {
            return 0.;
        };
        let size = ctx.object_size(server, request);
        let mut best = ctx.fair_share(current);
        if node.hierarchical {
            for &device in node.devices.iter() {
                let feasible = ctx.pool.device(device).map_or(false, |d| d.available_space() >= size);
                if feasible {
                    best = best.max(ctx.fair_share(device));
                }
            }
        }
        best
    }
}

// Metric selection ----------------------------------------------------------------------------------------------------

/// Selects one of the available metrics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// See [`HopCount`].
    HopCount,
    /// See [`WidestBandwidth`].
    WidestBandwidth,
    /// See [`BandwidthLatency`].
    BandwidthLatency,
    /// See [`Throughput`].
    #[default]
    Throughput,
    /// See [`Hierarchical`].
    Hierarchical,
}

impl MetricKind {
    /// All metric kinds.
    pub const ALL: [MetricKind; 5] = [
        MetricKind::HopCount,
        MetricKind::WidestBandwidth,
        MetricKind::BandwidthLatency,
        MetricKind::Throughput,
        MetricKind::Hierarchical,
    ];

    /// Name used in configs and command line.
    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::HopCount => "hop_count",
            MetricKind::WidestBandwidth => "widest_bandwidth",
            MetricKind::BandwidthLatency => "bandwidth_latency",
            MetricKind::Throughput => "throughput",
            MetricKind::Hierarchical => "hierarchical",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        MetricKind::ALL
            .iter()
            .find(|m| m.name() == normalized)
            .copied()
            .ok_or_else(|| format!("unknown metric: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{BandwidthLatency, BandwidthLatencyCost, MetricKind, PathMetric, ThroughputCost, WidestBandwidth};

    #[test]
    fn metric_names_round_trip() {
        for metric in MetricKind::ALL {
            assert_eq!(metric.name().parse::<MetricKind>(), Ok(metric));
        }
        assert_eq!("Hop-Count".parse::<MetricKind>(), Ok(MetricKind::HopCount));
        assert!("fastest".parse::<MetricKind>().is_err());
    }

    #[test]
    fn wider_is_better() {
        let metric = WidestBandwidth;
        assert_eq!(metric.compare(&10., &5.), Ordering::Less);
        assert_eq!(metric.compare(&metric.identity(), &metric.worst()), Ordering::Less);
        assert_eq!(metric.combine(metric.identity(), 3.), 3.);
    }

    #[test]
    fn latency_breaks_bandwidth_ties() {
        let metric = BandwidthLatency;
        let fast = BandwidthLatencyCost {
            bandwidth: 10.,
            latency: 5.,
        };
        let slow = BandwidthLatencyCost {
            bandwidth: 10.,
            latency: 8.,
        };
        assert_eq!(metric.compare(&fast, &slow), Ordering::Less);
    }

    #[test]
    fn transfer_time_estimate() {
        let cost = ThroughputCost {
            bandwidth: 10.,
            latency: 500.,
            size: 100,
        };
        assert_eq!(cost.transfer_time(), 10.5);
    }
}
