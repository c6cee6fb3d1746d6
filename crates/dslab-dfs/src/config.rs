//! YAML scenario configuration.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use dslab_dfs_storage::DeviceSpec;

use crate::characteristic::{BandwidthCharacteristic, DEFAULT_PERIOD, DEFAULT_STEP};
use crate::driver::TimeSliceDriver;
use crate::engine::DfsEngine;
use crate::error::DfsError;
use crate::metrics::MetricKind;
use crate::replicas::ReplicaTarget;
use crate::task::{TaskKind, TaskSpec};

fn default_step() -> f64 {
    crate::driver::DEFAULT_STEP
}

fn default_horizon() -> f64 {
    f64::INFINITY
}

fn default_true() -> bool {
    true
}

fn default_period() -> f64 {
    DEFAULT_PERIOD
}

fn default_sampling_step() -> f64 {
    DEFAULT_STEP
}

fn invalid_value(e: DfsError) -> DfsError {
    match e {
        DfsError::InvalidParameter(msg) => DfsError::Config(msg),
        e => e,
    }
}

/// Storage device of a server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name, unique within the server.
    pub name: String,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Maximum speed in bytes per second.
    pub speed: f64,
}

/// Mount of a file tree path on a device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MountConfig {
    /// Mounted path.
    pub path: String,
    /// Name of the server device.
    pub device: String,
}

/// File which exists at the start of the simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    /// File path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Name of the device to place the file on. By default the file goes to the device its path is mounted on.
    #[serde(default)]
    pub device: Option<String>,
}

/// Server node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Node label.
    pub label: String,
    /// Whether tiering is enabled.
    #[serde(default)]
    pub hierarchical: bool,
    /// Storage devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Mounts.
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    /// Initial files.
    #[serde(default)]
    pub files: Vec<FileConfig>,
}

/// Client task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Transfer direction.
    pub kind: TaskKind,
    /// File path.
    pub path: String,
    /// Uploaded size.
    #[serde(default)]
    pub size: u64,
    /// Label of the server which must be used.
    #[serde(default)]
    pub target: Option<String>,
    /// Path metric, the scenario metric is used by default.
    #[serde(default)]
    pub metric: Option<MetricKind>,
    /// Earliest start time.
    #[serde(default)]
    pub start: f64,
}

/// Client node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Node label.
    pub label: String,
    /// Tasks in execution order.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Bandwidth characteristic of a connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CharacteristicConfig {
    /// Period in milliseconds.
    #[serde(default = "default_period")]
    pub period: f64,
    /// Sampling step in milliseconds.
    #[serde(default = "default_sampling_step")]
    pub step: f64,
    /// Control points as `[phase, modifier]` pairs.
    #[serde(default)]
    pub points: Vec<(f64, f64)>,
}

/// Connection between two nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Origin label.
    pub from: String,
    /// Neighbour label.
    pub to: String,
    /// Nominal bandwidth in bytes per second.
    pub bandwidth: f64,
    /// Latency in milliseconds.
    #[serde(default)]
    pub latency: f64,
    /// Whether the reverse connection with the same parameters is added too.
    #[serde(default = "default_true")]
    pub bidirectional: bool,
    /// Bandwidth characteristic applied to both directions.
    #[serde(default)]
    pub characteristic: Option<CharacteristicConfig>,
}

/// Replica placed on a server device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Server label.
    pub server: String,
    /// Device name.
    pub device: String,
}

/// Replica set of a file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    /// File path. The file must exist on at least one server.
    pub path: String,
    /// Complete set of replicas.
    pub targets: Vec<ReplicaConfig>,
}

/// YAML-serializable scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Time slice of the driver in seconds.
    #[serde(default = "default_step")]
    pub step: f64,
    /// Time after which the simulation is stopped.
    #[serde(default = "default_horizon")]
    pub horizon: f64,
    /// Default path metric of tasks.
    #[serde(default)]
    pub metric: MetricKind,
    /// Server nodes.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Client nodes.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    /// Connections.
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    /// Replica sets applied after initial files are created.
    #[serde(default)]
    pub replicas: Vec<ReplicaSetConfig>,
}

impl ScenarioConfig {
    /// Reads scenario from YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DfsError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DfsError::Config(format!("{}: {}", path.display(), e)))?;
        serde_yaml::from_reader(file).map_err(|e| DfsError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parses scenario from YAML string.
    pub fn from_yaml(s: &str) -> Result<Self, DfsError> {
        serde_yaml::from_str(s).map_err(|e| DfsError::Config(e.to_string()))
    }

    fn device_by_name(&self, engine: &DfsEngine, server: &str, device: &str) -> Result<ReplicaTarget, DfsError> {
        let id = engine.node_by_label(server)?;
        engine
            .topology()
            .server(id)?
            .devices
            .iter()
            .copied()
            .find(|&d| engine.pool().device(d).map_or(false, |d| d.name() == device))
            .map(|d| ReplicaTarget::new(id, d))
            .ok_or_else(|| DfsError::Config(format!("server {} has no device {}", server, device)))
    }

    /// Builds engine and driver described by the scenario.
    pub fn build(&self) -> Result<(DfsEngine, TimeSliceDriver), DfsError> {
        if self.step.is_nan() || self.step <= 0. {
            return Err(DfsError::Config(format!("step must be positive, got {}", self.step)));
        }
        let mut engine = DfsEngine::new();
        for server in self.servers.iter() {
            engine.add_server(Some(&server.label))?;
        }
        for client in self.clients.iter() {
            engine.add_client(Some(&client.label))?;
        }

        for config in self.servers.iter() {
            let server = engine.node_by_label(&config.label)?;
            for device in config.devices.iter() {
                engine
                    .add_device(server, DeviceSpec::new(&device.name, device.capacity, device.speed))
                    .map_err(invalid_value)?;
            }
            for mount in config.mounts.iter() {
                let target = self.device_by_name(&engine, &config.label, &mount.device)?;
                engine.mount(server, &mount.path, target.device)?;
            }
            for file in config.files.iter() {
                match &file.device {
                    Some(device) => {
                        let target = self.device_by_name(&engine, &config.label, device)?;
                        engine.create_file_on(target, &file.path, file.size, false)?;
                    }
                    None => {
                        engine.create_file(server, &file.path, file.size)?;
                    }
                }
            }
            engine.set_hierarchical(server, config.hierarchical)?;
        }

        for set in self.replicas.iter() {
            let targets = set
                .targets
                .iter()
                .map(|t| self.device_by_name(&engine, &t.server, &t.device))
                .collect::<Result<Vec<_>, _>>()?;
            engine.replace_replica_targets(&set.path, &targets, false)?;
        }

        for connection in self.connections.iter() {
            let from = engine.node_by_label(&connection.from)?;
            let to = engine.node_by_label(&connection.to)?;
            let characteristic = match &connection.characteristic {
                Some(c) => {
                    let mut characteristic = BandwidthCharacteristic::try_new(c.period, c.step).map_err(invalid_value)?;
                    for &(phase, modifier) in c.points.iter() {
                        characteristic.add_point(phase, modifier);
                    }
                    Some(characteristic)
                }
                None => None,
            };
            let mut keys = vec![(from, to)];
            if connection.bidirectional {
                keys.push((to, from));
            }
            for (origin, neighbour) in keys {
                let added = engine
                    .connect(origin, neighbour, connection.bandwidth, connection.latency)
                    .map_err(invalid_value)?;
                if let Some(characteristic) = &characteristic {
                    added.characteristic = characteristic.clone();
                }
            }
        }

        for config in self.clients.iter() {
            let client = engine.node_by_label(&config.label)?;
            for task in config.tasks.iter() {
                let metric = task.metric.unwrap_or(self.metric);
                let mut spec = match task.kind {
                    TaskKind::Upload => TaskSpec::upload(&task.path, task.size, metric),
                    TaskKind::Download => TaskSpec::download(&task.path, metric),
                };
                spec = spec.not_before(task.start);
                if let Some(target) = &task.target {
                    spec = spec.with_target(engine.node_by_label(target)?);
                }
                engine.submit_task(client, spec)?;
            }
        }

        Ok((engine, TimeSliceDriver::new(self.step, self.horizon)))
    }
}
