#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod characteristic;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fs;
pub mod metrics;
pub mod path;
pub mod persist;
pub mod registry;
pub mod replicas;
pub mod replication;
pub mod search;
pub mod task;
pub mod tiering;
pub mod topology;

#[cfg(test)]
mod tests;

pub use characteristic::BandwidthCharacteristic;
pub use config::ScenarioConfig;
pub use driver::TimeSliceDriver;
pub use engine::DfsEngine;
pub use error::DfsError;
pub use metrics::MetricKind;
pub use path::TransferPath;
pub use persist::Element;
pub use replicas::ReplicaTarget;
pub use task::{Task, TaskId, TaskKind, TaskSpec, TaskState};
pub use tiering::MigrationPlan;
pub use topology::{NodeId, Topology};

pub use dslab_dfs_storage::{DeviceId, DeviceSpec};
