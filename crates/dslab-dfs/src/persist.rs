//! Export and restore of the engine state.
//!
//! The state is represented as a tree of named [`Element`]s with flat string attributes and ordered children:
//!
//! ```text
//! dfs
//! ├── server label hierarchical
//! │   ├── device id name capacity max_speed
//! │   ├── mount path device
//! │   └── file path size device access_count
//! ├── client label
//! │   └── task kind path size metric not_before [target]
//! └── connection origin neighbour bandwidth latency
//!     └── characteristic period step
//!         └── point phase modifier
//! ```
//!
//! Nodes are referenced by labels and devices keep their ids. Replica sets are not stored explicitly, they are
//! rebuilt from files with equal paths on different servers.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dslab_dfs_storage::DeviceSpec;

use crate::characteristic::BandwidthCharacteristic;
use crate::engine::DfsEngine;
use crate::error::DfsError;
use crate::metrics::MetricKind;
use crate::replicas::ReplicaTarget;
use crate::task::{TaskKind, TaskSpec};
use crate::topology::{NodeId, NodeKind};

/// Named element with string attributes and child elements.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Element name.
    pub name: String,
    /// Attributes ordered by name.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Child elements in order.
    #[serde(default)]
    pub children: Vec<Element>,
}

impl Element {
    /// Creates element without attributes and children.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Adds attribute.
    pub fn attr<T: ToString>(mut self, key: &str, value: T) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds child element.
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Iterates over children with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Returns raw attribute value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// Returns required attribute parsed to `T`.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<T, DfsError> {
        let value = self
            .get(key)
            .ok_or_else(|| DfsError::InvalidElement(format!("<{}> has no attribute {}", self.name, key)))?;
        value.parse().map_err(|_| {
            DfsError::InvalidElement(format!("<{}> has invalid value of {}: {}", self.name, key, value))
        })
    }

    /// Returns optional attribute parsed to `T`.
    pub fn parse_opt<T: FromStr>(&self, key: &str) -> Result<Option<T>, DfsError> {
        match self.get(key) {
            None => Ok(None),
            Some(_) => self.parse(key).map(Some),
        }
    }

    /// Serializes the tree to JSON.
    pub fn to_json(&self) -> Result<String, DfsError> {
        serde_json::to_string_pretty(self).map_err(|e| DfsError::InvalidElement(e.to_string()))
    }

    /// Deserializes the tree from JSON.
    pub fn from_json(s: &str) -> Result<Self, DfsError> {
        serde_json::from_str(s).map_err(|e| DfsError::InvalidElement(e.to_string()))
    }

    /// Serializes the tree to YAML.
    pub fn to_yaml(&self) -> Result<String, DfsError> {
        serde_yaml::to_string(self).map_err(|e| DfsError::InvalidElement(e.to_string()))
    }

    /// Deserializes the tree from YAML.
    pub fn from_yaml(s: &str) -> Result<Self, DfsError> {
        serde_yaml::from_str(s).map_err(|e| DfsError::InvalidElement(e.to_string()))
    }
}

fn invalid_element(e: DfsError) -> DfsError {
    match e {
        DfsError::InvalidParameter(msg) => DfsError::InvalidElement(msg),
        e => e,
    }
}

fn characteristic_element(characteristic: &BandwidthCharacteristic) -> Element {
    let mut element = Element::new("characteristic")
        .attr("period", characteristic.period())
        .attr("step", characteristic.step());
    for point in characteristic.points() {
        element = element.child(
            Element::new("point")
                .attr("phase", point.phase)
                .attr("modifier", point.modifier),
        );
    }
    element
}

impl DfsEngine {
    /// Exports topology, storage, file trees and client plans.
    pub fn export(&self) -> Element {
        let mut root = Element::new("dfs");
        for node in self.topology.nodes() {
            let element = match node.kind() {
                NodeKind::Server(server) => {
                    let mut element = Element::new("server")
                        .attr("label", node.label())
                        .attr("hierarchical", server.hierarchical);
                    for &id in server.devices.iter() {
                        if let Some(device) = self.pool.device(id) {
                            element = element.child(
                                Element::new("device")
                                    .attr("id", id)
                                    .attr("name", device.name())
                                    .attr("capacity", device.capacity())
                                    .attr("max_speed", device.max_speed()),
                            );
                        }
                    }
                    // own mounts of files are restored from the file device
                    for (path, device) in server.fs.mounts().into_iter().filter(|(p, _)| server.fs.file(p).is_none()) {
                        element = element.child(Element::new("mount").attr("path", path).attr("device", device));
                    }
                    for (path, entry) in server.fs.files() {
                        let device = server
                            .fs
                            .resolve(&path)
                            .and_then(|index| server.fs.device_of(index));
                        let mut file = Element::new("file")
                            .attr("path", &path)
                            .attr("size", entry.size)
                            .attr("access_count", entry.access_count);
                        if let Some(device) = device {
                            file = file.attr("device", device);
                        }
                        element = element.child(file);
                    }
                    element
                }
                NodeKind::Client(client) => {
                    let mut element = Element::new("client").attr("label", node.label());
                    for task in client.plan.iter().filter_map(|id| self.task(*id)) {
                        let spec = &task.spec;
                        let mut task = Element::new("task")
                            .attr("kind", spec.kind)
                            .attr("path", &spec.path)
                            .attr("size", spec.size)
                            .attr("metric", spec.metric)
                            .attr("not_before", spec.not_before);
                        if let Some(target) = spec.target {
                            task = task.attr("target", self.topology.label(target));
                        }
                        element = element.child(task);
                    }
                    element
                }
            };
            root = root.child(element);
        }
        for connection in self.topology.connections() {
            root = root.child(
                Element::new("connection")
                    .attr("origin", self.topology.label(connection.origin))
                    .attr("neighbour", self.topology.label(connection.neighbour))
                    .attr("bandwidth", connection.max_bandwidth)
                    .attr("latency", connection.latency)
                    .child(characteristic_element(&connection.characteristic)),
            );
        }
        root
    }

    /// Creates engine from the exported tree.
    pub fn restore(root: &Element) -> Result<Self, DfsError> {
        if root.name != "dfs" {
            return Err(DfsError::InvalidElement(format!("unexpected root <{}>", root.name)));
        }
        let mut engine = DfsEngine::new();

        // nodes first, so that tasks and connections can refer to them by label
        for element in root.children.iter() {
            match element.name.as_str() {
                "server" => {
                    let label: String = element.parse("label")?;
                    engine.add_server(Some(&label))?;
                }
                "client" => {
                    let label: String = element.parse("label")?;
                    engine.add_client(Some(&label))?;
                }
                "connection" => {}
                other => return Err(DfsError::InvalidElement(format!("unexpected element <{}>", other))),
            }
        }

        for element in root.children_named("server") {
            let server = engine.node_by_label(element.get("label").unwrap_or_default())?;
            for device in element.children_named("device") {
                let spec = DeviceSpec::new(
                    device.get("name").unwrap_or_default(),
                    device.parse("capacity")?,
                    device.parse("max_speed")?,
                );
                engine
                    .add_device_with_id(server, device.parse("id")?, spec)
                    .map_err(invalid_element)?;
            }
            for mount in element.children_named("mount") {
                let path: String = mount.parse("path")?;
                engine.mount(server, &path, mount.parse("device")?)?;
            }
            for file in element.children_named("file") {
                let path: String = file.parse("path")?;
                let device = match file.parse_opt("device")? {
                    Some(device) => device,
                    None => return Err(DfsError::InvalidElement(format!("file [{}] is not mounted", path))),
                };
                engine.create_file_on(ReplicaTarget::new(server, device), &path, file.parse("size")?, true)?;
                let access_count: u64 = file.parse_opt("access_count")?.unwrap_or(0);
                engine
                    .topology
                    .server_mut(server)?
                    .fs
                    .set_access_count(&path, access_count)
                    .map_err(|_| DfsError::InvalidElement(format!("file [{}] cannot be restored", path)))?;
            }
            engine.set_hierarchical(server, element.parse_opt("hierarchical")?.unwrap_or(false))?;
        }

        for element in root.children_named("client") {
            let client = engine.node_by_label(element.get("label").unwrap_or_default())?;
            for task in element.children_named("task") {
                let kind = match task.get("kind") {
                    Some("upload") => TaskKind::Upload,
                    Some("download") => TaskKind::Download,
                    other => {
                        return Err(DfsError::InvalidElement(format!("unknown task kind {:?}", other)));
                    }
                };
                let metric = match task.get("metric") {
                    Some(metric) => MetricKind::from_str(metric).map_err(DfsError::InvalidElement)?,
                    None => MetricKind::default(),
                };
                let mut spec = match kind {
                    TaskKind::Upload => TaskSpec::upload(&task.parse::<String>("path")?, task.parse("size")?, metric),
                    TaskKind::Download => TaskSpec::download(&task.parse::<String>("path")?, metric),
                };
                spec.not_before = task.parse_opt("not_before")?.unwrap_or(0.);
                if let Some(target) = task.get("target") {
                    spec.target = Some(engine.node_by_label(target)?);
                }
                engine.submit_task(client, spec)?;
            }
        }

        for element in root.children_named("connection") {
            let origin = engine.node_by_label(element.get("origin").unwrap_or_default())?;
            let neighbour = engine.node_by_label(element.get("neighbour").unwrap_or_default())?;
            let (bandwidth, latency) = (element.parse("bandwidth")?, element.parse("latency")?);
            let connection = engine
                .connect(origin, neighbour, bandwidth, latency)
                .map_err(invalid_element)?;
            if let Some(element) = element.children_named("characteristic").next() {
                let (period, step) = (element.parse("period")?, element.parse("step")?);
                let mut characteristic = BandwidthCharacteristic::try_new(period, step).map_err(invalid_element)?;
                for point in element.children_named("point") {
                    characteristic.add_point(point.parse("phase")?, point.parse("modifier")?);
                }
                connection.characteristic = characteristic;
            }
        }
        Ok(engine)
    }

    /// Returns id of the node with the given label.
    pub fn node_by_label(&self, label: &str) -> Result<NodeId, DfsError> {
        self.topology
            .node_id(label)
            .ok_or_else(|| DfsError::UnknownNode(label.to_string()))
    }
}
