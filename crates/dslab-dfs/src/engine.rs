//! Engine facade.
//!
//! [`DfsEngine`] owns the topology, the storage devices and the replica registry, and remembers the purpose of every
//! storage operation it submits (a task transfer, a migration step or a replica update). The driver advances it in
//! time slices with [`DfsEngine::tick`]. Completions reported by the devices are turned into side effects: tasks are
//! settled, migrated files are remounted, uploads are propagated to replicas and accesses trigger tiering.

use std::cell::Cell;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use dslab_dfs_storage::{
    log_debug, log_error, log_info, log_warn, DeviceId, DevicePool, DeviceSpec, OperationFinished, OperationRef,
    StorageEvent, StorageOperation, TransferLimit,
};

use crate::characteristic::BandwidthCharacteristic;
use crate::error::DfsError;
use crate::fs::{normalize, FileEntry, FsError};
use crate::metrics::{
    BandwidthLatency, Hierarchical, HopCount, MetricKind, PathMetric, SearchContext, Throughput, TransferRequest,
    WidestBandwidth,
};
use crate::path::TransferPath;
use crate::replicas::{ReplicaRegistry, ReplicaTarget};
use crate::search::PathSearcher;
use crate::task::{Task, TaskId, TaskKind, TaskSpec, TaskState};
use crate::tiering::{plan_access, MigrationPlan, MigrationStep};
use crate::topology::{Connection, ConnectionKey, NodeId, Topology};

/// Purpose of a submitted storage operation.
pub(crate) enum Transfer {
    Task {
        task: TaskId,
        route: TransferPath,
        limit: Rc<Cell<f64>>,
    },
    Migration {
        server: NodeId,
        step: MigrationStep,
    },
    Propagation {
        path: String,
        source: ReplicaTarget,
        target: ReplicaTarget,
        size: u64,
        route: TransferPath,
        limit: Rc<Cell<f64>>,
    },
}

/// Distributed file system simulation engine.
#[derive(Default)]
pub struct DfsEngine {
    pub(crate) topology: Topology,
    pub(crate) pool: DevicePool,
    pub(crate) replicas: ReplicaRegistry,
    tasks: IndexMap<TaskId, Task>,
    next_task_id: TaskId,
    pub(crate) transfers: FxHashMap<OperationRef, Transfer>,
    time: f64,
}

pub(crate) fn fs_error(e: FsError, server: &str, path: &str) -> DfsError {
    match e {
        FsError::Exists => DfsError::AlreadyExists(format!("[{}] on server {}", path, server)),
        FsError::NotFound | FsError::NotADirectory | FsError::Root => DfsError::UnknownObject {
            server: server.to_string(),
            path: path.to_string(),
        },
    }
}

fn check_device_spec(spec: &DeviceSpec) -> Result<(), DfsError> {
    if spec.max_speed.is_nan() || spec.max_speed <= 0. {
        return Err(DfsError::InvalidParameter(format!(
            "speed of device {} must be > 0, got {}",
            spec.name, spec.max_speed
        )));
    }
    Ok(())
}

impl DfsEngine {
    /// Creates engine with empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulation time: the end of the last processed time slice.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Storage devices.
    pub fn pool(&self) -> &DevicePool {
        &self.pool
    }

    /// Replica registry.
    pub fn replicas(&self) -> &ReplicaRegistry {
        &self.replicas
    }

    pub(crate) fn search_context(&self) -> SearchContext<'_> {
        SearchContext {
            topology: &self.topology,
            pool: &self.pool,
            replicas: &self.replicas,
        }
    }

    // Topology --------------------------------------------------------------------------------------------------------

    /// Adds server node, see [`Topology::add_server`].
    pub fn add_server(&mut self, label: Option<&str>) -> Result<NodeId, DfsError> {
        self.topology.add_server(label)
    }

    /// Adds client node, see [`Topology::add_client`].
    pub fn add_client(&mut self, label: Option<&str>) -> Result<NodeId, DfsError> {
        self.topology.add_client(label)
    }

    /// Renames node keeping labels unique.
    pub fn rename_node(&mut self, node: NodeId, label: &str) -> Result<(), DfsError> {
        self.topology.rename_node(node, label)
    }

    /// Removes node with its connections.
    ///
    /// Devices of a removed server are removed along with their files and replicas. Running tasks of a removed client
    /// fail.
    pub fn remove_node(&mut self, node: NodeId) -> Result<(), DfsError> {
        let label = self.topology.label(node);
        let devices = match self.topology.node(node) {
            Some(n) => n.as_server().map(|s| s.devices.clone()).unwrap_or_default(),
            None => return Err(DfsError::UnknownNode(label)),
        };
        for device in devices {
            self.remove_device(node, device)?;
        }
        self.drop_transfers(|transfer, engine| match transfer {
            Transfer::Task { task, route, .. } => {
                engine.tasks.get(task).map_or(false, |t| t.client == node) || route.target == node
            }
            _ => false,
        });
        self.replicas.remove_server(node);
        self.topology.remove_node(node)?;
        log_debug!(self.time, "engine", "removed node {}", label);
        Ok(())
    }

    /// Adds directed connection.
    pub fn connect(
        &mut self,
        origin: NodeId,
        neighbour: NodeId,
        max_bandwidth: f64,
        latency: f64,
    ) -> Result<&mut Connection, DfsError> {
        self.topology.connect(origin, neighbour, max_bandwidth, latency)
    }

    /// Adds connections in both directions.
    pub fn connect_both(
        &mut self,
        first: NodeId,
        second: NodeId,
        max_bandwidth: f64,
        latency: f64,
    ) -> Result<(), DfsError> {
        self.topology.connect_both(first, second, max_bandwidth, latency)
    }

    /// Sets bandwidth characteristic of the connection.
    pub fn set_characteristic(
        &mut self,
        key: ConnectionKey,
        characteristic: BandwidthCharacteristic,
    ) -> Result<(), DfsError> {
        let label = self.topology.label(key.0);
        let connection = self
            .topology
            .connection_mut(key)
            .ok_or_else(|| DfsError::UnknownNode(label))?;
        connection.characteristic = characteristic;
        Ok(())
    }

    /// Removes directed connection.
    pub fn disconnect(&mut self, origin: NodeId, neighbour: NodeId) -> Option<Connection> {
        self.topology.disconnect(origin, neighbour)
    }

    // Storage ---------------------------------------------------------------------------------------------------------

    /// Adds storage device to the server.
    pub fn add_device(&mut self, server: NodeId, spec: DeviceSpec) -> Result<DeviceId, DfsError> {
        self.topology.server(server)?;
        check_device_spec(&spec)?;
        let device = self.pool.add_device(spec);
        self.topology.server_mut(server)?.devices.push(device);
        Ok(device)
    }

    pub(crate) fn add_device_with_id(
        &mut self,
        server: NodeId,
        device: DeviceId,
        spec: DeviceSpec,
    ) -> Result<(), DfsError> {
        self.topology.server(server)?;
        check_device_spec(&spec)?;
        if !self.pool.add_device_with_id(device, spec) {
            return Err(DfsError::AlreadyExists(format!("device {}", device)));
        }
        self.topology.server_mut(server)?.devices.push(device);
        Ok(())
    }

    /// Removes storage device from the server along with the files located on it.
    pub fn remove_device(&mut self, server: NodeId, device: DeviceId) -> Result<(), DfsError> {
        if !self.topology.server(server)?.devices.contains(&device) {
            return Err(DfsError::UnknownDevice(device));
        }
        self.drop_transfers(|transfer, _| match transfer {
            Transfer::Task { route, .. } => route.device == device,
            Transfer::Migration { step, .. } => step.source == device || step.target == device,
            Transfer::Propagation { source, target, .. } => source.device == device || target.device == device,
        });
        let node = self.topology.server_mut(server)?;
        let lost: Vec<String> = node.fs.files_on(device).into_iter().map(|f| f.path).collect();
        for path in lost.iter() {
            node.fs.remove(path).ok();
            self.replicas.remove(path, ReplicaTarget::new(server, device));
        }
        node.fs.unmount_device(device);
        node.devices.retain(|&d| d != device);
        self.pool.remove_device(device);
        log_debug!(
            self.time,
            "engine",
            "removed device {} from {} with {} files",
            device,
            self.topology.label(server),
            lost.len()
        );
        Ok(())
    }

    fn check_owned_device(&self, server: NodeId, device: DeviceId) -> Result<(), DfsError> {
        if self.topology.server(server)?.devices.contains(&device) {
            Ok(())
        } else {
            Err(DfsError::UnknownDevice(device))
        }
    }

    /// Mounts object at `path` of the server file tree on the server device.
    pub fn mount(&mut self, server: NodeId, path: &str, device: DeviceId) -> Result<(), DfsError> {
        self.check_owned_device(server, device)?;
        let label = self.topology.label(server);
        self.topology
            .server_mut(server)?
            .fs
            .mount(path, device)
            .map_err(|e| fs_error(e, &label, path))
    }

    /// Removes own mount of the object at `path`.
    pub fn unmount(&mut self, server: NodeId, path: &str) -> Result<Option<DeviceId>, DfsError> {
        let label = self.topology.label(server);
        self.topology
            .server_mut(server)?
            .fs
            .unmount(path)
            .map_err(|e| fs_error(e, &label, path))
    }

    /// Enables or disables tiering on the server.
    pub fn set_hierarchical(&mut self, server: NodeId, hierarchical: bool) -> Result<(), DfsError> {
        self.topology.server_mut(server)?.hierarchical = hierarchical;
        Ok(())
    }

    /// Returns file attributes.
    pub fn file(&self, server: NodeId, path: &str) -> Option<&FileEntry> {
        self.topology.server(server).ok()?.fs.file(path)
    }

    /// Returns device the file is located on.
    pub fn file_device(&self, server: NodeId, path: &str) -> Option<DeviceId> {
        let fs = &self.topology.server(server).ok()?.fs;
        fs.resolve(path).and_then(|index| fs.device_of(index))
    }

    /// Creates file on the device its path is mounted on and registers it as a replica.
    pub fn create_file(&mut self, server: NodeId, path: &str, size: u64) -> Result<ReplicaTarget, DfsError> {
        let path = normalize(path);
        let label = self.topology.label(server);
        let device = self
            .topology
            .server(server)?
            .fs
            .resolve_mount(&path)
            .ok_or_else(|| DfsError::NotMounted {
                server: label,
                path: path.clone(),
            })?;
        self.create_file_on(ReplicaTarget::new(server, device), &path, size, false)
    }

    /// Creates file on the given device of the server and registers it as a replica.
    ///
    /// Unless `force` is set, fails if the device does not have enough available space.
    pub fn create_file_on(
        &mut self,
        target: ReplicaTarget,
        path: &str,
        size: u64,
        force: bool,
    ) -> Result<ReplicaTarget, DfsError> {
        let path = normalize(path);
        self.check_owned_device(target.server, target.device)?;
        let label = self.topology.label(target.server);
        if self.topology.server(target.server)?.fs.exists(&path) {
            return Err(fs_error(FsError::Exists, &label, &path));
        }
        let device = self
            .pool
            .device_mut(target.device)
            .ok_or(DfsError::UnknownDevice(target.device))?;
        if force {
            device.force_allocate_space(size);
        } else {
            device.allocate_space(size)?;
        }
        let fs = &mut self.topology.server_mut(target.server)?.fs;
        let created = fs.create_file(&path, size).and_then(|_| fs.relocate(&path, target.device));
        if let Err(e) = created {
            self.free_space(target.device, size);
            return Err(fs_error(e, &label, &path));
        }
        self.replicas.add(&path, target);
        log_debug!(
            self.time,
            "engine",
            "created [{}] of size {} on {} device {}",
            path,
            size,
            label,
            target.device
        );
        Ok(target)
    }

    /// Removes file or directory from the server, releasing space and replica entries of removed files.
    pub fn remove_file(&mut self, server: NodeId, path: &str) -> Result<(), DfsError> {
        let label = self.topology.label(server);
        let removed = self
            .topology
            .server_mut(server)?
            .fs
            .remove(path)
            .map_err(|e| fs_error(e, &label, path))?;
        for (file, size, device) in removed {
            if let Some(device) = device {
                self.free_space(device, size);
                self.replicas.remove(&file, ReplicaTarget::new(server, device));
            }
        }
        Ok(())
    }

    pub(crate) fn free_space(&mut self, device: DeviceId, size: u64) {
        if let Some(d) = self.pool.device_mut(device) {
            if let Err(e) = d.mark_free(size) {
                log_error!(self.time, "engine", "space accounting mismatch: {}", e);
            }
        }
    }

    pub(crate) fn take_space(&mut self, device: DeviceId, size: u64) {
        if let Some(d) = self.pool.device_mut(device) {
            d.force_allocate_space(size);
        }
    }

    // Tasks -----------------------------------------------------------------------------------------------------------

    /// Appends task to the plan of the client.
    pub fn submit_task(&mut self, client: NodeId, mut spec: TaskSpec) -> Result<TaskId, DfsError> {
        spec.path = normalize(&spec.path);
        let node = self
            .topology
            .node_mut(client)
            .and_then(|n| n.as_client_mut())
            .ok_or_else(|| DfsError::UnknownNode(client.to_string()))?;
        let id = self.next_task_id;
        self.next_task_id += 1;
        node.plan.push(id);
        self.tasks.insert(id, Task::new(id, client, spec));
        Ok(id)
    }

    /// Returns task by id.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Iterates over tasks in submission order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Returns whether every task succeeded or failed.
    pub fn all_tasks_settled(&self) -> bool {
        self.tasks.values().all(|t| t.is_settled())
    }

    /// Returns the first unsettled task in the client plan if it is waiting to be started.
    pub fn next_task(&self, client: NodeId) -> Option<TaskId> {
        let plan = &self.topology.node(client)?.as_client()?.plan;
        let id = *plan.iter().find(|id| self.tasks.get(*id).map_or(false, |t| !t.is_settled()))?;
        match self.tasks[&id].state {
            TaskState::Waiting => Some(id),
            _ => None,
        }
    }

    /// Selects path from `origin` to the best server for the transfer.
    ///
    /// Downloads go to the holders of the object. Uploads of an existing object go to its holders, uploads of a new
    /// object go to any server which has a mount for its path. If `target` is given, only that server is considered.
    #[allow(clippy::too_many_arguments)]
    pub fn select_path(
        &self,
        origin: NodeId,
        kind: TaskKind,
        path: &str,
        size: u64,
        time: f64,
        target: Option<NodeId>,
        metric: MetricKind,
    ) -> Result<TransferPath, DfsError> {
        if self.topology.node(origin).is_none() {
            return Err(DfsError::UnknownNode(origin.to_string()));
        }
        let path = normalize(path);
        let holders = self.replicas.holders(&path);
        let candidates = match (kind, target) {
            (TaskKind::Download, _) if holders.is_empty() => return Err(DfsError::ObjectNotFound(path)),
            (TaskKind::Download, Some(target)) => {
                if !holders.contains(&target) {
                    return Err(DfsError::ObjectNotFound(path));
                }
                vec![target]
            }
            (TaskKind::Download, None) => holders,
            (TaskKind::Upload, Some(target)) => {
                let mounted = self.topology.server(target)?.fs.resolve_mount(&path).is_some();
                if !holders.contains(&target) && !mounted {
                    return Err(DfsError::NotMounted {
                        server: self.topology.label(target),
                        path,
                    });
                }
                vec![target]
            }
            (TaskKind::Upload, None) if !holders.is_empty() => holders,
            (TaskKind::Upload, None) => {
                let mounted: Vec<NodeId> = self
                    .topology
                    .servers()
                    .into_iter()
                    .filter(|&s| {
                        self.topology
                            .server(s)
                            .map_or(false, |n| n.fs.resolve_mount(&path).is_some())
                    })
                    .collect();
                if mounted.is_empty() {
                    return Err(DfsError::NotMounted {
                        server: "any server".to_string(),
                        path,
                    });
                }
                mounted
            }
        };

        let request = TransferRequest {
            kind,
            path: &path,
            size,
        };
        let (server, links) = match metric {
            MetricKind::HopCount => self.search(&HopCount, origin, &candidates, &request, time)?,
            MetricKind::WidestBandwidth => self.search(&WidestBandwidth, origin, &candidates, &request, time)?,
            MetricKind::BandwidthLatency => self.search(&BandwidthLatency, origin, &candidates, &request, time)?,
            MetricKind::Throughput => self.search(&Throughput, origin, &candidates, &request, time)?,
            MetricKind::Hierarchical => self.search(&Hierarchical, origin, &candidates, &request, time)?,
        };
        let device = self
            .search_context()
            .object_device(server, &request)
            .ok_or_else(|| DfsError::NotMounted {
                server: self.topology.label(server),
                path: path.clone(),
            })?;
        Ok(TransferPath::new(None, origin, server, device, links, time))
    }

    fn search<M: PathMetric>(
        &self,
        metric: &M,
        origin: NodeId,
        candidates: &[NodeId],
        request: &TransferRequest,
        time: f64,
    ) -> Result<(NodeId, Vec<ConnectionKey>), DfsError> {
        let result = PathSearcher::new(self.search_context(), metric).best_path(origin, candidates, request, time)?;
        Ok((result.target, result.links))
    }

    /// Starts the task at `time`: selects the path and submits the storage operation on the selected server.
    ///
    /// If the task cannot be started, it is marked as failed and the error is returned.
    pub fn start_task(&mut self, id: TaskId, time: f64) -> Result<(), DfsError> {
        let task = self
            .tasks
            .get(&id)
            .ok_or_else(|| DfsError::UnknownObject {
                server: "tasks".to_string(),
                path: id.to_string(),
            })?;
        let (client, spec) = (task.client, task.spec.clone());
        match self.submit_task_transfer(id, client, &spec, time) {
            Ok(()) => Ok(()),
            Err(e) => {
                log_warn!(
                    time,
                    "engine",
                    "task {} ({} [{}]) failed to start: {}",
                    id,
                    spec.kind,
                    spec.path,
                    e
                );
                let task = &mut self.tasks[&id];
                task.state = TaskState::Failed(e.clone());
                task.start_time = Some(time);
                task.finish_time = Some(time);
                Err(e)
            }
        }
    }

    fn submit_task_transfer(&mut self, id: TaskId, client: NodeId, spec: &TaskSpec, time: f64) -> Result<(), DfsError> {
        let mut route = self.select_path(
            client,
            spec.kind,
            &spec.path,
            spec.size,
            time,
            spec.target,
            spec.metric,
        )?;
        route.task = Some(id);
        let (limit, cell) = TransferLimit::shared(route.link_bandwidth(&self.topology, time));
        let size = match spec.kind {
            TaskKind::Download => {
                let request = TransferRequest {
                    kind: spec.kind,
                    path: &spec.path,
                    size: spec.size,
                };
                self.search_context().object_size(route.target, &request)
            }
            TaskKind::Upload => spec.size,
        };
        let operation = match spec.kind {
            TaskKind::Download => StorageOperation::read(vec![spec.path.clone()], size),
            TaskKind::Upload => {
                let existing = match self.file_device(route.target, &spec.path) {
                    Some(device) if device == route.device => self.file(route.target, &spec.path).map_or(0, |f| f.size),
                    _ => 0,
                };
                let device = self
                    .pool
                    .device(route.device)
                    .ok_or(DfsError::UnknownDevice(route.device))?;
                let needed = size.saturating_sub(existing);
                if device.available_space() < needed {
                    return Err(DfsError::NotEnoughSpaceLeft {
                        device: route.device,
                        requested: needed,
                        available: device.available_space(),
                    });
                }
                StorageOperation::write(vec![spec.path.clone()], size).reserving_space()
            }
        };
        let op = self.pool.submit(route.device, operation.with_limit(limit))?;
        route.bind(op);
        log_info!(
            time,
            "engine",
            "task {} started: {} [{}] of size {} via {} hops to {}",
            id,
            spec.kind,
            spec.path,
            size,
            route.hops(),
            self.topology.label(route.target)
        );
        let task = &mut self.tasks[&id];
        task.state = TaskState::Running;
        task.server = Some(route.target);
        task.size = size;
        task.start_time = Some(time);
        self.transfers.insert(
            op,
            Transfer::Task {
                task: id,
                route,
                limit: cell,
            },
        );
        Ok(())
    }

    // Time slices -----------------------------------------------------------------------------------------------------

    /// Updates path-bound transfer limits with link bandwidth averaged over `[time, time + duration]`.
    ///
    /// The storage side is not part of the limit, the device scheduler gives the operation its share.
    pub fn refresh_limits(&mut self, time: f64, duration: f64) {
        for transfer in self.transfers.values() {
            let (route, limit) = match transfer {
                Transfer::Task { route, limit, .. } => (route, limit),
                Transfer::Propagation { route, limit, .. } => (route, limit),
                Transfer::Migration { .. } => continue,
            };
            limit.set(route.average_link_bandwidth(&self.topology, time, duration));
        }
    }

    /// Throughput a transfer over the path can achieve at `time`, see [`TransferPath::possible_throughput`].
    pub fn possible_throughput(&self, path: &TransferPath, time: f64) -> f64 {
        path.possible_throughput(&self.topology, &self.pool, time)
    }

    /// Returns paths of running transfers.
    pub fn active_paths(&self) -> impl Iterator<Item = &TransferPath> {
        self.transfers.values().filter_map(|t| match t {
            Transfer::Task { route, .. } | Transfer::Propagation { route, .. } => Some(route),
            Transfer::Migration { .. } => None,
        })
    }

    /// Processes time slice `[time, time + elapsed]`.
    ///
    /// Throughput is reallocated on all devices, then transferred sizes are advanced and completions are handled.
    /// Operations submitted by completion handlers are buffered until the end of the slice. Returns storage events
    /// of the slice.
    pub fn tick(&mut self, time: f64, elapsed: f64) -> Vec<StorageEvent> {
        self.time = time;
        let mut events = self.pool.recompute_allocations(time);
        self.pool.begin_accounting();
        let finished = self.pool.advance(elapsed, time);
        for event in finished.iter() {
            self.handle_event(event);
        }
        self.pool.end_accounting();
        self.time = time + elapsed;
        events.extend(finished);
        events
    }

    /// Forces every operation to complete at `time` with whatever it transferred so far.
    pub fn finish_all(&mut self, time: f64) -> Vec<StorageEvent> {
        self.time = time;
        let devices: Vec<DeviceId> = self.pool.devices().map(|d| d.id()).collect();
        let mut events = Vec::new();
        for device in devices {
            if let Ok(finished) = self.pool.finish_all(device, time) {
                for event in finished.iter() {
                    self.handle_event(event);
                }
                events.extend(finished);
            }
        }
        events
    }

    fn handle_event(&mut self, event: &StorageEvent) {
        let StorageEvent::Finished(finished) = event else {
            return;
        };
        let Some(transfer) = self.transfers.remove(&finished.operation) else {
            return;
        };
        let result = match transfer {
            Transfer::Task { task, route, .. } => self.complete_task(task, &route, finished),
            Transfer::Migration { server, step } => self.complete_migration(server, &step, finished),
            Transfer::Propagation {
                path,
                source,
                target,
                size,
                ..
            } => self.complete_propagation(&path, source, target, size, finished),
        };
        if let Err(e) = result {
            log_error!(
                finished.time,
                "engine",
                "completion of operation {} failed: {}",
                finished.operation,
                e
            );
        }
    }

    fn drop_transfers<F: Fn(&Transfer, &DfsEngine) -> bool>(&mut self, predicate: F) {
        let dropped: Vec<OperationRef> = self
            .transfers
            .iter()
            .filter(|(_, t)| predicate(t, self))
            .map(|(op, _)| *op)
            .collect();
        for op in dropped {
            let Some(transfer) = self.transfers.remove(&op) else {
                continue;
            };
            if let Some(linked) = self.pool.operation(op).and_then(|o| o.linked()) {
                self.pool.remove(linked).ok();
            }
            self.pool.remove(op).ok();
            match transfer {
                Transfer::Task { task, route, .. } => {
                    let label = self.topology.label(route.target);
                    if let Some(task) = self.tasks.get_mut(&task) {
                        task.state = TaskState::Failed(DfsError::UnknownNode(label));
                        task.finish_time = Some(self.time);
                    }
                }
                Transfer::Migration { server, step } => {
                    if let Ok(node) = self.topology.server_mut(server) {
                        for file in step.files.iter() {
                            node.fs.set_migrating(file, false).ok();
                        }
                    }
                }
                Transfer::Propagation { .. } => {}
            }
        }
    }

    fn complete_task(
        &mut self,
        id: TaskId,
        route: &TransferPath,
        finished: &OperationFinished,
    ) -> Result<(), DfsError> {
        let latency = route.latency(&self.topology) / 1000.;
        let finish_time = finished.time + latency;
        let kind = {
            let task = &mut self.tasks[&id];
            task.finish_time = Some(finish_time);
            if finished.early {
                task.state = TaskState::Failed(DfsError::Interrupted {
                    transferred: finished.transferred,
                    total: finished.total_size,
                });
                log_warn!(
                    finish_time,
                    "engine",
                    "task {} interrupted after {:.0} of {} bytes",
                    id,
                    finished.transferred,
                    finished.total_size
                );
                return Ok(());
            }
            task.state = TaskState::Success;
            task.spec.kind
        };
        let task = &self.tasks[&id];
        log_info!(
            finish_time,
            "engine",
            "task {} completed: {} [{}] in {:.3} s",
            id,
            kind,
            task.spec.path,
            task.duration().unwrap_or(0.)
        );
        let path = task.spec.path.clone();
        let size = task.size;
        match kind {
            TaskKind::Upload => self.store_upload(route, &path, size, finished.time),
            TaskKind::Download => {
                if self.topology.server(route.target)?.hierarchical {
                    self.access_file(route.target, &path, finished.time)?;
                }
                Ok(())
            }
        }
    }

    fn store_upload(&mut self, route: &TransferPath, path: &str, size: u64, time: f64) -> Result<(), DfsError> {
        let target = ReplicaTarget::new(route.target, route.device);
        let label = self.topology.label(route.target);
        match self.file_device(route.target, path) {
            Some(device) => {
                let old = self
                    .topology
                    .server_mut(route.target)?
                    .fs
                    .set_size(path, size)
                    .map_err(|e| fs_error(e, &label, path))?;
                self.free_space(device, old);
                self.take_space(device, size);
            }
            None => {
                self.create_file_on(target, path, size, true)?;
            }
        }
        if self.replicas.is_replicated(path) {
            let source = self.replicas.target_on(path, route.target).unwrap_or(target);
            self.propagate_resize(path, source, time)?;
        }
        Ok(())
    }

    // Tiering ---------------------------------------------------------------------------------------------------------

    /// Registers an access to the file. On servers with tiering enabled, builds and executes a migration plan which
    /// moves the file to a faster device.
    pub fn access_file(&mut self, server: NodeId, path: &str, time: f64) -> Result<Option<MigrationPlan>, DfsError> {
        let path = normalize(path);
        let label = self.topology.label(server);
        let node = self.topology.server_mut(server)?;
        let count = node.fs.record_access(&path).map_err(|e| fs_error(e, &label, &path))?;
        if !node.hierarchical {
            return Ok(None);
        }
        let node = self.topology.server(server)?;
        let Some(plan) = plan_access(server, node, &self.pool, &path) else {
            log_debug!(time, "planner", "[{}] on {} stays in place after {} accesses", path, label, count);
            return Ok(None);
        };
        self.execute_plan(&plan, time)?;
        Ok(Some(plan))
    }

    /// Submits migration steps of the plan. Each step is a linked read and write pair which waits for the write of
    /// the previous step.
    pub fn execute_plan(&mut self, plan: &MigrationPlan, time: f64) -> Result<(), DfsError> {
        let mut previous: Option<OperationRef> = None;
        for step in plan.steps.iter() {
            let node = self.topology.server_mut(plan.server)?;
            for file in step.files.iter() {
                node.fs.set_migrating(file, true).ok();
            }
            let read = StorageOperation::read(step.files.clone(), step.size);
            let write = StorageOperation::write(step.files.clone(), step.size).reserving_space();
            let (_, write) = self.pool.submit_linked(step.source, read, step.target, write, previous)?;
            log_info!(
                time,
                "planner",
                "migration of {} files ({} bytes) from device {} to device {} scheduled",
                step.files.len(),
                step.size,
                step.source,
                step.target
            );
            self.transfers.insert(
                write,
                Transfer::Migration {
                    server: plan.server,
                    step: step.clone(),
                },
            );
            previous = Some(write);
        }
        Ok(())
    }

    fn complete_migration(
        &mut self,
        server: NodeId,
        step: &MigrationStep,
        finished: &OperationFinished,
    ) -> Result<(), DfsError> {
        let label = self.topology.label(server);
        for file in step.files.iter() {
            self.topology.server_mut(server)?.fs.set_migrating(file, false).ok();
        }
        if finished.early {
            log_warn!(
                finished.time,
                "planner",
                "migration from device {} to device {} interrupted",
                step.source,
                step.target
            );
            return Ok(());
        }

        // files removed or moved elsewhere while in flight are skipped
        let mut moved = Vec::new();
        let fs = &mut self.topology.server_mut(server)?.fs;
        for file in step.files.iter() {
            let Some(size) = fs.file(file).map(|f| f.size) else {
                continue;
            };
            let device = fs.resolve(file).and_then(|index| fs.device_of(index));
            if device == Some(step.source) && fs.relocate(file, step.target).is_ok() {
                moved.push((file.clone(), size));
            }
        }
        if moved.len() < step.files.len() {
            log_warn!(
                finished.time,
                "planner",
                "{} of {} files left device {} before migration finished",
                step.files.len() - moved.len(),
                step.files.len(),
                step.source
            );
        }
        for (file, size) in moved.iter() {
            self.free_space(step.source, *size);
            self.take_space(step.target, *size);
            self.replicas.relocate(file, server, step.target);
        }
        log_info!(
            finished.time,
            "planner",
            "migrated {} files ({} bytes) on {} from device {} to device {}",
            moved.len(),
            moved.iter().map(|(_, size)| size).sum::<u64>(),
            label,
            step.source,
            step.target
        );
        Ok(())
    }
}
