//! Replication manager.
//!
//! Keeps replicas of a logical path structurally consistent: all replicas have the same name and, outside of
//! in-flight propagation, the same size.

use dslab_dfs_storage::{log_info, log_warn, OperationFinished, OperationRef, StorageOperation, TransferLimit};

use crate::engine::{fs_error, DfsEngine, Transfer};
use crate::error::DfsError;
use crate::fs::normalize;
use crate::metrics::{Throughput, TransferRequest};
use crate::path::TransferPath;
use crate::replicas::ReplicaTarget;
use crate::search::PathSearcher;
use crate::task::TaskKind;

impl DfsEngine {
    /// Returns replica targets of the path.
    pub fn replica_targets(&self, path: &str) -> &[ReplicaTarget] {
        self.replicas.targets(&normalize(path))
    }

    /// Returns whether the path has more than one replica.
    pub fn is_replicated(&self, path: &str) -> bool {
        self.replicas.is_replicated(&normalize(path))
    }

    fn replica_size(&self, path: &str) -> Result<u64, DfsError> {
        self.replicas
            .targets(path)
            .iter()
            .find_map(|t| self.file(t.server, path).map(|f| f.size))
            .ok_or_else(|| DfsError::ObjectNotFound(path.to_string()))
    }

    fn check_space(&self, target: ReplicaTarget, size: u64) -> Result<(), DfsError> {
        let device = self
            .pool
            .device(target.device)
            .ok_or(DfsError::UnknownDevice(target.device))?;
        if device.available_space() < size {
            return Err(DfsError::NotEnoughSpaceLeft {
                device: target.device,
                requested: size,
                available: device.available_space(),
            });
        }
        Ok(())
    }

    fn delete_replica(&mut self, path: &str, target: ReplicaTarget) -> Result<(), DfsError> {
        let label = self.topology.label(target.server);
        let removed = self
            .topology
            .server_mut(target.server)?
            .fs
            .remove(path)
            .map_err(|e| fs_error(e, &label, path))?;
        for (_, size, device) in removed {
            if let Some(device) = device {
                self.free_space(device, size);
            }
        }
        self.replicas.remove(path, target);
        Ok(())
    }

    /// Replaces the replica set of the path.
    ///
    /// Targets present in both sets are left untouched. Removed targets are deleted first, then added ones are
    /// created with the current replica size. Unless `force` is set, the whole replacement fails without changes if
    /// any added target does not have enough space.
    pub fn replace_replica_targets(
        &mut self,
        path: &str,
        targets: &[ReplicaTarget],
        force: bool,
    ) -> Result<(), DfsError> {
        let path = normalize(path);
        let size = self.replica_size(&path)?;
        let current = self.replicas.targets(&path).to_vec();
        let removed: Vec<ReplicaTarget> = current.iter().filter(|t| !targets.contains(t)).copied().collect();
        let mut added: Vec<ReplicaTarget> = Vec::new();
        for target in targets {
            if !current.contains(target) && !added.contains(target) {
                added.push(*target);
            }
        }

        for target in added.iter() {
            let kept_on_server = targets
                .iter()
                .filter(|t| t.server == target.server)
                .count()
                > 1;
            if kept_on_server {
                return Err(DfsError::AlreadyExists(format!(
                    "replica of [{}] on server {}",
                    path,
                    self.topology.label(target.server)
                )));
            }
            let node = self.topology.server(target.server)?;
            if !node.devices.contains(&target.device) {
                return Err(DfsError::UnknownDevice(target.device));
            }
            if !force {
                self.check_space(*target, size)?;
            }
        }

        for target in removed.iter() {
            self.delete_replica(&path, *target)?;
        }
        for target in added.iter() {
            self.create_file_on(*target, &path, size, force)?;
        }
        log_info!(
            self.time(),
            "replication",
            "replicas of [{}] replaced: {} removed, {} added, {} kept",
            path,
            removed.len(),
            added.len(),
            current.len() - removed.len()
        );
        Ok(())
    }

    /// Deletes every replica of the path. Returns the number of deleted replicas.
    pub fn delete_all_replicas(&mut self, path: &str) -> Result<usize, DfsError> {
        let path = normalize(path);
        let targets = self.replicas.targets(&path).to_vec();
        if targets.is_empty() {
            return Err(DfsError::ObjectNotFound(path));
        }
        for target in targets.iter() {
            self.delete_replica(&path, *target)?;
        }
        log_info!(self.time(), "replication", "deleted {} replicas of [{}]", targets.len(), path);
        Ok(targets.len())
    }

    /// Renames every replica of the path.
    pub fn rename_all_replicas(&mut self, from: &str, to: &str) -> Result<(), DfsError> {
        let (from, to) = (normalize(from), normalize(to));
        let targets = self.replicas.targets(&from).to_vec();
        if targets.is_empty() {
            return Err(DfsError::ObjectNotFound(from));
        }
        for target in targets.iter() {
            if self.topology.server(target.server)?.fs.exists(&to) {
                return Err(fs_error(
                    crate::fs::FsError::Exists,
                    &self.topology.label(target.server),
                    &to,
                ));
            }
        }
        for target in targets.iter() {
            let label = self.topology.label(target.server);
            self.topology
                .server_mut(target.server)?
                .fs
                .rename(&from, &to)
                .map_err(|e| fs_error(e, &label, &from))?;
        }
        self.replicas.rename(&from, &to);
        log_info!(self.time(), "replication", "renamed [{}] to [{}] on {} servers", from, to, targets.len());
        Ok(())
    }

    /// Sets the size of every replica of the path.
    ///
    /// Unless `force` is set, every replica device is checked for space first and nothing is changed on failure.
    pub fn resize_all_replicas(&mut self, path: &str, size: u64, force: bool) -> Result<(), DfsError> {
        let path = normalize(path);
        let targets = self.replicas.targets(&path).to_vec();
        if targets.is_empty() {
            return Err(DfsError::ObjectNotFound(path));
        }
        if !force {
            for target in targets.iter() {
                let old = self.file(target.server, &path).map_or(0, |f| f.size);
                if size > old {
                    self.check_space(*target, size - old)?;
                }
            }
        }
        for target in targets.iter() {
            self.resize_replica(&path, *target, size)?;
        }
        Ok(())
    }

    fn resize_replica(&mut self, path: &str, target: ReplicaTarget, size: u64) -> Result<(), DfsError> {
        let label = self.topology.label(target.server);
        let old = self
            .topology
            .server_mut(target.server)?
            .fs
            .set_size(path, size)
            .map_err(|e| fs_error(e, &label, path))?;
        self.free_space(target.device, old);
        self.take_space(target.device, size);
        Ok(())
    }

    /// Propagates the size of the `source` replica to all other replicas of the path.
    ///
    /// For every other replica a linked read (on the source device) and write (on the replica device) pair is
    /// submitted, limited by the bandwidth of the path between the servers. The replica size is updated when its
    /// write completes. Replicas which are unreachable from the source are skipped.
    pub fn propagate_resize(
        &mut self,
        path: &str,
        source: ReplicaTarget,
        time: f64,
    ) -> Result<Vec<OperationRef>, DfsError> {
        let path = normalize(path);
        let size = self
            .file(source.server, &path)
            .map(|f| f.size)
            .ok_or_else(|| DfsError::ObjectNotFound(path.clone()))?;
        let targets: Vec<ReplicaTarget> = self
            .replicas
            .targets(&path)
            .iter()
            .filter(|t| t.server != source.server)
            .copied()
            .collect();

        let mut writes = Vec::new();
        for target in targets {
            let request = TransferRequest {
                kind: TaskKind::Upload,
                path: &path,
                size,
            };
            let metric = Throughput;
            let found = PathSearcher::new(self.search_context(), &metric).shortest_path(
                source.server,
                target.server,
                &request,
                time,
            );
            let Some(found) = found else {
                log_warn!(
                    time,
                    "replication",
                    "replica of [{}] on {} is unreachable from {}",
                    path,
                    self.topology.label(target.server),
                    self.topology.label(source.server)
                );
                continue;
            };
            let mut route = TransferPath::new(None, source.server, target.server, target.device, found.links, time);
            let (limit, cell) = TransferLimit::shared(route.link_bandwidth(&self.topology, time));
            let read = StorageOperation::read(vec![path.clone()], size).with_limit(limit);
            let write = StorageOperation::write(vec![path.clone()], size).reserving_space();
            let (_, write) = self.pool.submit_linked(source.device, read, target.device, write, None)?;
            route.bind(write);
            log_info!(
                time,
                "replication",
                "propagating [{}] of size {} from {} to {}",
                path,
                size,
                self.topology.label(source.server),
                self.topology.label(target.server)
            );
            self.transfers.insert(
                write,
                Transfer::Propagation {
                    path: path.clone(),
                    source,
                    target,
                    size,
                    route,
                    limit: cell,
                },
            );
            writes.push(write);
        }
        Ok(writes)
    }

    pub(crate) fn complete_propagation(
        &mut self,
        path: &str,
        source: ReplicaTarget,
        target: ReplicaTarget,
        size: u64,
        finished: &OperationFinished,
    ) -> Result<(), DfsError> {
        if finished.early {
            log_warn!(
                finished.time,
                "replication",
                "propagation of [{}] from {} to {} interrupted",
                path,
                source,
                target
            );
            return Ok(());
        }
        // the replica might have been deleted or moved while the update was in flight
        let Some(current) = self.replicas.target_on(path, target.server) else {
            return Ok(());
        };
        self.resize_replica(path, current, size)?;
        log_info!(
            finished.time,
            "replication",
            "replica of [{}] on {} updated to size {}",
            path,
            self.topology.label(target.server),
            size
        );
        Ok(())
    }
}
