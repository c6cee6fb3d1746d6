//! Storage device model.
//!
//! A device is characterized by its capacity and maximum speed. Its state includes the amount of used space, the
//! amount of space reserved by in-flight writes and the queue of operations managed by an
//! [`OperationScheduler`](crate::scheduler::OperationScheduler).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::events::{OperationFinished, OperationStarted, StorageEvent};
use crate::operation::{OperationId, OperationRef, StorageOperation};
use crate::scheduler::OperationScheduler;
use crate::{log_debug, log_trace};

/// Unique device id.
pub type DeviceId = usize;

/// Represents device specification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Human readable device name.
    pub name: String,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Maximum speed in bytes per second, shared by all running operations.
    pub max_speed: f64,
}

impl DeviceSpec {
    /// Creates new device spec.
    pub fn new(name: &str, capacity: u64, max_speed: f64) -> Self {
        Self {
            name: name.to_string(),
            capacity,
            max_speed,
        }
    }
}

/// Represents a storage device.
pub struct StorageDevice {
    id: DeviceId,
    spec: DeviceSpec,
    used: u64,
    reserved: u64,
    scheduler: OperationScheduler,
}

impl StorageDevice {
    /// Creates new device from given spec.
    pub fn new(id: DeviceId, spec: DeviceSpec) -> Self {
        Self {
            id,
            spec,
            used: 0,
            reserved: 0,
            scheduler: OperationScheduler::new(),
        }
    }

    /// Device id.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Device spec.
    pub fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Device capacity.
    pub fn capacity(&self) -> u64 {
        self.spec.capacity
    }

    /// Maximum device speed.
    pub fn max_speed(&self) -> f64 {
        self.spec.max_speed
    }

    /// Amount of space occupied by stored data.
    pub fn used_space(&self) -> u64 {
        self.used
    }

    /// Amount of space reserved by in-flight writes.
    pub fn reserved_space(&self) -> u64 {
        self.reserved
    }

    /// Amount of space not occupied by stored data.
    pub fn free_space(&self) -> u64 {
        self.spec.capacity.saturating_sub(self.used)
    }

    /// Amount of space which is neither used nor reserved.
    pub fn available_space(&self) -> u64 {
        self.spec.capacity.saturating_sub(self.used + self.reserved)
    }

    /// Marks `size` bytes as used if there is enough available space.
    pub fn allocate_space(&mut self, size: u64) -> Result<(), StorageError> {
        let available = self.available_space();
        if size > available {
            return Err(StorageError::NotEnoughSpace {
                device: self.id,
                requested: size,
                available,
            });
        }
        self.used += size;
        Ok(())
    }

    /// Marks `size` bytes as used without checking the available space.
    pub fn force_allocate_space(&mut self, size: u64) {
        self.used += size;
    }

    /// Marks previously used space of given `size` as free.
    pub fn mark_free(&mut self, size: u64) -> Result<(), StorageError> {
        if size > self.used {
            return Err(StorageError::InvalidFree {
                device: self.id,
                requested: size,
                used: self.used,
            });
        }
        self.used -= size;
        Ok(())
    }

    /// Adds operation to the device queue and returns its handle.
    ///
    /// Writes created with [`StorageOperation::reserving_space`] reserve their total size until completion.
    pub fn submit(&mut self, mut operation: StorageOperation) -> OperationRef {
        if operation.reserve_space {
            operation.reserved = operation.total_size;
            self.reserved += operation.total_size;
        }
        let id = self.scheduler.admit(operation);
        OperationRef::new(self.id, id)
    }

    /// Returns operation by id.
    pub fn operation(&self, id: OperationId) -> Option<&StorageOperation> {
        self.scheduler.get(id)
    }

    pub(crate) fn operation_mut(&mut self, id: OperationId) -> Option<&mut StorageOperation> {
        self.scheduler.get_mut(id)
    }

    /// Iterates over queued operations.
    pub fn operations(&self) -> impl Iterator<Item = &StorageOperation> {
        self.scheduler.iter()
    }

    /// Number of running operations.
    pub fn running_count(&self) -> usize {
        self.scheduler.running_count()
    }

    /// Returns whether the device has no queued operations.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_empty()
    }

    /// Moves pending operation to the prepared state.
    pub fn unpend(&mut self, id: OperationId) -> bool {
        self.scheduler.unpend(id)
    }

    /// Starts size accounting pass, see [`OperationScheduler`].
    pub fn begin_accounting(&mut self) {
        self.scheduler.begin_accounting();
    }

    /// Finishes size accounting pass, see [`OperationScheduler`].
    pub fn end_accounting(&mut self) {
        self.scheduler.end_accounting();
    }

    /// Starts prepared operations and distributes device speed among running ones.
    pub fn recompute_allocation(
        &mut self,
        time: f64,
        partner_limits: &FxHashMap<OperationRef, f64>,
    ) -> Vec<StorageEvent> {
        let started = self.scheduler.update_queue(time);
        self.scheduler.allocate(self.spec.max_speed, time, partner_limits);
        let mut events = Vec::with_capacity(started.len());
        for id in started {
            let Some(operation) = self.scheduler.get(id) else {
                continue;
            };
            log_debug!(
                time,
                "storage",
                "device {} started {:?} operation {} of size {}",
                self.spec.name,
                operation.kind,
                id,
                operation.total_size
            );
            events.push(StorageEvent::Started(OperationStarted {
                operation: OperationRef::new(self.id, id),
                kind: operation.kind,
                time,
            }));
        }
        for operation in self.scheduler.iter() {
            log_trace!(
                time,
                "storage",
                "device {} operation {} state {:?} throughput {:.3}",
                self.spec.name,
                operation.id,
                operation.state,
                operation.throughput
            );
        }
        events
    }

    /// Advances managed operations by `elapsed` seconds starting at `time` and completes finished ones.
    pub fn advance(&mut self, elapsed: f64, time: f64) -> Vec<StorageEvent> {
        self.scheduler
            .account(elapsed, time)
            .into_iter()
            .map(|(operation, finish_time)| self.finish(operation, finish_time, false))
            .collect()
    }

    /// Adds progress to a client-managed operation.
    pub fn report_progress(&mut self, id: OperationId, size: f64) -> Result<(), StorageError> {
        if self.scheduler.report_progress(id, size) {
            Ok(())
        } else {
            Err(StorageError::UnknownOperation(OperationRef::new(self.id, id)))
        }
    }

    /// Completes operation with whatever it transferred so far.
    pub fn complete(&mut self, id: OperationId, time: f64) -> Result<StorageEvent, StorageError> {
        let operation = self
            .scheduler
            .remove(id)
            .ok_or(StorageError::UnknownOperation(OperationRef::new(self.id, id)))?;
        let early = operation.remaining() > 0.;
        Ok(self.finish(operation, time, early))
    }

    /// Removes operation without emitting completion event. Reserved space is released.
    pub fn remove_operation(&mut self, id: OperationId) -> Result<StorageOperation, StorageError> {
        let mut operation = self
            .scheduler
            .remove(id)
            .ok_or(StorageError::UnknownOperation(OperationRef::new(self.id, id)))?;
        self.release_reservation(&mut operation);
        Ok(operation)
    }

    /// Forces all queued operations to complete at `time` with whatever they transferred so far.
    pub fn finish_all(&mut self, time: f64) -> Vec<StorageEvent> {
        self.scheduler
            .drain_completed()
            .into_iter()
            .map(|operation| {
                let early = operation.remaining() > 0.;
                self.finish(operation, time, early)
            })
            .collect()
    }

    fn release_reservation(&mut self, operation: &mut StorageOperation) {
        self.reserved = self.reserved.saturating_sub(operation.reserved);
        operation.reserved = 0;
    }

    fn finish(&mut self, mut operation: StorageOperation, time: f64, early: bool) -> StorageEvent {
        self.release_reservation(&mut operation);
        log_debug!(
            time,
            "storage",
            "device {} finished {:?} operation {}, transferred {:.0} of {}",
            self.spec.name,
            operation.kind,
            operation.id,
            operation.transferred,
            operation.total_size
        );
        StorageEvent::Finished(OperationFinished {
            operation: OperationRef::new(self.id, operation.id),
            kind: operation.kind,
            files: operation.files,
            total_size: operation.total_size,
            transferred: operation.transferred,
            time,
            early,
            dependents: operation.dependents,
        })
    }
}
