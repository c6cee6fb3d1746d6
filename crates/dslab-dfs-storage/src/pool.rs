//! Set of storage devices with cross-device operation relations.
//!
//! Devices themselves know nothing about each other. The pool takes care of relations which span several devices:
//! linked operations (a read on one device feeding a write on another) and pending chains (an operation which waits
//! for the completion of an operation on another device).

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::device::{DeviceId, DeviceSpec, StorageDevice};
use crate::error::StorageError;
use crate::events::StorageEvent;
use crate::operation::{OperationRef, OperationState, StorageOperation};
use crate::{log_debug, log_trace};

/// Set of storage devices indexed by id.
#[derive(Default)]
pub struct DevicePool {
    devices: IndexMap<DeviceId, StorageDevice>,
    next_device_id: DeviceId,
}

impl DevicePool {
    /// Creates empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates new device and returns its id.
    pub fn add_device(&mut self, spec: DeviceSpec) -> DeviceId {
        let id = self.next_device_id;
        self.next_device_id += 1;
        self.devices.insert(id, StorageDevice::new(id, spec));
        id
    }

    /// Creates new device with the given id, used when restoring saved state.
    ///
    /// Returns `false` if the id is already taken.
    pub fn add_device_with_id(&mut self, id: DeviceId, spec: DeviceSpec) -> bool {
        if self.devices.contains_key(&id) {
            return false;
        }
        self.devices.insert(id, StorageDevice::new(id, spec));
        self.next_device_id = self.next_device_id.max(id + 1);
        true
    }

    /// Removes device with all its operations.
    pub fn remove_device(&mut self, id: DeviceId) -> Option<StorageDevice> {
        self.devices.shift_remove(&id)
    }

    /// Returns device by id.
    pub fn device(&self, id: DeviceId) -> Option<&StorageDevice> {
        self.devices.get(&id)
    }

    /// Returns mutable device by id.
    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut StorageDevice> {
        self.devices.get_mut(&id)
    }

    fn checked_device_mut(&mut self, id: DeviceId) -> Result<&mut StorageDevice, StorageError> {
        self.devices.get_mut(&id).ok_or(StorageError::UnknownDevice(id))
    }

    /// Iterates over devices in creation order.
    pub fn devices(&self) -> impl Iterator<Item = &StorageDevice> {
        self.devices.values()
    }

    /// Returns operation by handle.
    pub fn operation(&self, op: OperationRef) -> Option<&StorageOperation> {
        self.devices.get(&op.device).and_then(|d| d.operation(op.operation))
    }

    /// Returns whether no device has queued operations.
    pub fn is_idle(&self) -> bool {
        self.devices.values().all(|d| d.is_idle())
    }

    /// Submits operation to the device.
    pub fn submit(&mut self, device: DeviceId, operation: StorageOperation) -> Result<OperationRef, StorageError> {
        Ok(self.checked_device_mut(device)?.submit(operation))
    }

    /// Submits operation which stays pending until `predecessor` completes.
    ///
    /// If the predecessor does not exist anymore, the operation is submitted as prepared.
    pub fn submit_after(
        &mut self,
        predecessor: OperationRef,
        device: DeviceId,
        operation: StorageOperation,
    ) -> Result<OperationRef, StorageError> {
        if self.operation(predecessor).is_none() {
            return self.submit(device, operation);
        }
        let op = self.submit(device, operation.pending())?;
        self.add_dependent(predecessor, op)?;
        Ok(op)
    }

    /// Submits a linked pair of operations: `read` on `source` and `write` on `target`.
    ///
    /// Both sides are bound to each other, so each one is limited by the other and they progress at the same pace.
    /// If `predecessor` is given, both sides stay pending until it completes.
    pub fn submit_linked(
        &mut self,
        source: DeviceId,
        read: StorageOperation,
        target: DeviceId,
        write: StorageOperation,
        predecessor: Option<OperationRef>,
    ) -> Result<(OperationRef, OperationRef), StorageError> {
        if !self.devices.contains_key(&target) {
            return Err(StorageError::UnknownDevice(target));
        }
        let (read_op, write_op) = match predecessor {
            Some(predecessor) => (
                self.submit_after(predecessor, source, read)?,
                self.submit_after(predecessor, target, write)?,
            ),
            None => (self.submit(source, read)?, self.submit(target, write)?),
        };
        self.checked_device_mut(source)?
            .operation_mut(read_op.operation)
            .ok_or(StorageError::UnknownOperation(read_op))?
            .linked = Some(write_op);
        self.checked_device_mut(target)?
            .operation_mut(write_op.operation)
            .ok_or(StorageError::UnknownOperation(write_op))?
            .linked = Some(read_op);
        Ok((read_op, write_op))
    }

    /// Registers `dependent` to be unpended when `predecessor` completes.
    pub fn add_dependent(&mut self, predecessor: OperationRef, dependent: OperationRef) -> Result<(), StorageError> {
        self.checked_device_mut(predecessor.device)?
            .operation_mut(predecessor.operation)
            .ok_or(StorageError::UnknownOperation(predecessor))?
            .dependents
            .push(dependent);
        Ok(())
    }

    /// Moves pending operation to the prepared state.
    pub fn unpend(&mut self, op: OperationRef) -> bool {
        self.devices
            .get_mut(&op.device)
            .map(|d| d.unpend(op.operation))
            .unwrap_or(false)
    }

    /// Starts size accounting pass on all devices.
    pub fn begin_accounting(&mut self) {
        for device in self.devices.values_mut() {
            device.begin_accounting();
        }
    }

    /// Finishes size accounting pass on all devices, merging buffered admissions.
    pub fn end_accounting(&mut self) {
        for device in self.devices.values_mut() {
            device.end_accounting();
        }
    }

    /// Recomputes throughput allocation on all devices at `time`.
    ///
    /// After every device has distributed its speed, both sides of each running linked pair are clamped to the
    /// smaller of their allocations.
    pub fn recompute_allocations(&mut self, time: f64) -> Vec<StorageEvent> {
        let mut limits = FxHashMap::default();
        for device in self.devices.values() {
            for operation in device.operations() {
                limits.insert(OperationRef::new(device.id(), operation.id()), operation.limit().at(time));
            }
        }
        let mut events = Vec::new();
        for device in self.devices.values_mut() {
            events.extend(device.recompute_allocation(time, &limits));
        }
        self.clamp_linked_pairs(time);
        events
    }

    fn clamp_linked_pairs(&mut self, time: f64) {
        let mut clamps = Vec::new();
        for device in self.devices.values() {
            for operation in device.operations() {
                if operation.state() != OperationState::Running {
                    continue;
                }
                let this = OperationRef::new(device.id(), operation.id());
                let Some(partner) = operation.linked() else {
                    continue;
                };
                // every pair is visited twice, handle it from the smaller side only
                if partner < this {
                    continue;
                }
                if let Some(other) = self.operation(partner) {
                    if other.state() == OperationState::Running {
                        clamps.push((this, partner, operation.throughput().min(other.throughput())));
                    }
                }
            }
        }
        for (a, b, throughput) in clamps {
            log_trace!(time, "pool", "linked pair {} <-> {} runs at {:.3}", a, b, throughput);
            for op in [a, b] {
                if let Some(operation) = self.devices.get_mut(&op.device).and_then(|d| d.operation_mut(op.operation)) {
                    operation.throughput = throughput;
                }
            }
        }
    }

    /// Advances managed operations on all devices by `elapsed` seconds starting at `time`.
    ///
    /// Dependents of finished operations are unpended and will be started on the next allocation.
    pub fn advance(&mut self, elapsed: f64, time: f64) -> Vec<StorageEvent> {
        let mut events = Vec::new();
        for device in self.devices.values_mut() {
            events.extend(device.advance(elapsed, time));
        }
        self.unpend_dependents(&events);
        events
    }

    /// Adds progress to a client-managed operation.
    pub fn report_progress(&mut self, op: OperationRef, size: f64) -> Result<(), StorageError> {
        self.checked_device_mut(op.device)?.report_progress(op.operation, size)
    }

    /// Completes operation with whatever it transferred so far.
    pub fn complete(&mut self, op: OperationRef, time: f64) -> Result<StorageEvent, StorageError> {
        let event = self.checked_device_mut(op.device)?.complete(op.operation, time)?;
        self.unpend_dependents(std::slice::from_ref(&event));
        Ok(event)
    }

    /// Removes operation without emitting completion event, its dependents are unpended.
    pub fn remove(&mut self, op: OperationRef) -> Result<StorageOperation, StorageError> {
        let operation = self.checked_device_mut(op.device)?.remove_operation(op.operation)?;
        for dependent in operation.dependents() {
            self.unpend(*dependent);
        }
        Ok(operation)
    }

    /// Forces every operation on the device to complete with whatever it transferred so far.
    pub fn finish_all(&mut self, device: DeviceId, time: f64) -> Result<Vec<StorageEvent>, StorageError> {
        let events = self.checked_device_mut(device)?.finish_all(time);
        log_debug!(time, "pool", "finished {} operations early on device {}", events.len(), device);
        self.unpend_dependents(&events);
        Ok(events)
    }

    fn unpend_dependents(&mut self, events: &[StorageEvent]) {
        for event in events {
            if let StorageEvent::Finished(finished) = event {
                for dependent in finished.dependents.iter() {
                    if self.unpend(*dependent) {
                        log_trace!(finished.time, "pool", "operation {} unpended by {}", dependent, finished.operation);
                    }
                }
            }
        }
    }
}
