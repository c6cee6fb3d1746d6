//! Per-device operation scheduler.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::allocation::share_throughput;
use crate::operation::{OperationId, OperationRef, OperationState, StorageOperation};
use crate::EPSILON;

/// Keeps operations of a single device and moves them through their lifecycle.
///
/// Operations are stored in admission order. While a size accounting pass is in progress, newly admitted operations
/// are kept in a separate buffer and merged into the queue only when the pass is over, so the set of operations seen
/// by one time slice does not change between its allocation and accounting phases.
#[derive(Default)]
pub struct OperationScheduler {
    operations: IndexMap<OperationId, StorageOperation>,
    admission_buffer: Vec<StorageOperation>,
    accounting: bool,
    next_operation_id: OperationId,
}

impl OperationScheduler {
    /// Creates empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns id to the operation and adds it to the queue (or to the admission buffer during accounting).
    pub fn admit(&mut self, mut operation: StorageOperation) -> OperationId {
        let id = self.next_operation_id;
        self.next_operation_id += 1;
        operation.id = id;
        if self.accounting {
            self.admission_buffer.push(operation);
        } else {
            self.operations.insert(id, operation);
        }
        id
    }

    /// Starts size accounting pass.
    pub fn begin_accounting(&mut self) {
        self.accounting = true;
    }

    /// Finishes size accounting pass and merges buffered admissions into the queue.
    pub fn end_accounting(&mut self) {
        self.accounting = false;
        for operation in self.admission_buffer.drain(..) {
            self.operations.insert(operation.id, operation);
        }
    }

    /// Returns operation by id, including buffered ones.
    pub fn get(&self, id: OperationId) -> Option<&StorageOperation> {
        self.operations
            .get(&id)
            .or_else(|| self.admission_buffer.iter().find(|op| op.id == id))
    }

    pub(crate) fn get_mut(&mut self, id: OperationId) -> Option<&mut StorageOperation> {
        match self.operations.get_mut(&id) {
            Some(operation) => Some(operation),
            None => self.admission_buffer.iter_mut().find(|op| op.id == id),
        }
    }

    /// Iterates over queued operations in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &StorageOperation> {
        self.operations.values().chain(self.admission_buffer.iter())
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.len() + self.admission_buffer.len()
    }

    /// Returns whether there are no queued operations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of running operations.
    pub fn running_count(&self) -> usize {
        self.operations
            .values()
            .filter(|op| op.state == OperationState::Running)
            .count()
    }

    /// Moves pending operation to the prepared state. Returns `false` if the operation is not pending.
    pub fn unpend(&mut self, id: OperationId) -> bool {
        match self.get_mut(id) {
            Some(operation) if operation.state == OperationState::Pending => {
                operation.state = OperationState::Prepared;
                true
            }
            _ => false,
        }
    }

    /// Promotes prepared operations to running and returns ids of the promoted ones.
    pub fn update_queue(&mut self, time: f64) -> Vec<OperationId> {
        let mut started = Vec::new();
        for operation in self.operations.values_mut() {
            if operation.state == OperationState::Prepared {
                operation.state = OperationState::Running;
                operation.started_at = Some(time);
                started.push(operation.id);
            }
        }
        started
    }

    /// Distributes `max_speed` among running operations.
    ///
    /// The ceiling of an operation is its own transfer limit at `time`, further capped by the limit of its linked
    /// operation if the latter is present in `partner_limits`.
    pub fn allocate(&mut self, max_speed: f64, time: f64, partner_limits: &FxHashMap<OperationRef, f64>) {
        let mut running = Vec::new();
        let mut ceilings = Vec::new();
        for operation in self.operations.values_mut() {
            if operation.state != OperationState::Running {
                operation.throughput = 0.;
                continue;
            }
            let mut ceiling = operation.limit.at(time);
            if let Some(partner_limit) = operation.linked.and_then(|partner| partner_limits.get(&partner)) {
                ceiling = ceiling.min(*partner_limit);
            }
            running.push(operation.id);
            ceilings.push(ceiling);
        }
        let shares = share_throughput(max_speed, &ceilings);
        for (id, share) in running.into_iter().zip(shares) {
            self.operations[&id].throughput = share;
        }
    }

    /// Advances transferred size of running managed operations by `throughput × elapsed`.
    ///
    /// Operations which transfer their remaining size within the interval are removed from the queue and returned
    /// along with their exact completion time.
    pub fn account(&mut self, elapsed: f64, time: f64) -> Vec<(StorageOperation, f64)> {
        let mut finished = Vec::new();
        for operation in self.operations.values_mut() {
            if operation.state != OperationState::Running || !operation.managed {
                continue;
            }
            let remaining = operation.remaining();
            let delta = operation.throughput * elapsed;
            if remaining <= EPSILON {
                finished.push((operation.id, time));
            } else if operation.throughput > 0. && delta >= remaining {
                finished.push((operation.id, time + remaining / operation.throughput));
            } else {
                operation.transferred += delta;
            }
        }
        finished
            .into_iter()
            .filter_map(|(id, finish_time)| {
                let mut operation = self.operations.shift_remove(&id)?;
                operation.transferred = operation.total_size as f64;
                operation.state = OperationState::Completed;
                Some((operation, finish_time))
            })
            .collect()
    }

    /// Adds progress reported by the owner of a client-managed operation.
    ///
    /// Returns `false` if there is no such operation or it is managed by the scheduler.
    pub fn report_progress(&mut self, id: OperationId, size: f64) -> bool {
        match self.get_mut(id) {
            Some(operation) if !operation.managed => {
                operation.transferred = (operation.transferred + size).min(operation.total_size as f64);
                true
            }
            _ => false,
        }
    }

    /// Removes operation from the queue without completing it.
    pub fn remove(&mut self, id: OperationId) -> Option<StorageOperation> {
        if let Some(operation) = self.operations.shift_remove(&id) {
            return Some(operation);
        }
        let pos = self.admission_buffer.iter().position(|op| op.id == id)?;
        Some(self.admission_buffer.remove(pos))
    }

    /// Removes all operations, marking them as completed with whatever they transferred so far.
    pub fn drain_completed(&mut self) -> Vec<StorageOperation> {
        let mut drained: Vec<StorageOperation> = self.operations.drain(..).map(|(_, op)| op).collect();
        drained.append(&mut self.admission_buffer);
        for operation in drained.iter_mut() {
            operation.state = OperationState::Completed;
        }
        drained
    }
}
