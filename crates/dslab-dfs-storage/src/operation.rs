//! Storage operations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceId;
use crate::limit::TransferLimit;

/// Operation id, unique within a device.
pub type OperationId = u64;

/// Handle of an operation on a specific device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationRef {
    /// Device which executes the operation.
    pub device: DeviceId,
    /// Operation id on that device.
    pub operation: OperationId,
}

impl OperationRef {
    /// Creates new handle.
    pub fn new(device: DeviceId, operation: OperationId) -> Self {
        Self { device, operation }
    }
}

impl fmt::Display for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.operation)
    }
}

/// Direction of the data movement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Data is read from the device.
    Read,
    /// Data is written to the device.
    Write,
}

/// Lifecycle of an operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    /// Waits for its predecessor and does not compete for throughput.
    Pending,
    /// Ready to be started on the next queue update.
    Prepared,
    /// Receives throughput from the device.
    Running,
    /// Transferred its whole size or was finished early.
    Completed,
}

/// Transfer of a list of files on a single device.
///
/// Operations are built with the constructor for their kind and the chained setters, then submitted to a device or
/// to the [`DevicePool`](crate::pool::DevicePool). Sizes are in bytes, throughput in bytes per second.
#[derive(Debug)]
pub struct StorageOperation {
    pub(crate) id: OperationId,
    pub(crate) kind: OperationKind,
    pub(crate) managed: bool,
    pub(crate) files: Vec<String>,
    pub(crate) total_size: u64,
    pub(crate) transferred: f64,
    pub(crate) limit: TransferLimit,
    pub(crate) linked: Option<OperationRef>,
    pub(crate) state: OperationState,
    pub(crate) reserve_space: bool,
    pub(crate) reserved: u64,
    pub(crate) dependents: Vec<OperationRef>,
    pub(crate) throughput: f64,
    pub(crate) started_at: Option<f64>,
}

impl StorageOperation {
    fn new(kind: OperationKind, files: Vec<String>, total_size: u64) -> Self {
        Self {
            id: 0,
            kind,
            managed: true,
            files,
            total_size,
            transferred: 0.,
            limit: TransferLimit::Unlimited,
            linked: None,
            state: OperationState::Prepared,
            reserve_space: false,
            reserved: 0,
            dependents: Vec::new(),
            throughput: 0.,
            started_at: None,
        }
    }

    /// Creates managed read of `total_size` bytes from the given files.
    pub fn read(files: Vec<String>, total_size: u64) -> Self {
        Self::new(OperationKind::Read, files, total_size)
    }

    /// Creates managed write of `total_size` bytes to the given files.
    pub fn write(files: Vec<String>, total_size: u64) -> Self {
        Self::new(OperationKind::Write, files, total_size)
    }

    /// Marks the operation as client-managed: the scheduler allocates throughput for it but never advances its
    /// transferred size, the owner reports progress and completes it explicitly.
    pub fn client_managed(mut self) -> Self {
        self.managed = false;
        self
    }

    /// Sets transfer limit.
    pub fn with_limit(mut self, limit: TransferLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Makes the device reserve `total_size` bytes for this write until it completes.
    pub fn reserving_space(mut self) -> Self {
        self.reserve_space = self.kind == OperationKind::Write;
        self
    }

    /// Marks the operation as pending, it will not be started until explicitly unpended.
    pub fn pending(mut self) -> Self {
        self.state = OperationState::Pending;
        self
    }

    /// Id of the operation on its device.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Returns whether transferred size is advanced by the scheduler.
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    /// Files transferred by the operation.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Total size of the operation.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Amount of data transferred so far.
    pub fn transferred(&self) -> f64 {
        self.transferred
    }

    /// Amount of data left to transfer.
    pub fn remaining(&self) -> f64 {
        (self.total_size as f64 - self.transferred).max(0.)
    }

    /// Transfer limit of the operation.
    pub fn limit(&self) -> &TransferLimit {
        &self.limit
    }

    /// Linked operation on another device, if any.
    pub fn linked(&self) -> Option<OperationRef> {
        self.linked
    }

    /// Current state.
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Amount of space reserved on the device for this operation.
    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    /// Operations which will be unpended when this one completes.
    pub fn dependents(&self) -> &[OperationRef] {
        &self.dependents
    }

    /// Throughput allocated on the last queue update.
    pub fn throughput(&self) -> f64 {
        self.throughput
    }

    /// Time when the operation was started.
    pub fn started_at(&self) -> Option<f64> {
        self.started_at
    }
}
