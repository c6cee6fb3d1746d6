//! Events produced by storage devices.

use serde::Serialize;

use crate::operation::{OperationKind, OperationRef};

/// Corresponds to an operation which was promoted to running on a queue update.
#[derive(Clone, Debug, Serialize)]
pub struct OperationStarted {
    /// Started operation.
    pub operation: OperationRef,
    /// Operation kind.
    pub kind: OperationKind,
    /// Time of the queue update.
    pub time: f64,
}

/// Corresponds to an operation which was completed and removed from its device.
#[derive(Clone, Debug, Serialize)]
pub struct OperationFinished {
    /// Finished operation.
    pub operation: OperationRef,
    /// Operation kind.
    pub kind: OperationKind,
    /// Files transferred by the operation.
    pub files: Vec<String>,
    /// Total size of the operation.
    pub total_size: u64,
    /// Amount of data actually transferred. Is less than `total_size` only for operations finished early.
    pub transferred: f64,
    /// Exact completion time.
    pub time: f64,
    /// Whether the operation was forced to finish before transferring its whole size.
    pub early: bool,
    /// Operations which were waiting for this one to complete.
    pub dependents: Vec<OperationRef>,
}

/// Event emitted by a device or the device pool.
#[derive(Clone, Debug, Serialize)]
pub enum StorageEvent {
    /// See [`OperationStarted`].
    Started(OperationStarted),
    /// See [`OperationFinished`].
    Finished(OperationFinished),
}

impl StorageEvent {
    /// Returns the operation the event refers to.
    pub fn operation(&self) -> OperationRef {
        match self {
            StorageEvent::Started(e) => e.operation,
            StorageEvent::Finished(e) => e.operation,
        }
    }

    /// Returns the time of the event.
    pub fn time(&self) -> f64 {
        match self {
            StorageEvent::Started(e) => e.time,
            StorageEvent::Finished(e) => e.time,
        }
    }
}
