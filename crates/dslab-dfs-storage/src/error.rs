//! Errors reported by storage devices.

use std::fmt;

use crate::device::DeviceId;
use crate::operation::OperationRef;

/// An error type returned by device and pool methods.
#[derive(Clone, Debug, PartialEq)]
pub enum StorageError {
    /// Device with the given id is not registered in the pool.
    UnknownDevice(DeviceId),
    /// Operation does not exist, e.g. it was already completed.
    UnknownOperation(OperationRef),
    /// Device does not have enough unreserved free space.
    NotEnoughSpace {
        /// Device id.
        device: DeviceId,
        /// Requested amount of space.
        requested: u64,
        /// Amount of space which is available.
        available: u64,
    },
    /// Attempt to free more space than is used.
    InvalidFree {
        /// Device id.
        device: DeviceId,
        /// Requested amount of space.
        requested: u64,
        /// Amount of used space.
        used: u64,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::UnknownDevice(device) => write!(f, "unknown device {}", device),
            StorageError::UnknownOperation(op) => write!(f, "unknown operation {}", op),
            StorageError::NotEnoughSpace {
                device,
                requested,
                available,
            } => write!(
                f,
                "requested {} bytes on device {} but only {} is available",
                requested, device, available
            ),
            StorageError::InvalidFree { device, requested, used } => write!(
                f,
                "cannot free {} bytes on device {}, only {} is used",
                requested, device, used
            ),
        }
    }
}

impl std::error::Error for StorageError {}
