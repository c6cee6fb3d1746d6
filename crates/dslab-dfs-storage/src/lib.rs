#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod allocation;
pub mod device;
pub mod error;
pub mod events;
pub mod limit;
pub mod log;
pub mod operation;
pub mod pool;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use colored;
pub use device::{DeviceId, DeviceSpec, StorageDevice};
pub use error::StorageError;
pub use events::{OperationFinished, OperationStarted, StorageEvent};
pub use limit::TransferLimit;
pub use operation::{OperationId, OperationKind, OperationRef, OperationState, StorageOperation};
pub use pool::DevicePool;

/// Tolerance used when comparing transferred and total sizes.
pub const EPSILON: f64 = 1e-9;
