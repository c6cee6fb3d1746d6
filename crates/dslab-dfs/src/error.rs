//! Error type of the engine.

use std::fmt;

use dslab_dfs_storage::{DeviceId, StorageError};

/// Errors surfaced by the engine.
///
/// Path selection errors (`NotMounted`, `NoPathAvailable`, `ObjectNotFound`) make the task which requested the path
/// fail without retries.
#[derive(Clone, Debug, PartialEq)]
pub enum DfsError {
    /// Target object is not backed by any storage device on the queried server.
    NotMounted {
        /// Server label.
        server: String,
        /// Object path.
        path: String,
    },
    /// No candidate server is reachable from the origin.
    NoPathAvailable {
        /// Origin node label.
        origin: String,
        /// Requested object path.
        path: String,
    },
    /// Requested path has no known replica.
    ObjectNotFound(String),
    /// Device does not have enough space which is neither used nor reserved.
    NotEnoughSpaceLeft {
        /// Device id.
        device: DeviceId,
        /// Requested amount of space.
        requested: u64,
        /// Amount of available space.
        available: u64,
    },
    /// Label is already used by another node.
    DuplicateLabel(String),
    /// There is no node with such label or id.
    UnknownNode(String),
    /// There is no such device on the server.
    UnknownDevice(DeviceId),
    /// There is no such file system object on the server.
    UnknownObject {
        /// Server label.
        server: String,
        /// Object path.
        path: String,
    },
    /// Entity already exists.
    AlreadyExists(String),
    /// Transfer was finished before moving its whole size.
    Interrupted {
        /// Amount of transferred data.
        transferred: f64,
        /// Size of the transfer.
        total: u64,
    },
    /// Numeric parameter is out of its allowed range.
    InvalidParameter(String),
    /// Element tree cannot be restored.
    InvalidElement(String),
    /// Scenario cannot be loaded.
    Config(String),
    /// Error reported by the storage model.
    Storage(StorageError),
}

impl fmt::Display for DfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfsError::NotMounted { server, path } => write!(f, "[{}] is not mounted on server {}", path, server),
            DfsError::NoPathAvailable { origin, path } => {
                write!(f, "no path available from {} to any holder of [{}]", origin, path)
            }
            DfsError::ObjectNotFound(path) => write!(f, "object [{}] not found", path),
            DfsError::NotEnoughSpaceLeft {
                device,
                requested,
                available,
            } => write!(
                f,
                "not enough space left on device {}: requested {}, available {}",
                device, requested, available
            ),
            DfsError::DuplicateLabel(label) => write!(f, "label {} is already in use", label),
            DfsError::UnknownNode(node) => write!(f, "unknown node {}", node),
            DfsError::UnknownDevice(device) => write!(f, "unknown device {}", device),
            DfsError::UnknownObject { server, path } => write!(f, "no object [{}] on server {}", path, server),
            DfsError::AlreadyExists(what) => write!(f, "{} already exists", what),
            DfsError::Interrupted { transferred, total } => {
                write!(f, "transfer interrupted after {:.0} of {} bytes", transferred, total)
            }
            DfsError::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
            DfsError::InvalidElement(msg) => write!(f, "invalid element: {}", msg),
            DfsError::Config(msg) => write!(f, "invalid config: {}", msg),
            DfsError::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for DfsError {}

impl From<StorageError> for DfsError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotEnoughSpace {
                device,
                requested,
                available,
            } => DfsError::NotEnoughSpaceLeft {
                device,
                requested,
                available,
            },
            StorageError::UnknownDevice(device) => DfsError::UnknownDevice(device),
            e => DfsError::Storage(e),
        }
    }
}
