//! Client tasks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DfsError;
use crate::metrics::MetricKind;
use crate::topology::NodeId;

/// Unique task id.
pub type TaskId = usize;

/// Direction of a task transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Client sends data to a server.
    Upload,
    /// Client receives data from a server.
    Download,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Upload => f.pad("upload"),
            TaskKind::Download => f.pad("download"),
        }
    }
}

/// Task description submitted by a client.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskSpec {
    /// Transfer direction.
    pub kind: TaskKind,
    /// Logical path of the file.
    pub path: String,
    /// Size of uploaded data. Downloads transfer the whole file and ignore it.
    pub size: u64,
    /// Server which must be used instead of the best one.
    pub target: Option<NodeId>,
    /// Metric used to select the path.
    pub metric: MetricKind,
    /// Earliest start time.
    pub not_before: f64,
}

impl TaskSpec {
    /// Creates download of the file.
    pub fn download(path: &str, metric: MetricKind) -> Self {
        Self {
            kind: TaskKind::Download,
            path: path.to_string(),
            size: 0,
            target: None,
            metric,
            not_before: 0.,
        }
    }

    /// Creates upload of `size` bytes to the file.
    pub fn upload(path: &str, size: u64, metric: MetricKind) -> Self {
        Self {
            kind: TaskKind::Upload,
            path: path.to_string(),
            size,
            target: None,
            metric,
            not_before: 0.,
        }
    }

    /// Forces the task to use the given server.
    pub fn with_target(mut self, target: NodeId) -> Self {
        self.target = Some(target);
        self
    }

    /// Delays the task start.
    pub fn not_before(mut self, time: f64) -> Self {
        self.not_before = time;
        self
    }
}

/// Task lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskState {
    /// Not started yet.
    Waiting,
    /// Transfer is in progress.
    Running,
    /// Transfer completed.
    Success,
    /// Task failed, it is not retried.
    Failed(DfsError),
}

/// Task of a client along with its execution results.
#[derive(Clone, Debug)]
pub struct Task {
    /// Task id.
    pub id: TaskId,
    /// Client which runs the task.
    pub client: NodeId,
    /// Task description.
    pub spec: TaskSpec,
    /// Current state.
    pub state: TaskState,
    /// Server selected for the transfer.
    pub server: Option<NodeId>,
    /// Size of the transfer, known once the task is started.
    pub size: u64,
    /// Start time.
    pub start_time: Option<f64>,
    /// Finish time including path latency.
    pub finish_time: Option<f64>,
}

impl Task {
    /// Creates waiting task.
    pub fn new(id: TaskId, client: NodeId, spec: TaskSpec) -> Self {
        let size = spec.size;
        Self {
            id,
            client,
            spec,
            state: TaskState::Waiting,
            server: None,
            size,
            start_time: None,
            finish_time: None,
        }
    }

    /// Returns whether the task succeeded or failed.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, TaskState::Success | TaskState::Failed(_))
    }

    /// Duration of the task.
    pub fn duration(&self) -> Option<f64> {
        match (self.start_time, self.finish_time) {
            (Some(start), Some(finish)) => Some(finish - start),
            _ => None,
        }
    }

    /// Average throughput of a successful task.
    pub fn throughput(&self) -> Option<f64> {
        match (&self.state, self.duration()) {
            (TaskState::Success, Some(duration)) if duration > 0. => Some(self.size as f64 / duration),
            _ => None,
        }
    }
}
