// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Background task types and the capabilities around task submission.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Correlation id linking a submission to its eventual [`WorkerResult`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Scheduling priority of a background task.
///
/// Ordered so that `Critical > Normal > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Priority {
    /// Shed first under backpressure; cancelled on shutdown.
    Low,
    /// Never rejected; cancelled on shutdown.
    Normal,
    /// Never rejected; given a grace period on shutdown.
    Critical,
}

/// Final status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// The worker produced a result.
    Completed,
    /// The deadline passed before a result was available.
    Timeout,
    /// The worker failed or died while holding the task.
    Error,
    /// The task was cancelled by a caller or by shutdown.
    Cancelled,
}

/// Opaque work description handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskPayload {
    /// Discriminates what the worker should do with `data`.
    pub kind: String,
    /// Opaque input bytes.
    pub data: Vec<u8>,
}

impl TaskPayload {
    /// Creates a payload of the given kind.
    pub fn new(kind: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }
}

/// A unit of background work owned by the dispatcher until it is resolved.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// Unique for the lifetime of the dispatcher.
    pub id: TaskId,
    /// Scheduling priority.
    pub priority: Priority,
    /// Wall-clock instant after which the task resolves as `Timeout`.
    pub deadline: Instant,
    /// What to do.
    pub payload: TaskPayload,
}

impl ScheduledTask {
    /// Returns `true` once `now` has reached the deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// The single result produced for every task id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResult {
    /// The task this result belongs to.
    pub id: TaskId,
    /// How the task ended.
    pub status: TaskStatus,
    /// Output bytes, present only for `Completed`.
    pub result: Option<Vec<u8>>,
}

impl WorkerResult {
    /// Creates a result.
    pub fn new(id: TaskId, status: TaskStatus, result: Option<Vec<u8>>) -> Self {
        Self { id, status, result }
    }

    /// A successful result carrying `output`.
    pub fn completed(id: TaskId, output: Vec<u8>) -> Self {
        Self::new(id, TaskStatus::Completed, Some(output))
    }

    /// A result without output for a non-successful status.
    pub fn unresolved(id: TaskId, status: TaskStatus) -> Self {
        Self::new(id, status, None)
    }
}

/// Snapshot of the dispatcher's queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    /// Tasks waiting for a worker.
    pub pending: usize,
    /// Tasks currently held by a worker.
    pub in_flight: usize,
    /// Results waiting for the next poll.
    pub ready: usize,
}

/// Synchronous rejection of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The runtime is overloaded and sheds `Low` priority work.
    #[error("rejected {priority:?} task: runtime is overloaded")]
    Backpressure {
        /// Priority of the rejected submission.
        priority: Priority,
    },
    /// The pending queue is at capacity.
    #[error("rejected task: pending queue is full ({capacity} tasks)")]
    QueueFull {
        /// The configured capacity.
        capacity: usize,
    },
    /// The dispatcher is draining or stopped.
    #[error("rejected task: dispatcher is shutting down")]
    ShuttingDown,
}

/// Capability to submit background work. Never blocks the caller.
pub trait TaskSubmitter {
    /// Enqueues a task and returns its correlation id.
    fn submit(
        &self,
        payload: TaskPayload,
        priority: Priority,
        deadline: Instant,
    ) -> Result<TaskId, SubmitError>;

    /// Cancels a pending or in-flight task. Returns `false` if already resolved.
    fn cancel(&self, id: TaskId) -> bool;
}

/// Capability to report queue depths for telemetry.
pub trait QueueProbe: Send + Sync {
    /// Returns the current depths.
    fn queue_depths(&self) -> QueueDepths;
}

/// Outcome of a shutdown drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// `Low`/`Normal` tasks cancelled immediately.
    pub cancelled: usize,
    /// `Critical` tasks that resolved within the grace period.
    pub settled: usize,
    /// `Critical` tasks force-cancelled after the grace period.
    pub forced: usize,
}

/// Capability to drain outstanding work when the application shuts down.
pub trait TaskDrain {
    /// Cancels non-critical work, waits up to `grace` for critical work, then
    /// force-cancels whatever remains. Blocks for at most `grace`.
    fn drain(&self, grace: Duration) -> DrainReport;
}
