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


//! The worker capability and what it receives.

use cadence_core::TaskId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// What a worker is handed for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    /// Correlation id of the task.
    pub id: TaskId,
    /// Payload discriminator.
    pub kind: String,
    /// Opaque input bytes.
    pub payload: Vec<u8>,
    /// Milliseconds left until the deadline at the time of dispatch.
    pub deadline_ms: u64,
}

/// Failure reported by a worker for one task. Resolves the task as `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    /// The worker does not know how to handle this payload kind.
    #[error("unsupported task kind `{0}`")]
    UnsupportedKind(String),
    /// The work itself failed.
    #[error("task failed: {0}")]
    Failed(String),
}

/// Cooperative cancellation flag shared between the dispatcher and a worker.
///
/// Set when the task is cancelled, times out, or the pool shuts down.
/// Long-running workers should check it and return early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A background worker. Runs on a pool thread, never on the main context.
///
/// Must produce exactly one outcome per request. A panic kills the pool
/// thread; the dispatcher reaps it, marks its task as `Error` and respawns it.
pub trait Worker: Send + Sync {
    /// Executes one request.
    fn run(&self, request: &WorkRequest, cancel: &CancelToken) -> Result<Vec<u8>, WorkError>;
}

impl<F> Worker for F
where
    F: Fn(&WorkRequest, &CancelToken) -> Result<Vec<u8>, WorkError> + Send + Sync,
{
    fn run(&self, request: &WorkRequest, cancel: &CancelToken) -> Result<Vec<u8>, WorkError> {
        self(request, cancel)
    }
}
