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


//! The public-facing SDK of the Cadence runtime.
//!
//! Build a [`Runtime`] from a [`RuntimeConfig`], hand it a worker and the two
//! executed phases, then drive it with [`Runtime::tick`] at the platform's
//! frame cadence.

pub mod config;
pub mod runtime;

pub use config::RuntimeConfig;
pub use runtime::{Runtime, RuntimeBuilder};

/// Everything an application usually needs.
pub mod prelude {
    pub use crate::{Runtime, RuntimeBuilder, RuntimeConfig};
    pub use cadence_control::{BudgetConfig, LifecycleConfig, TickOutcome};
    pub use cadence_core::{
        phase_fn, topics, AppState, Clock, LifecycleTrigger, ManualClock, Phase, PhaseContext,
        PhaseError, PhaseId, Priority, RuntimeEvent, SubmitError, TaskPayload, TaskStatus,
        TaskSubmitter, TickReport, WorkerResult,
    };
    pub use cadence_telemetry::TelemetryConfig;
    pub use cadence_workers::{CancelToken, DispatcherConfig, WorkError, WorkRequest, Worker};
}
