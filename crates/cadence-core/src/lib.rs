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

//! # Cadence Core
//!
//! Foundational crate containing the synchronous event bus, the runtime value
//! types (frames, tasks, results, lifecycle states) and the capability
//! contracts that the scheduling core is built against.
//!
//! Nothing in here spawns threads or owns policy. Higher-level crates
//! (`cadence-workers`, `cadence-control`) implement the contracts.

#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod phase;
pub mod signal;
pub mod task;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ConfigError, ErrorKind, FatalRuntimeError, HandlerError, PhaseError, TransitionRejected,
};
pub use event::{topics, BusEvent, DeliveryReport, EventBus, RuntimeEvent, SubscriptionId, Topic};
pub use lifecycle::{AppState, LifecycleTrigger, TransitionContext};
pub use phase::{phase_fn, Frame, Phase, PhaseContext, PhaseId};
pub use signal::OverloadSignal;
pub use task::{
    DrainReport, Priority, QueueDepths, QueueProbe, ScheduledTask, SubmitError, TaskDrain, TaskId,
    TaskPayload, TaskStatus, TaskSubmitter, WorkerResult,
};
pub use telemetry::{PhaseSample, PhaseStats, Telemetry, TickReport};
