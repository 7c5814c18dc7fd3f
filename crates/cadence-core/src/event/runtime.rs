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

//! Event types exchanged by the scheduling core.

use super::bus::{BusEvent, Topic};
use crate::lifecycle::{AppState, LifecycleTrigger};
use crate::task::WorkerResult;
use crate::telemetry::TickReport;

/// Well-known topics of the runtime bus.
pub mod topics {
    use super::Topic;

    /// External lifecycle triggers (`BootComplete`, `ShutdownRequested`, ...).
    pub const LIFECYCLE: Topic = Topic::new("lifecycle");
    /// Published after every accepted lifecycle transition.
    pub const STATE_CHANGED: Topic = Topic::new("state:changed");
    /// One event per background task result, at the start of a tick.
    pub const AI_RESULT: Topic = Topic::new("ai:result");
    /// Published once at the end of every completed tick.
    pub const TICK_COMPLETED: Topic = Topic::new("tick:completed");
    /// Recoverable issues reported by phases.
    pub const DIAGNOSTIC: Topic = Topic::new("diagnostic");
}

/// An event on the runtime bus.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// An external lifecycle input.
    Lifecycle(LifecycleTrigger),
    /// The lifecycle moved from `from` to `to`.
    StateChanged {
        /// The previous state.
        from: AppState,
        /// The new state.
        to: AppState,
    },
    /// A background task was resolved.
    AiResult(WorkerResult),
    /// A tick finished all of its steps.
    TickCompleted(Box<TickReport>),
    /// A recoverable condition reported by a collaborator.
    Diagnostic {
        /// Who reported it.
        source: String,
        /// What happened.
        message: String,
    },
}

impl BusEvent for RuntimeEvent {
    fn topic(&self) -> Topic {
        match self {
            RuntimeEvent::Lifecycle(_) => topics::LIFECYCLE,
            RuntimeEvent::StateChanged { .. } => topics::STATE_CHANGED,
            RuntimeEvent::AiResult(_) => topics::AI_RESULT,
            RuntimeEvent::TickCompleted(_) => topics::TICK_COMPLETED,
            RuntimeEvent::Diagnostic { .. } => topics::DIAGNOSTIC,
        }
    }
}
