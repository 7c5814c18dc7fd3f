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

//! Frames, phase identifiers and the phase capability contract.

use crate::error::PhaseError;
use crate::event::{EventBus, RuntimeEvent};
use crate::task::TaskSubmitter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// A slice of the frame budget.
///
/// `Ui` and `Simulation` are executed as phases. `AiWindow` is the time
/// spent ingesting and housekeeping background work. `Buffer` is never
/// executed; it is slack that rebalancing borrows from first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PhaseId {
    /// Interactive UI update.
    Ui,
    /// Simulation update.
    Simulation,
    /// Background work scheduling window.
    AiWindow,
    /// Unassigned slack.
    Buffer,
}

impl PhaseId {
    /// All phases, in budget order.
    pub const ALL: [PhaseId; 4] = [
        PhaseId::Ui,
        PhaseId::Simulation,
        PhaseId::AiWindow,
        PhaseId::Buffer,
    ];

    /// Position of the phase in [`PhaseId::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name, used in logs and metric keys.
    pub const fn name(self) -> &'static str {
        match self {
            PhaseId::Ui => "ui",
            PhaseId::Simulation => "simulation",
            PhaseId::AiWindow => "ai",
            PhaseId::Buffer => "buffer",
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One open tick. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Frame {
    /// Monotonic frame counter, starting at 1.
    pub index: u64,
    /// When the tick started.
    #[serde(skip)]
    pub start_time: Instant,
    /// Total budget for this tick, in milliseconds.
    pub budget_ms: f64,
}

/// Everything a phase may touch during its update.
///
/// Passed by reference into each phase call. There is no ambient global
/// state; anything a phase needs is reachable from here.
pub struct PhaseContext<'a> {
    /// The open frame.
    pub frame: &'a Frame,
    /// Time since the previous tick, in milliseconds.
    pub delta_time_ms: f64,
    /// Milliseconds currently reserved for this phase.
    pub reserved_ms: f64,
    /// Bus for reporting recoverable issues.
    pub bus: &'a EventBus<RuntimeEvent>,
    /// Caller-driven background work submission.
    pub tasks: &'a dyn TaskSubmitter,
}

impl PhaseContext<'_> {
    /// Publishes a recoverable issue on the diagnostic topic.
    pub fn report(&self, source: impl Into<String>, message: impl Into<String>) {
        self.bus.emit(&RuntimeEvent::Diagnostic {
            source: source.into(),
            message: message.into(),
        });
    }
}

/// A unit of work executed once per tick.
///
/// Phases are cooperative: they are never preempted and must return within
/// their reservation. Overruns are measured and recorded, not interrupted.
/// Return an error only for conditions the tick cannot absorb; recoverable
/// issues go through [`PhaseContext::report`].
pub trait Phase {
    /// Advances the phase by one tick.
    fn update(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), PhaseError>;
}

impl<F> Phase for F
where
    F: FnMut(&mut PhaseContext<'_>) -> Result<(), PhaseError>,
{
    fn update(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), PhaseError> {
        self(ctx)
    }
}

/// Builds a phase from a closure, pinning down the closure's signature.
pub fn phase_fn<F>(f: F) -> F
where
    F: FnMut(&mut PhaseContext<'_>) -> Result<(), PhaseError>,
{
    f
}
