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

//! Telemetry records published by the scheduler.

use crate::phase::{Frame, PhaseId};
use crate::task::QueueDepths;
use serde::Serialize;

/// Rolling statistics for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseStats {
    /// The phase.
    pub phase: PhaseId,
    /// Number of samples in the rolling window.
    pub samples: usize,
    /// Most recent sample, in milliseconds.
    pub last_ms: f64,
    /// Mean over the window.
    pub mean_ms: f64,
    /// 95th percentile over the window.
    pub p95_ms: f64,
    /// Maximum over the window.
    pub max_ms: f64,
}

/// Aggregated view produced by the performance monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    /// Per-phase statistics, in [`PhaseId::ALL`] order, for phases with samples.
    pub phases: Vec<PhaseStats>,
    /// Mean total tick time over the window.
    pub frame_mean_ms: f64,
    /// 95th percentile total tick time over the window.
    pub frame_p95_ms: f64,
    /// Dispatcher queue depths at snapshot time.
    pub queue_depths: QueueDepths,
}

impl Telemetry {
    /// Returns the statistics of `phase`, if it has samples.
    pub fn phase(&self, phase: PhaseId) -> Option<&PhaseStats> {
        self.phases.iter().find(|s| s.phase == phase)
    }
}

/// Measured usage of one phase during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseSample {
    /// The phase.
    pub phase: PhaseId,
    /// Measured wall time, in milliseconds.
    pub duration_ms: f64,
    /// Reservation at the time the phase ran.
    pub reserved_ms: f64,
    /// `true` if `duration_ms > reserved_ms`.
    pub overrun: bool,
}

/// Payload of `tick:completed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    /// The frame that just closed.
    pub frame: Frame,
    /// Time since the previous tick, in milliseconds.
    pub delta_time_ms: f64,
    /// Measured phases: UI, simulation, then the AI window.
    pub phases: Vec<PhaseSample>,
    /// Number of `ai:result` events published at the start of the tick.
    pub results_ingested: usize,
    /// Allocator overload state after rebalancing.
    pub overloaded: bool,
    /// Rolling statistics including this tick.
    pub telemetry: Telemetry,
}

impl TickReport {
    /// Returns the sample of `phase`, if it ran this tick.
    pub fn phase(&self, phase: PhaseId) -> Option<&PhaseSample> {
        self.phases.iter().find(|s| s.phase == phase)
    }

    /// Per-phase overrun flags, in report order.
    pub fn overrun_flags(&self) -> Vec<(PhaseId, bool)> {
        self.phases.iter().map(|s| (s.phase, s.overrun)).collect()
    }

    /// Sum of all measured phase durations.
    pub fn total_ms(&self) -> f64 {
        self.phases.iter().map(|s| s.duration_ms).sum()
    }

    /// Queue depths at the end of the tick.
    pub fn queue_depths(&self) -> QueueDepths {
        self.telemetry.queue_depths
    }
}
