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

//! Rolling-window sampling of phase durations.

use cadence_core::{PhaseId, PhaseStats, QueueDepths, QueueProbe, Telemetry};
use std::fmt;
use std::sync::Arc;

/// Number of samples kept per series (2 s at 60 Hz).
pub const SAMPLE_WINDOW: usize = 120;

/// A fixed-size circular buffer for storing numerical samples.
#[derive(Debug, Clone)]
pub struct RingBuffer<T, const N: usize> {
    data: [T; N],
    index: usize,
    count: usize,
}

impl<T: Default + Copy, const N: usize> RingBuffer<T, N> {
    /// Creates a new, empty ring buffer.
    pub fn new() -> Self {
        Self {
            data: [T::default(); N],
            index: 0,
            count: 0,
        }
    }

    /// Pushes a new value into the buffer, overwriting the oldest if full.
    pub fn push(&mut self, value: T) {
        self.data[self.index] = value;
        self.index = (self.index + 1) % N;
        if self.count < N {
            self.count += 1;
        }
    }

    /// Returns the number of elements currently in the buffer.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the most recently pushed value.
    pub fn last(&self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        Some(self.data[(self.index + N - 1) % N])
    }

    /// Returns an iterator over the values in chronological order (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (left, right) = self.data.split_at(self.index);
        // Until the buffer wraps, only the first `index` slots hold samples.
        let older = if self.count < N { &right[..0] } else { right };
        older.iter().chain(left.iter())
    }
}

impl<T: Default + Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<f64, N> {
    /// Calculates the arithmetic mean of the values in the buffer.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.iter().sum::<f64>() / self.count as f64
    }

    /// Calculates the variance (spread) of the values in the buffer.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let avg = self.average();
        let sum_sq: f64 = self.iter().map(|v| (v - avg) * (v - avg)).sum();
        sum_sq / self.count as f64
    }

    /// Returns the maximum value in the buffer, or 0.0 if empty.
    pub fn max(&self) -> f64 {
        self.iter().copied().reduce(f64::max).unwrap_or(0.0)
    }

    /// Returns the minimum value in the buffer, or 0.0 if empty.
    pub fn min(&self) -> f64 {
        self.iter().copied().reduce(f64::min).unwrap_or(0.0)
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`. Returns 0.0 if empty.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * self.count as f64).ceil() as usize;
        sorted[rank.clamp(1, self.count) - 1]
    }
}

/// Rolling sampler of phase durations and total tick time.
///
/// Purely additive: it never touches another component's state. Queue
/// depths are pulled from the attached [`QueueProbe`] at snapshot time.
pub struct PerformanceMonitor {
    phases: [RingBuffer<f64, SAMPLE_WINDOW>; PhaseId::ALL.len()],
    frames: RingBuffer<f64, SAMPLE_WINDOW>,
    probe: Option<Arc<dyn QueueProbe>>,
}

impl PerformanceMonitor {
    /// Creates a monitor without a queue probe.
    pub fn new() -> Self {
        Self {
            phases: Default::default(),
            frames: RingBuffer::new(),
            probe: None,
        }
    }

    /// Creates a monitor that reads queue depths from `probe`.
    pub fn with_probe(probe: Arc<dyn QueueProbe>) -> Self {
        Self {
            probe: Some(probe),
            ..Self::new()
        }
    }

    /// Appends a phase duration sample.
    pub fn record_phase(&mut self, phase: PhaseId, duration_ms: f64) {
        self.phases[phase.index()].push(duration_ms);
    }

    /// Appends a total tick time sample.
    pub fn record_frame(&mut self, total_ms: f64) {
        self.frames.push(total_ms);
    }

    /// Percentile `p` (0-100) of `phase` over the window.
    pub fn percentile(&self, phase: PhaseId, p: f64) -> f64 {
        self.phases[phase.index()].percentile(p)
    }

    /// Mean of `phase` over the window.
    pub fn mean(&self, phase: PhaseId) -> f64 {
        self.phases[phase.index()].average()
    }

    /// Variance of `phase` over the window. High variance means stutter.
    pub fn variance(&self, phase: PhaseId) -> f64 {
        self.phases[phase.index()].variance()
    }

    /// Number of samples of `phase` in the window.
    pub fn sample_count(&self, phase: PhaseId) -> usize {
        self.phases[phase.index()].count()
    }

    /// Current queue depths, or zeros without a probe.
    pub fn queue_depths(&self) -> QueueDepths {
        self.probe
            .as_ref()
            .map(|p| p.queue_depths())
            .unwrap_or_default()
    }

    /// Builds the aggregated telemetry view.
    pub fn snapshot(&self) -> Telemetry {
        let phases = PhaseId::ALL
            .iter()
            .filter_map(|&phase| {
                let buffer = &self.phases[phase.index()];
                let last_ms = buffer.last()?;
                Some(PhaseStats {
                    phase,
                    samples: buffer.count(),
                    last_ms,
                    mean_ms: buffer.average(),
                    p95_ms: buffer.percentile(95.0),
                    max_ms: buffer.max(),
                })
            })
            .collect();

        Telemetry {
            phases,
            frame_mean_ms: self.frames.average(),
            frame_p95_ms: self.frames.percentile(95.0),
            queue_depths: self.queue_depths(),
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("frames", &self.frames.count())
            .field("probe", &self.probe.is_some())
            .finish()
    }
}
