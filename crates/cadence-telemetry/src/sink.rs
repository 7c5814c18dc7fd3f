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


//! Default log consumer of the runtime bus.

use crate::config::TelemetryConfig;
use cadence_core::{topics, EventBus, PhaseId, RuntimeEvent, SubscriptionId, TickReport};
use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;
use std::time::Instant;

/// Rate limiter for periodic summaries.
#[derive(Debug)]
pub struct SummaryScheduler {
    last_summary: Instant,
    interval_secs: f64,
}

impl SummaryScheduler {
    /// Creates a scheduler firing every `interval_secs`.
    pub fn new(interval_secs: f64) -> Self {
        Self {
            last_summary: Instant::now(),
            interval_secs,
        }
    }

    /// Returns true once the interval has elapsed since the last summary.
    pub fn should_log_summary(&self) -> bool {
        self.last_summary.elapsed().as_secs_f64() >= self.interval_secs
    }

    /// Marks that a summary has been logged, resetting the timer.
    pub fn mark_summary_logged(&mut self) {
        self.last_summary = Instant::now();
    }

    /// Gets the current interval in seconds.
    pub fn interval_secs(&self) -> f64 {
        self.interval_secs
    }
}

impl Default for SummaryScheduler {
    fn default() -> Self {
        Self::new(TelemetryConfig::default().summary_interval_secs)
    }
}

#[derive(Debug, Default)]
struct SinkState {
    scheduler: SummaryScheduler,
    ticks: u64,
    summaries: u64,
    overruns: [u64; PhaseId::ALL.len()],
}

impl SinkState {
    fn observe(&mut self, report: &TickReport) {
        self.ticks += 1;
        for sample in report.phases.iter().filter(|s| s.overrun) {
            self.overruns[sample.phase.index()] += 1;
        }
        log::debug!(
            "frame {} closed in {:.2}ms (delta {:.2}ms, {} results)",
            report.frame.index,
            report.total_ms(),
            report.delta_time_ms,
            report.results_ingested
        );

        if self.scheduler.should_log_summary() {
            log::info!("{}", self.summary(report));
            self.scheduler.mark_summary_logged();
            self.summaries += 1;
        }
    }

    fn summary(&self, report: &TickReport) -> String {
        let mut line = format!("frame {} after {} ticks", report.frame.index, self.ticks);
        for stats in &report.telemetry.phases {
            let _ = write!(
                line,
                " | {} n={} mean={:.2}ms p95={:.2}ms overruns={}",
                stats.phase,
                stats.samples,
                stats.mean_ms,
                stats.p95_ms,
                self.overruns[stats.phase.index()]
            );
        }
        let depths = report.queue_depths();
        let _ = write!(
            line,
            " | queue pending={} in_flight={} ready={}",
            depths.pending, depths.in_flight, depths.ready
        );
        if report.overloaded {
            line.push_str(" | OVERLOADED");
        }
        line
    }
}

/// Logs state changes and periodic per-phase summaries.
///
/// Subscribes to `state:changed` and `tick:completed` on attach. Dropping the
/// sink does not unsubscribe it; call [`TelemetryLogSink::detach`].
#[derive(Debug)]
pub struct TelemetryLogSink {
    subscriptions: Vec<SubscriptionId>,
    state: Rc<RefCell<SinkState>>,
}

impl TelemetryLogSink {
    /// Subscribes a new sink to `bus`.
    pub fn attach(bus: &EventBus<RuntimeEvent>, config: &TelemetryConfig) -> Self {
        let state = Rc::new(RefCell::new(SinkState {
            scheduler: SummaryScheduler::new(config.summary_interval_secs),
            ..SinkState::default()
        }));

        let changes = bus.subscribe(topics::STATE_CHANGED, |event: &RuntimeEvent| {
            if let RuntimeEvent::StateChanged { from, to } = event {
                log::info!("lifecycle: {} -> {}", from, to);
            }
            Ok(())
        });

        let sink_state = Rc::clone(&state);
        let ticks = bus.subscribe(topics::TICK_COMPLETED, move |event: &RuntimeEvent| {
            if let RuntimeEvent::TickCompleted(report) = event {
                sink_state.borrow_mut().observe(report);
            }
            Ok(())
        });

        Self {
            subscriptions: vec![changes, ticks],
            state,
        }
    }

    /// Removes the sink's subscriptions from `bus`.
    pub fn detach(self, bus: &EventBus<RuntimeEvent>) {
        for id in self.subscriptions {
            bus.unsubscribe(id);
        }
    }

    /// Number of `tick:completed` events seen.
    pub fn ticks_observed(&self) -> u64 {
        self.state.borrow().ticks
    }

    /// Number of periodic summaries written.
    pub fn summaries_logged(&self) -> u64 {
        self.state.borrow().summaries
    }

    /// Lifetime overrun count of `phase` as seen in tick reports.
    pub fn overruns(&self, phase: PhaseId) -> u64 {
        self.state.borrow().overruns[phase.index()]
    }
}
