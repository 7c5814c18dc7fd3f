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


//! The per-tick orchestrator.
//!
//! Each call to [`FrameScheduler::tick`]:
//!
//! 1. Checks the lifecycle gate. Nothing happens unless the state is `Running`.
//! 2. Opens a [`Frame`] and ingests the results that arrived since the last
//!    tick, publishing each as `ai:result`.
//! 3. Runs the UI phase, then the simulation phase, measuring each.
//! 4. Runs dispatcher housekeeping if the AI window has budget left.
//! 5. Rebalances the budget.
//! 6. Publishes `tick:completed` with a telemetry snapshot.
//!
//! A phase that fails or panics aborts the tick and moves the lifecycle to
//! `Error`. A phase that moves the lifecycle out of `Running` (a pause or a
//! reported fatal error) interrupts the tick before the next step. A
//! shutdown requested mid-frame is held by the lifecycle until the frame
//! closes, so the drain always runs after the tick's own steps.

use crate::budget::BudgetAllocator;
use crate::lifecycle::AppStateMachine;
use cadence_core::error::panic_message;
use cadence_core::{
    AppState, Clock, EventBus, FatalRuntimeError, Frame, Phase, PhaseContext, PhaseId,
    PhaseSample, RuntimeEvent, SystemClock, TickReport, TransitionContext,
};
use cadence_telemetry::PerformanceMonitor;
use cadence_workers::WorkerTaskDispatcher;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

/// What a call to [`FrameScheduler::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The lifecycle was not `Running`; nothing executed.
    Skipped(AppState),
    /// Every step ran.
    Completed(TickReport),
    /// A phase failed; the lifecycle moved to `Error`.
    Faulted(FatalRuntimeError),
    /// The lifecycle left `Running` during the tick; the remaining steps
    /// were not run.
    Interrupted(AppState),
}

impl TickOutcome {
    /// The report of a completed tick.
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            TickOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }

    /// Returns `true` if the tick ran to completion.
    pub fn is_completed(&self) -> bool {
        matches!(self, TickOutcome::Completed(_))
    }
}

/// Drives one tick at a time on the main context.
///
/// Owns the budget allocator, the performance monitor, the clock and the two
/// executed phases. Shares the bus and the lifecycle with the rest of the
/// main context and the dispatcher with the worker pool. Frame counter,
/// budgets and monitor history survive pauses and error recovery.
pub struct FrameScheduler {
    bus: Rc<EventBus<RuntimeEvent>>,
    lifecycle: Rc<AppStateMachine>,
    dispatcher: Arc<WorkerTaskDispatcher>,
    allocator: BudgetAllocator,
    monitor: PerformanceMonitor,
    clock: Box<dyn Clock>,
    ui: Box<dyn Phase>,
    simulation: Box<dyn Phase>,
    frame_index: u64,
    last_tick_ms: Option<f64>,
}

impl FrameScheduler {
    /// Creates a scheduler measuring with the system clock.
    pub fn new(
        bus: Rc<EventBus<RuntimeEvent>>,
        lifecycle: Rc<AppStateMachine>,
        dispatcher: Arc<WorkerTaskDispatcher>,
        allocator: BudgetAllocator,
        ui: Box<dyn Phase>,
        simulation: Box<dyn Phase>,
    ) -> Self {
        let monitor = PerformanceMonitor::with_probe(dispatcher.clone());
        Self {
            bus,
            lifecycle,
            dispatcher,
            allocator,
            monitor,
            clock: Box::new(SystemClock),
            ui,
            simulation,
            frame_index: 0,
            last_tick_ms: None,
        }
    }

    /// Replaces the clock used to measure phases.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Index of the last opened frame; 0 before the first tick.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The budget allocator.
    pub fn allocator(&self) -> &BudgetAllocator {
        &self.allocator
    }

    /// The performance monitor.
    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// The lifecycle gate.
    pub fn lifecycle(&self) -> &Rc<AppStateMachine> {
        &self.lifecycle
    }

    /// The background work dispatcher.
    pub fn dispatcher(&self) -> &Arc<WorkerTaskDispatcher> {
        &self.dispatcher
    }

    /// Runs one tick. `now_ms` is the driver's timestamp, used for the delta
    /// handed to phases.
    pub fn tick(&mut self, now_ms: f64) -> TickOutcome {
        // ── 1. Lifecycle gate ────────────────────────────────────────────
        let state = self.lifecycle.state();
        if !state.is_runnable() {
            log::trace!("tick skipped in {}", state);
            return TickOutcome::Skipped(state);
        }

        self.lifecycle.open_frame();
        let outcome = self.run_frame(now_ms);
        if let Some(Err(rejected)) = self.lifecycle.close_frame() {
            log::debug!("deferred shutdown dropped: {}", rejected);
        }
        outcome
    }

    fn run_frame(&mut self, now_ms: f64) -> TickOutcome {
        // ── 2. Open the frame and ingest last tick's results ────────────
        self.frame_index += 1;
        let frame = Frame {
            index: self.frame_index,
            start_time: self.clock.now(),
            budget_ms: self.allocator.frame_budget_ms(),
        };
        let delta_time_ms = self
            .last_tick_ms
            .map_or(0.0, |last| (now_ms - last).max(0.0));
        self.last_tick_ms = Some(now_ms);
        self.allocator.begin_tick(frame.index);

        let ai_reserved = self.allocator.reserve(PhaseId::AiWindow);
        let started = self.clock.now();
        let results = self.dispatcher.poll();
        for result in &results {
            self.bus.emit(&RuntimeEvent::AiResult(result.clone()));
        }
        self.allocator
            .record(PhaseId::AiWindow, self.clock.elapsed_ms(started));
        if let Some(interrupted) = self.interrupted(frame.index, PhaseId::AiWindow) {
            return interrupted;
        }

        // ── 3. Phases, in fixed order ────────────────────────────────────
        let mut samples = Vec::with_capacity(3);
        for phase_id in [PhaseId::Ui, PhaseId::Simulation] {
            let reserved_ms = self.allocator.reserve(phase_id);
            let phase = match phase_id {
                PhaseId::Ui => &mut *self.ui,
                _ => &mut *self.simulation,
            };
            let mut ctx = PhaseContext {
                frame: &frame,
                delta_time_ms,
                reserved_ms,
                bus: &self.bus,
                tasks: &*self.dispatcher,
            };

            let started = self.clock.now();
            let outcome = run_phase(phase, &mut ctx);
            let duration_ms = self.clock.elapsed_ms(started);

            let overrun = self.allocator.record(phase_id, duration_ms);
            self.monitor.record_phase(phase_id, duration_ms);
            samples.push(PhaseSample {
                phase: phase_id,
                duration_ms,
                reserved_ms,
                overrun,
            });

            if let Err(message) = outcome {
                return self.fault(frame.index, phase_id, message);
            }
            if let Some(interrupted) = self.interrupted(frame.index, phase_id) {
                return interrupted;
            }
        }

        // ── 4. Housekeeping in the AI window ─────────────────────────────
        if self.allocator.remaining(PhaseId::AiWindow) > 0.0 {
            let started = self.clock.now();
            let resolved = self.dispatcher.housekeeping();
            self.allocator
                .record(PhaseId::AiWindow, self.clock.elapsed_ms(started));
            if resolved > 0 {
                log::debug!("housekeeping resolved {} task(s)", resolved);
            }
        }
        let ai_used = self.allocator.used(PhaseId::AiWindow);
        self.monitor.record_phase(PhaseId::AiWindow, ai_used);
        samples.push(PhaseSample {
            phase: PhaseId::AiWindow,
            duration_ms: ai_used,
            reserved_ms: ai_reserved,
            overrun: ai_used > ai_reserved,
        });

        // ── 5. Rebalance ─────────────────────────────────────────────────
        self.allocator.rebalance();

        // ── 6. Telemetry ─────────────────────────────────────────────────
        let total_ms: f64 = samples.iter().map(|s| s.duration_ms).sum();
        self.monitor.record_frame(total_ms);
        let report = TickReport {
            frame,
            delta_time_ms,
            phases: samples,
            results_ingested: results.len(),
            overloaded: self.allocator.overloaded(),
            telemetry: self.monitor.snapshot(),
        };
        log::trace!("frame {} completed in {:.2}ms", frame.index, total_ms);
        self.bus
            .emit(&RuntimeEvent::TickCompleted(Box::new(report.clone())));
        TickOutcome::Completed(report)
    }

    /// Stops the tick if `step` moved the lifecycle out of `Running`.
    fn interrupted(&mut self, frame: u64, step: PhaseId) -> Option<TickOutcome> {
        let state = self.lifecycle.state();
        if state.is_runnable() {
            return None;
        }
        log::info!(
            "frame {} interrupted after the {} step: lifecycle is {}",
            frame,
            step,
            state
        );
        self.allocator.abort_tick();
        Some(TickOutcome::Interrupted(state))
    }

    fn fault(&mut self, frame: u64, phase: PhaseId, message: String) -> TickOutcome {
        let error = FatalRuntimeError {
            frame,
            phase,
            message,
        };
        log::error!("{}: {}", error.kind(), error);
        self.allocator.abort_tick();
        // Rejection is logged by the machine; the tick is over either way.
        let _ = self
            .lifecycle
            .transition(AppState::Error, TransitionContext::new(error.to_string()));
        TickOutcome::Faulted(error)
    }
}

/// Runs one phase, turning errors and panics into a message.
fn run_phase(phase: &mut dyn Phase, ctx: &mut PhaseContext<'_>) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| phase.update(ctx))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("frame_index", &self.frame_index)
            .field("state", &self.lifecycle.state())
            .field("allocator", &self.allocator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetConfig;
    use cadence_core::{
        phase_fn, topics, LifecycleTrigger, ManualClock, OverloadSignal, PhaseError,
    };
    use cadence_workers::{CancelToken, DispatcherConfig, WorkError, WorkRequest, Worker};
    use std::cell::Cell;

    fn echo() -> Arc<dyn Worker> {
        Arc::new(
            |request: &WorkRequest, _: &CancelToken| -> Result<Vec<u8>, WorkError> {
                Ok(request.payload.clone())
            },
        )
    }

    fn timed(clock: &ManualClock, ms: f64) -> Box<dyn Phase> {
        let clock = clock.clone();
        Box::new(phase_fn(move |_ctx| {
            clock.advance_ms(ms);
            Ok(())
        }))
    }

    fn running_scheduler(
        ui: Box<dyn Phase>,
        simulation: Box<dyn Phase>,
        clock: ManualClock,
    ) -> FrameScheduler {
        let bus = Rc::new(EventBus::new());
        let lifecycle = Rc::new(AppStateMachine::new(Rc::clone(&bus)));
        let signal = OverloadSignal::new();
        let dispatcher = Arc::new(
            WorkerTaskDispatcher::new(&DispatcherConfig::default(), echo(), signal.clone())
                .unwrap(),
        );
        let allocator = BudgetAllocator::new(BudgetConfig::default(), signal).unwrap();
        lifecycle
            .transition(AppState::Loading, TransitionContext::default())
            .unwrap();
        lifecycle
            .transition(AppState::Running, TransitionContext::default())
            .unwrap();
        FrameScheduler::new(bus, lifecycle, dispatcher, allocator, ui, simulation).with_clock(clock)
    }

    #[test]
    fn test_tick_is_a_noop_unless_running() {
        let clock = ManualClock::new();
        let mut scheduler = running_scheduler(timed(&clock, 1.0), timed(&clock, 1.0), clock);
        scheduler
            .lifecycle()
            .transition(AppState::Paused, TransitionContext::default())
            .unwrap();

        assert_eq!(scheduler.tick(0.0), TickOutcome::Skipped(AppState::Paused));
        assert_eq!(scheduler.frame_index(), 0);
    }

    #[test]
    fn test_completed_tick_accounts_every_phase() {
        let clock = ManualClock::new();
        let mut scheduler = running_scheduler(timed(&clock, 5.0), timed(&clock, 5.0), clock);

        let ticks = Rc::new(Cell::new(0));
        let seen = Rc::clone(&ticks);
        scheduler.bus.subscribe(topics::TICK_COMPLETED, move |_: &RuntimeEvent| {
            seen.set(seen.get() + 1);
            Ok(())
        });

        let outcome = scheduler.tick(0.0);
        let report = outcome.report().unwrap();
        assert_eq!(report.frame.index, 1);
        assert_eq!(report.delta_time_ms, 0.0);
        assert_eq!(
            report.phases.iter().map(|s| s.phase).collect::<Vec<_>>(),
            vec![PhaseId::Ui, PhaseId::Simulation, PhaseId::AiWindow]
        );
        assert!((report.phase(PhaseId::Ui).unwrap().duration_ms - 5.0).abs() < 1e-6);
        assert!(report.overrun_flags().iter().all(|(_, over)| !over));
        assert!((scheduler.allocator().total_used() - report.total_ms()).abs() < 1e-9);
        assert_eq!(ticks.get(), 1);

        let second = scheduler.tick(16.0);
        assert_eq!(second.report().unwrap().delta_time_ms, 16.0);
        assert_eq!(scheduler.monitor().sample_count(PhaseId::Ui), 2);
    }

    #[test]
    fn test_ui_finishes_before_simulation_starts() {
        let clock = ManualClock::new();
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let (a, b) = (Rc::clone(&order), Rc::clone(&order));
        let ui = Box::new(phase_fn(move |_ctx| {
            a.borrow_mut().push("ui");
            Ok(())
        }));
        let sim = Box::new(phase_fn(move |_ctx| {
            b.borrow_mut().push("simulation");
            Ok(())
        }));
        let mut scheduler = running_scheduler(ui, sim, clock);

        scheduler.tick(0.0);
        scheduler.tick(16.0);
        assert_eq!(*order.borrow(), vec!["ui", "simulation", "ui", "simulation"]);
    }

    #[test]
    fn test_failing_phase_faults_and_stops_ticks() {
        let clock = ManualClock::new();
        let sim_runs = Rc::new(Cell::new(0));
        let runs = Rc::clone(&sim_runs);
        let ui = Box::new(phase_fn(|_ctx| Err(PhaseError::new("ui exploded"))));
        let sim = Box::new(phase_fn(move |_ctx| {
            runs.set(runs.get() + 1);
            Ok(())
        }));
        let mut scheduler = running_scheduler(ui, sim, clock);

        match scheduler.tick(0.0) {
            TickOutcome::Faulted(error) => {
                assert_eq!(error.frame, 1);
                assert_eq!(error.phase, PhaseId::Ui);
                assert_eq!(error.message, "ui exploded");
            }
            other => panic!("expected a fault, got {other:?}"),
        }
        assert_eq!(sim_runs.get(), 0);
        assert_eq!(scheduler.lifecycle().state(), AppState::Error);
        assert_eq!(scheduler.tick(16.0), TickOutcome::Skipped(AppState::Error));
    }

    #[test]
    fn test_panicking_phase_is_fatal_and_recoverable() {
        let clock = ManualClock::new();
        let armed = Rc::new(Cell::new(true));
        let trigger = Rc::clone(&armed);
        let sim = Box::new(phase_fn(move |_ctx| {
            if trigger.get() {
                panic!("simulation diverged");
            }
            Ok(())
        }));
        let mut scheduler = running_scheduler(timed(&clock, 1.0), sim, clock);

        match scheduler.tick(0.0) {
            TickOutcome::Faulted(error) => {
                assert_eq!(error.phase, PhaseId::Simulation);
                assert!(error.message.contains("simulation diverged"));
            }
            other => panic!("expected a fault, got {other:?}"),
        }

        armed.set(false);
        let lifecycle = Rc::clone(scheduler.lifecycle());
        lifecycle
            .transition(AppState::Loading, TransitionContext::new("retry"))
            .unwrap();
        lifecycle
            .transition(AppState::Running, TransitionContext::new("retry"))
            .unwrap();

        let report = scheduler.tick(32.0);
        assert_eq!(report.report().map(|r| r.frame.index), Some(2));
    }

    #[test]
    fn test_shutdown_requested_mid_tick_lets_the_frame_finish() {
        let clock = ManualClock::new();
        let completed_in = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen = Rc::clone(&completed_in);
        let ui = Box::new(phase_fn(|ctx| {
            ctx.bus
                .emit(&RuntimeEvent::Lifecycle(LifecycleTrigger::ShutdownRequested));
            Ok(())
        }));
        let mut scheduler = running_scheduler(ui, timed(&clock, 1.0), clock);
        let lifecycle = Rc::clone(scheduler.lifecycle());
        lifecycle.attach();
        let observer = Rc::clone(&lifecycle);
        scheduler.bus.subscribe(topics::TICK_COMPLETED, move |_event: &RuntimeEvent| {
            seen.borrow_mut().push(observer.state());
            Ok(())
        });

        let outcome = scheduler.tick(0.0);
        assert!(outcome.is_completed(), "got {outcome:?}");
        assert_eq!(*completed_in.borrow(), vec![AppState::Running]);
        assert_eq!(lifecycle.state(), AppState::Shutdown);
        assert!(!lifecycle.shutdown_pending());
        assert_eq!(scheduler.tick(16.0), TickOutcome::Skipped(AppState::Shutdown));
    }

    #[test]
    fn test_pause_requested_mid_tick_interrupts_remaining_steps() {
        let clock = ManualClock::new();
        let sim_runs = Rc::new(Cell::new(0));
        let runs = Rc::clone(&sim_runs);
        let completed = Rc::new(Cell::new(0));
        let count = Rc::clone(&completed);
        let ui = Box::new(phase_fn(|ctx| {
            ctx.bus
                .emit(&RuntimeEvent::Lifecycle(LifecycleTrigger::UserPauseRequested));
            Ok(())
        }));
        let sim = Box::new(phase_fn(move |_ctx| {
            runs.set(runs.get() + 1);
            Ok(())
        }));
        let mut scheduler = running_scheduler(ui, sim, clock);
        scheduler.lifecycle().attach();
        scheduler.bus.subscribe(topics::TICK_COMPLETED, move |_event: &RuntimeEvent| {
            count.set(count.get() + 1);
            Ok(())
        });

        assert_eq!(scheduler.tick(0.0), TickOutcome::Interrupted(AppState::Paused));
        assert_eq!(sim_runs.get(), 0);
        assert_eq!(completed.get(), 0);
        assert_eq!(scheduler.tick(16.0), TickOutcome::Skipped(AppState::Paused));
    }
}
