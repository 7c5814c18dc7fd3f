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


//! The assembled runtime and its builder.

use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use cadence_control::{AppStateMachine, BudgetAllocator, FrameScheduler, TickOutcome};
use cadence_core::{
    phase_fn, AppState, Clock, DeliveryReport, DrainReport, EventBus, LifecycleTrigger,
    OverloadSignal, Phase, Priority, RuntimeEvent, SubmitError, SystemClock, TaskId, TaskPayload,
    TaskSubmitter, TransitionContext, TransitionRejected,
};
use cadence_telemetry::TelemetryLogSink;
use cadence_workers::{CancelToken, WorkError, WorkRequest, Worker, WorkerTaskDispatcher};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

fn unsupported_worker() -> Arc<dyn Worker> {
    Arc::new(
        |request: &WorkRequest, _: &CancelToken| -> Result<Vec<u8>, WorkError> {
            Err(WorkError::UnsupportedKind(request.kind.clone()))
        },
    )
}

fn idle_phase() -> Box<dyn Phase> {
    Box::new(phase_fn(|_ctx| Ok(())))
}

/// Assembles a [`Runtime`].
///
/// Every part has a default: a worker that rejects every task kind, phases
/// that do nothing, and the system clock.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    worker: Option<Arc<dyn Worker>>,
    ui: Option<Box<dyn Phase>>,
    simulation: Option<Box<dyn Phase>>,
    clock: Box<dyn Clock>,
    log_sink: bool,
}

impl RuntimeBuilder {
    /// Starts from `config`.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            worker: None,
            ui: None,
            simulation: None,
            clock: Box::new(SystemClock),
            log_sink: false,
        }
    }

    /// Sets the worker that executes background tasks.
    pub fn worker(mut self, worker: impl Worker + 'static) -> Self {
        self.worker = Some(Arc::new(worker));
        self
    }

    /// Sets the UI phase.
    pub fn ui_phase(mut self, phase: impl Phase + 'static) -> Self {
        self.ui = Some(Box::new(phase));
        self
    }

    /// Sets the simulation phase.
    pub fn simulation_phase(mut self, phase: impl Phase + 'static) -> Self {
        self.simulation = Some(Box::new(phase));
        self
    }

    /// Sets the clock used to measure phases.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Attaches a [`TelemetryLogSink`] to the bus.
    pub fn with_log_sink(mut self) -> Self {
        self.log_sink = true;
        self
    }

    /// Validates the configuration and wires every component.
    pub fn build(self) -> Result<Runtime> {
        self.config
            .validate()
            .context("invalid runtime configuration")?;

        let bus = Rc::new(EventBus::new());
        let signal = OverloadSignal::new();

        let dispatcher = Arc::new(
            WorkerTaskDispatcher::new(
                &self.config.dispatcher,
                self.worker.unwrap_or_else(unsupported_worker),
                signal.clone(),
            )
            .context("failed to start worker pool")?,
        );

        let lifecycle = Rc::new(
            AppStateMachine::new(Rc::clone(&bus))
                .with_drain(dispatcher.clone(), self.config.lifecycle.shutdown_grace()),
        );
        lifecycle.attach();

        let allocator = BudgetAllocator::new(self.config.budget.clone(), signal)
            .context("invalid budget configuration")?;

        let log_sink = self
            .log_sink
            .then(|| TelemetryLogSink::attach(&bus, &self.config.telemetry));

        let scheduler = FrameScheduler::new(
            Rc::clone(&bus),
            Rc::clone(&lifecycle),
            Arc::clone(&dispatcher),
            allocator,
            self.ui.unwrap_or_else(idle_phase),
            self.simulation.unwrap_or_else(idle_phase),
        )
        .with_clock(self.clock);

        log::info!(
            "runtime ready: {:.2} ms frame budget, {} workers",
            self.config.budget.frame_budget_ms,
            dispatcher.worker_count()
        );

        Ok(Runtime {
            bus,
            lifecycle,
            dispatcher,
            scheduler,
            log_sink,
            config: self.config,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// A fully wired runtime, driven by the host through [`Runtime::tick`].
///
/// Lives on the main context. Only the worker pool runs elsewhere.
pub struct Runtime {
    bus: Rc<EventBus<RuntimeEvent>>,
    lifecycle: Rc<AppStateMachine>,
    dispatcher: Arc<WorkerTaskDispatcher>,
    scheduler: FrameScheduler,
    log_sink: Option<TelemetryLogSink>,
    config: RuntimeConfig,
}

impl Runtime {
    /// Starts building a runtime from `config`.
    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// The event bus shared by every main-context component.
    pub fn bus(&self) -> &Rc<EventBus<RuntimeEvent>> {
        &self.bus
    }

    /// The lifecycle state machine.
    pub fn lifecycle(&self) -> &Rc<AppStateMachine> {
        &self.lifecycle
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AppState {
        self.lifecycle.state()
    }

    /// The background work dispatcher.
    pub fn dispatcher(&self) -> &Arc<WorkerTaskDispatcher> {
        &self.dispatcher
    }

    /// The frame scheduler.
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// The log sink, if one was attached.
    pub fn log_sink(&self) -> Option<&TelemetryLogSink> {
        self.log_sink.as_ref()
    }

    /// The configuration the runtime was built from.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Submits background work from outside a phase.
    pub fn submit(
        &self,
        payload: TaskPayload,
        priority: Priority,
        deadline: Instant,
    ) -> Result<TaskId, SubmitError> {
        self.dispatcher.submit(payload, priority, deadline)
    }

    /// Publishes a lifecycle trigger on the bus.
    pub fn trigger(&self, trigger: LifecycleTrigger) -> DeliveryReport {
        self.bus.emit(&RuntimeEvent::Lifecycle(trigger))
    }

    /// Runs one tick at the driver's timestamp `now_ms`.
    pub fn tick(&mut self, now_ms: f64) -> TickOutcome {
        self.scheduler.tick(now_ms)
    }

    /// Moves to `Shutdown` and returns what the drain did.
    ///
    /// Fails without side effects if `Shutdown` is not reachable from the
    /// current state.
    pub fn shutdown(&self) -> Result<DrainReport, TransitionRejected> {
        self.lifecycle
            .transition(AppState::Shutdown, TransitionContext::new("runtime shutdown"))?;
        Ok(self.lifecycle.last_drain().unwrap_or_default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("frame", &self.scheduler.frame_index())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(sink) = self.log_sink.take() {
            sink.detach(&self.bus);
        }
        self.lifecycle.detach();
        log::info!(
            "runtime dropped in {} after {} frames",
            self.state(),
            self.scheduler.frame_index()
        );
    }
}
