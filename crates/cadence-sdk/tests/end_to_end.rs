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


//! Full runtime scenarios on a manual clock.

use cadence_sdk::prelude::*;
use cadence_core::{DrainReport, TransitionContext};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FRAME_MS: f64 = 16.67;

fn timed(clock: &ManualClock, ms: f64) -> impl Phase + 'static {
    let clock = clock.clone();
    phase_fn(move |_ctx| {
        clock.advance_ms(ms);
        Ok(())
    })
}

fn echo(request: &WorkRequest, _: &CancelToken) -> Result<Vec<u8>, WorkError> {
    Ok(request.payload.clone())
}

fn boot(runtime: &Runtime) {
    runtime.trigger(LifecycleTrigger::BootComplete);
    runtime.trigger(LifecycleTrigger::ResourcesLoaded);
    assert_eq!(runtime.state(), AppState::Running);
}

fn wait_for_ready(runtime: &Runtime, count: usize) {
    let give_up = Instant::now() + Duration::from_secs(5);
    while runtime.scheduler().monitor().queue_depths().ready < count {
        assert!(Instant::now() < give_up, "worker results never arrived");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn record_results(runtime: &Runtime) -> Rc<RefCell<Vec<WorkerResult>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    runtime
        .bus()
        .subscribe(topics::AI_RESULT, move |event: &RuntimeEvent| {
            if let RuntimeEvent::AiResult(result) = event {
                sink.borrow_mut().push(result.clone());
            }
            Ok(())
        });
    seen
}

#[test]
fn test_steady_ticks_stay_within_budget() {
    let clock = ManualClock::new();
    let mut runtime = RuntimeBuilder::default()
        .ui_phase(timed(&clock, 5.0))
        .simulation_phase(timed(&clock, 5.0))
        .clock(clock.clone())
        .build()
        .unwrap();
    boot(&runtime);

    for i in 0..10 {
        let outcome = runtime.tick(i as f64 * FRAME_MS);
        let report = outcome.report().expect("tick should complete");
        assert_eq!(report.frame.index, i + 1);
        assert!(report.overrun_flags().iter().all(|(_, over)| !over));
        assert!(!report.overloaded);
    }

    let telemetry = runtime.scheduler().monitor().snapshot();
    let ui = telemetry.phase(PhaseId::Ui).unwrap();
    assert_eq!(ui.samples, 10);
    assert!((ui.p95_ms - 5.0).abs() < 1e-6);
    for phase in [PhaseId::Ui, PhaseId::Simulation, PhaseId::AiWindow] {
        assert_eq!(runtime.scheduler().allocator().overrun_count(phase), 0);
    }
}

#[test]
fn test_results_surface_on_a_later_tick() {
    let clock = ManualClock::new();
    let submitted = Rc::new(Cell::new(None));
    let slot = Rc::clone(&submitted);
    let ui = phase_fn(move |ctx| {
        if ctx.frame.index == 1 {
            let id = ctx
                .tasks
                .submit(
                    TaskPayload::new("path", vec![7, 7]),
                    Priority::Normal,
                    Instant::now() + Duration::from_secs(5),
                )
                .map_err(|err| PhaseError::new(err.to_string()))?;
            slot.set(Some(id));
        }
        Ok(())
    });

    let mut runtime = RuntimeBuilder::default()
        .worker(echo)
        .ui_phase(ui)
        .clock(clock)
        .build()
        .unwrap();
    boot(&runtime);
    let results = record_results(&runtime);

    let first = runtime.tick(0.0);
    assert_eq!(first.report().unwrap().results_ingested, 0);
    assert!(results.borrow().is_empty());

    wait_for_ready(&runtime, 1);
    let second = runtime.tick(FRAME_MS);
    assert_eq!(second.report().unwrap().results_ingested, 1);

    let results = results.borrow();
    assert_eq!(results.len(), 1);
    assert_eq!(Some(results[0].id), submitted.get());
    assert_eq!(results[0].status, TaskStatus::Completed);
    assert_eq!(results[0].result.as_deref(), Some(&[7u8, 7][..]));
}

#[test]
fn test_sustained_overload_sheds_low_priority_work() {
    let clock = ManualClock::new();
    let mut runtime = RuntimeBuilder::default()
        .worker(echo)
        .ui_phase(timed(&clock, 10.0))
        .simulation_phase(timed(&clock, 10.0))
        .clock(clock)
        .build()
        .unwrap();
    boot(&runtime);

    let deadline = Instant::now() + Duration::from_secs(5);
    for i in 0..3 {
        assert!(runtime.tick(i as f64 * FRAME_MS).is_completed());
    }
    assert!(runtime.scheduler().allocator().overloaded());

    let low = runtime.submit(TaskPayload::new("idle", Vec::new()), Priority::Low, deadline);
    assert_eq!(
        low,
        Err(SubmitError::Backpressure {
            priority: Priority::Low
        })
    );
    assert!(runtime
        .submit(TaskPayload::new("urgent", Vec::new()), Priority::Critical, deadline)
        .is_ok());
}

#[test]
fn test_expired_task_times_out_without_running() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let worker = move |request: &WorkRequest, _: &CancelToken| -> Result<Vec<u8>, WorkError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(request.payload.clone())
    };

    let mut runtime = RuntimeBuilder::default()
        .worker(worker)
        .clock(ManualClock::new())
        .build()
        .unwrap();
    boot(&runtime);
    let results = record_results(&runtime);

    let id = runtime
        .submit(TaskPayload::new("stale", Vec::new()), Priority::Low, Instant::now())
        .unwrap();
    runtime.tick(0.0);

    let results = results.borrow();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, id);
    assert_eq!(results[0].status, TaskStatus::Timeout);
    assert!(results[0].result.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_reservations_always_cover_the_frame() {
    let clock = ManualClock::new();
    let spikes = clock.clone();
    let ui = phase_fn(move |ctx| {
        // UI overruns on every other frame.
        let ms = if ctx.frame.index % 2 == 0 { 9.0 } else { 3.0 };
        spikes.advance_ms(ms);
        Ok(())
    });

    let mut runtime = RuntimeBuilder::default()
        .ui_phase(ui)
        .simulation_phase(timed(&clock, 4.0))
        .clock(clock)
        .build()
        .unwrap();
    boot(&runtime);

    let base_ui = runtime.scheduler().allocator().reserve(PhaseId::Ui);
    for i in 0..40 {
        runtime.tick(i as f64 * FRAME_MS);
        let total = runtime.scheduler().allocator().total_reserved();
        assert!((total - FRAME_MS).abs() < 1e-6, "tick {i}: reserved {total}");
    }
    assert!(runtime.scheduler().allocator().reserve(PhaseId::Ui) > base_ui);
}

#[test]
fn test_fatal_phase_moves_to_error_and_recovers() {
    let fail = Rc::new(Cell::new(false));
    let trip = Rc::clone(&fail);
    let simulation = phase_fn(move |_ctx| {
        if trip.get() {
            return Err(PhaseError::new("physics exploded"));
        }
        Ok(())
    });

    let mut runtime = RuntimeBuilder::default()
        .simulation_phase(simulation)
        .clock(ManualClock::new())
        .build()
        .unwrap();
    boot(&runtime);
    assert!(runtime.tick(0.0).is_completed());

    fail.set(true);
    match runtime.tick(FRAME_MS) {
        TickOutcome::Faulted(error) => {
            assert_eq!(error.frame, 2);
            assert_eq!(error.phase, PhaseId::Simulation);
            assert!(error.message.contains("physics exploded"));
        }
        other => panic!("expected a fault, got {other:?}"),
    }
    assert_eq!(runtime.state(), AppState::Error);
    assert_eq!(
        runtime.tick(2.0 * FRAME_MS),
        TickOutcome::Skipped(AppState::Error)
    );

    fail.set(false);
    runtime
        .lifecycle()
        .transition(AppState::Loading, TransitionContext::new("reload"))
        .unwrap();
    runtime.trigger(LifecycleTrigger::ResourcesLoaded);
    let outcome = runtime.tick(3.0 * FRAME_MS);
    // The frame counter survives recovery.
    assert_eq!(outcome.report().unwrap().frame.index, 3);
}

#[test]
fn test_shutdown_settles_critical_work() {
    let worker = |request: &WorkRequest, _: &CancelToken| -> Result<Vec<u8>, WorkError> {
        std::thread::sleep(Duration::from_millis(20));
        Ok(request.payload.clone())
    };
    let mut config = RuntimeConfig::default();
    config.dispatcher.worker_count = 1;

    let mut runtime = Runtime::builder(config)
        .worker(worker)
        .clock(ManualClock::new())
        .build()
        .unwrap();
    boot(&runtime);
    assert!(runtime.tick(0.0).is_completed());

    let deadline = Instant::now() + Duration::from_secs(10);
    runtime
        .submit(TaskPayload::new("save", vec![1]), Priority::Critical, deadline)
        .unwrap();

    let report = runtime.shutdown().unwrap();
    assert_eq!(
        report,
        DrainReport {
            cancelled: 0,
            settled: 1,
            forced: 0
        }
    );
    assert_eq!(runtime.state(), AppState::Shutdown);
    assert_eq!(
        runtime.tick(FRAME_MS),
        TickOutcome::Skipped(AppState::Shutdown)
    );
    assert_eq!(
        runtime.submit(TaskPayload::new("late", Vec::new()), Priority::Critical, deadline),
        Err(SubmitError::ShuttingDown)
    );
}
