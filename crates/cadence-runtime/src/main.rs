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


// Headless driver for the Cadence runtime.
// Run with: cargo run -p cadence-runtime -- --ticks 300 --json

mod synthetic;

use anyhow::{Context, Result};
use cadence_sdk::prelude::*;
use clap::Parser;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs the Cadence frame scheduler headless")]
struct Args {
    /// JSON runtime configuration; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of ticks to run
    #[arg(long, default_value_t = 600)]
    ticks: u64,

    /// Simulated UI work per tick, in milliseconds
    #[arg(long, default_value_t = 3.0)]
    ui_ms: f64,

    /// Simulated simulation work per tick, in milliseconds
    #[arg(long, default_value_t = 6.0)]
    sim_ms: f64,

    /// Print the final summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    ticks_completed: u64,
    final_state: AppState,
    overloaded: bool,
    results: BTreeMap<String, usize>,
    drain_cancelled: usize,
    drain_settled: usize,
    drain_forced: usize,
    budgets: Vec<cadence_control::TimeBudget>,
    telemetry: cadence_core::Telemetry,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    cadence_telemetry::init_logging(&config.telemetry.log_filter);

    let frame_ms = config.budget.frame_budget_ms;
    let mut runtime = Runtime::builder(config)
        .worker(synthetic::SyntheticWorker::default())
        .ui_phase(synthetic::ui_phase(args.ui_ms))
        .simulation_phase(synthetic::simulation_phase(args.sim_ms))
        .with_log_sink()
        .build()
        .context("failed to build runtime")?;

    let results: Rc<RefCell<BTreeMap<String, usize>>> = Rc::default();
    let counts = Rc::clone(&results);
    runtime
        .bus()
        .subscribe(topics::AI_RESULT, move |event: &RuntimeEvent| {
            if let RuntimeEvent::AiResult(result) = event {
                *counts
                    .borrow_mut()
                    .entry(status_name(result.status).to_owned())
                    .or_default() += 1;
            }
            Ok(())
        });

    runtime.trigger(LifecycleTrigger::BootComplete);
    runtime.trigger(LifecycleTrigger::ResourcesLoaded);

    let started = Instant::now();
    let cadence = Duration::from_secs_f64(frame_ms / 1000.0);
    let mut ticks_completed = 0;
    for _ in 0..args.ticks {
        let tick_start = Instant::now();
        let now_ms = started.elapsed().as_secs_f64() * 1000.0;
        match runtime.tick(now_ms) {
            TickOutcome::Completed(_) => ticks_completed += 1,
            TickOutcome::Skipped(state) | TickOutcome::Interrupted(state) => {
                log::warn!("runtime left Running ({}), stopping early", state);
                break;
            }
            TickOutcome::Faulted(error) => {
                log::error!("stopping after fault: {}", error);
                break;
            }
        }
        if let Some(rest) = cadence.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    runtime.trigger(LifecycleTrigger::ShutdownRequested);
    let drain = runtime.lifecycle().last_drain().unwrap_or_default();

    let scheduler = runtime.scheduler();
    let summary = RunSummary {
        ticks_completed,
        final_state: runtime.state(),
        overloaded: scheduler.allocator().overloaded(),
        results: results.borrow().clone(),
        drain_cancelled: drain.cancelled,
        drain_settled: drain.settled,
        drain_forced: drain.forced,
        budgets: scheduler.allocator().budgets().to_vec(),
        telemetry: scheduler.monitor().snapshot(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        log::info!(
            "ran {} ticks in {:.2}s, final state {}",
            summary.ticks_completed,
            started.elapsed().as_secs_f64(),
            summary.final_state
        );
        for stats in &summary.telemetry.phases {
            log::info!(
                "  {:<10} mean {:.2}ms  p95 {:.2}ms  max {:.2}ms",
                stats.phase.name(),
                stats.mean_ms,
                stats.p95_ms,
                stats.max_ms
            );
        }
        log::info!("  results: {:?}", summary.results);
    }
    Ok(())
}

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => "completed",
        TaskStatus::Timeout => "timeout",
        TaskStatus::Error => "error",
        TaskStatus::Cancelled => "cancelled",
    }
}
