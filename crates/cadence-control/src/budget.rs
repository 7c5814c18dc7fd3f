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


//! Per-tick time budget and its reallocation policy.
//!
//! The allocator owns one [`TimeBudget`] per [`PhaseId`]. Each tick it:
//!
//! 1. Resets usage in [`BudgetAllocator::begin_tick`].
//! 2. Accumulates measured usage through [`BudgetAllocator::record`].
//! 3. Rebalances once in [`BudgetAllocator::rebalance`]: phases that keep
//!    overrunning borrow time from the buffer, then from the calmest phase,
//!    never pushing a donor below its floor. After a sustained calm period
//!    reservations relax back toward the fixed split.
//!
//! The sum of all reservations always equals the frame budget.

use cadence_core::{ConfigError, OverloadSignal, PhaseId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fraction of the frame budget reserved for each phase at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSplit {
    /// UI update share.
    pub ui: f64,
    /// Simulation update share.
    pub simulation: f64,
    /// Background scheduling window share.
    pub ai: f64,
    /// Unassigned slack.
    pub buffer: f64,
}

impl BudgetSplit {
    /// The configured fraction of `phase`.
    pub fn fraction(&self, phase: PhaseId) -> f64 {
        match phase {
            PhaseId::Ui => self.ui,
            PhaseId::Simulation => self.simulation,
            PhaseId::AiWindow => self.ai,
            PhaseId::Buffer => self.buffer,
        }
    }

    fn sum(&self) -> f64 {
        self.ui + self.simulation + self.ai + self.buffer
    }
}

impl Default for BudgetSplit {
    fn default() -> Self {
        Self {
            ui: 0.30,
            simulation: 0.48,
            ai: 0.12,
            buffer: 0.10,
        }
    }
}

/// Budget and rebalancing policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Target duration of one tick, in milliseconds.
    pub frame_budget_ms: f64,
    /// Fixed split of the frame budget.
    pub split: BudgetSplit,
    /// A phase grows once its overruns in the window exceed this.
    pub overrun_threshold: u32,
    /// Number of recent ticks considered for growth.
    pub overrun_window_ticks: usize,
    /// Reservation added per growth step, in milliseconds.
    pub grow_step_ms: f64,
    /// A donor is never shrunk below this fraction of its fixed share.
    pub floor_fraction: f64,
    /// Overrun-free ticks before reservations start relaxing.
    pub relax_after_ticks: u32,
    /// Reservation moved back toward the fixed split per calm tick.
    pub relax_step_ms: f64,
    /// Consecutive over-budget ticks before the runtime counts as overloaded.
    pub overload_consecutive_ticks: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: 16.67,
            split: BudgetSplit::default(),
            overrun_threshold: 3,
            overrun_window_ticks: 30,
            grow_step_ms: 0.5,
            floor_fraction: 0.5,
            relax_after_ticks: 60,
            relax_step_ms: 0.25,
            overload_consecutive_ticks: 3,
        }
    }
}

impl BudgetConfig {
    /// Rejects budgets the allocator cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("frame_budget_ms", self.frame_budget_ms),
            ("grow_step_ms", self.grow_step_ms),
            ("relax_step_ms", self.relax_step_ms),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { field, value });
            }
        }
        if self.overrun_window_ticks == 0 {
            return Err(ConfigError::NotPositive {
                field: "overrun_window_ticks",
                value: 0.0,
            });
        }
        for phase in PhaseId::ALL {
            let value = self.split.fraction(phase);
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field: phase.name(),
                    value,
                });
            }
        }
        if !(0.0..=1.0).contains(&self.floor_fraction) {
            return Err(ConfigError::OutOfRange {
                field: "floor_fraction",
                value: self.floor_fraction,
            });
        }
        let sum = self.split.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::SplitMismatch { sum });
        }
        Ok(())
    }

    /// Fixed reservation of `phase`, in milliseconds.
    pub fn base_ms(&self, phase: PhaseId) -> f64 {
        self.frame_budget_ms * self.split.fraction(phase)
    }

    /// Smallest reservation `phase` may be shrunk to.
    pub fn floor_ms(&self, phase: PhaseId) -> f64 {
        self.base_ms(phase) * self.floor_fraction
    }
}

/// Reservation and usage of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeBudget {
    /// The phase.
    pub phase: PhaseId,
    /// Milliseconds currently reserved.
    pub reserved_ms: f64,
    /// Milliseconds used during the current tick.
    pub used_ms: f64,
    /// Lifetime number of ticks in which the phase overran.
    pub overrun_count: u32,
}

const PHASES: usize = PhaseId::ALL.len();

/// Transfers smaller than this are rounding noise.
const MIN_TRANSFER_MS: f64 = 1e-9;

/// Owns the frame budget and decides how it is split between phases.
#[derive(Debug)]
pub struct BudgetAllocator {
    config: BudgetConfig,
    budgets: [TimeBudget; PHASES],
    overran: [bool; PHASES],
    windows: [VecDeque<bool>; PHASES],
    calm_ticks: u32,
    over_budget_streak: u32,
    overloaded: bool,
    signal: OverloadSignal,
    open_tick: Option<u64>,
}

impl BudgetAllocator {
    /// Creates an allocator with the fixed split of `config`.
    ///
    /// `signal` mirrors [`overloaded`](Self::overloaded) for the dispatcher.
    pub fn new(config: BudgetConfig, signal: OverloadSignal) -> Result<Self, ConfigError> {
        config.validate()?;
        let budgets = PhaseId::ALL.map(|phase| TimeBudget {
            phase,
            reserved_ms: config.base_ms(phase),
            used_ms: 0.0,
            overrun_count: 0,
        });
        Ok(Self {
            config,
            budgets,
            overran: [false; PHASES],
            windows: Default::default(),
            calm_ticks: 0,
            over_budget_streak: 0,
            overloaded: false,
            signal,
            open_tick: None,
        })
    }

    /// The target duration of one tick.
    pub fn frame_budget_ms(&self) -> f64 {
        self.config.frame_budget_ms
    }

    /// The active configuration.
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Starts accounting for tick `frame`, clearing last tick's usage.
    pub fn begin_tick(&mut self, frame: u64) {
        if let Some(previous) = self.open_tick {
            log::debug!("tick {} was never closed; discarding its usage", previous);
        }
        for budget in &mut self.budgets {
            budget.used_ms = 0.0;
        }
        self.overran = [false; PHASES];
        self.open_tick = Some(frame);
    }

    /// Milliseconds currently reserved for `phase`.
    pub fn reserve(&self, phase: PhaseId) -> f64 {
        self.budgets[phase.index()].reserved_ms
    }

    /// Milliseconds used by `phase` so far this tick.
    pub fn used(&self, phase: PhaseId) -> f64 {
        self.budgets[phase.index()].used_ms
    }

    /// Reservation left for `phase` this tick. Negative once overrun.
    pub fn remaining(&self, phase: PhaseId) -> f64 {
        self.reserve(phase) - self.used(phase)
    }

    /// Adds `used_ms` to the usage of `phase`.
    ///
    /// A phase overruns at most once per tick, however many times it records.
    /// Returns `true` if the phase is over its reservation.
    pub fn record(&mut self, phase: PhaseId, used_ms: f64) -> bool {
        let i = phase.index();
        let budget = &mut self.budgets[i];
        budget.used_ms += used_ms.max(0.0);
        let over = budget.used_ms > budget.reserved_ms;
        if over && !self.overran[i] {
            self.overran[i] = true;
            budget.overrun_count += 1;
            log::trace!(
                "BudgetOverrun: {} used {:.2}ms of {:.2}ms",
                phase,
                budget.used_ms,
                budget.reserved_ms
            );
        }
        over
    }

    /// Lifetime overrun count of `phase`.
    pub fn overrun_count(&self, phase: PhaseId) -> u32 {
        self.budgets[phase.index()].overrun_count
    }

    /// Overruns of `phase` within the current window.
    pub fn windowed_overruns(&self, phase: PhaseId) -> usize {
        self.windows[phase.index()].iter().filter(|o| **o).count()
    }

    /// Sum of this tick's usage across all phases.
    pub fn total_used(&self) -> f64 {
        self.budgets.iter().map(|b| b.used_ms).sum()
    }

    /// Sum of all reservations. Equal to the frame budget.
    pub fn total_reserved(&self) -> f64 {
        self.budgets.iter().map(|b| b.reserved_ms).sum()
    }

    /// `true` after enough consecutive over-budget ticks.
    pub fn overloaded(&self) -> bool {
        self.overloaded
    }

    /// Copy of every phase budget, in [`PhaseId::ALL`] order.
    pub fn budgets(&self) -> [TimeBudget; PHASES] {
        self.budgets
    }

    /// Closes the open tick without rebalancing.
    pub fn abort_tick(&mut self) {
        self.open_tick = None;
    }

    /// Applies the reallocation policy. Called once per tick after every
    /// phase has recorded.
    pub fn rebalance(&mut self) {
        let window = self.config.overrun_window_ticks;
        for (i, flags) in self.windows.iter_mut().enumerate() {
            flags.push_back(self.overran[i]);
            while flags.len() > window {
                flags.pop_front();
            }
        }

        self.update_overload();

        // ── Growth ────────────────────────────────────────────────────────
        let threshold = self.config.overrun_threshold as usize;
        let mut growers: Vec<PhaseId> = PhaseId::ALL
            .into_iter()
            .filter(|&p| p != PhaseId::Buffer && self.windowed_overruns(p) > threshold)
            .collect();
        growers.sort_by_key(|&p| std::cmp::Reverse(self.windowed_overruns(p)));
        for phase in growers {
            self.grow(phase);
            self.windows[phase.index()].clear();
        }

        // ── Relaxation ────────────────────────────────────────────────────
        if self.overran.iter().any(|o| *o) {
            self.calm_ticks = 0;
        } else {
            self.calm_ticks = self.calm_ticks.saturating_add(1);
            if self.calm_ticks >= self.config.relax_after_ticks {
                self.relax();
            }
        }

        self.open_tick = None;
    }

    fn update_overload(&mut self) {
        if self.total_used() > self.config.frame_budget_ms {
            self.over_budget_streak += 1;
        } else {
            self.over_budget_streak = 0;
        }

        let overloaded = self.over_budget_streak >= self.config.overload_consecutive_ticks;
        if overloaded != self.overloaded {
            if overloaded {
                log::warn!(
                    "runtime overloaded: {} consecutive ticks over the {:.2}ms budget",
                    self.over_budget_streak,
                    self.config.frame_budget_ms
                );
            } else {
                log::info!("runtime back within budget");
            }
        }
        self.overloaded = overloaded;
        self.signal.set(overloaded);
    }

    fn headroom(&self, phase: PhaseId) -> f64 {
        (self.reserve(phase) - self.config.floor_ms(phase)).max(0.0)
    }

    fn transfer(&mut self, from: PhaseId, to: PhaseId, ms: f64) {
        self.budgets[from.index()].reserved_ms -= ms;
        self.budgets[to.index()].reserved_ms += ms;
    }

    /// Grows `phase` by one step, borrowing from the buffer first and then
    /// from the phase with the fewest recent overruns.
    fn grow(&mut self, phase: PhaseId) {
        let mut wanted = self.config.grow_step_ms;

        let from_buffer = wanted.min(self.headroom(PhaseId::Buffer));
        if from_buffer > MIN_TRANSFER_MS {
            self.transfer(PhaseId::Buffer, phase, from_buffer);
            wanted -= from_buffer;
        }

        while wanted > MIN_TRANSFER_MS {
            let donor = PhaseId::ALL
                .into_iter()
                .filter(|&p| {
                    p != phase && p != PhaseId::Buffer && self.headroom(p) > MIN_TRANSFER_MS
                })
                .min_by_key(|&p| (self.windowed_overruns(p), self.overrun_count(p)));
            let Some(donor) = donor else {
                break;
            };
            let taken = wanted.min(self.headroom(donor));
            self.transfer(donor, phase, taken);
            wanted -= taken;
        }

        let granted = self.config.grow_step_ms - wanted;
        if granted > MIN_TRANSFER_MS {
            log::debug!(
                "rebalance: {} grows by {:.2}ms to {:.2}ms",
                phase,
                granted,
                self.reserve(phase)
            );
        } else {
            log::debug!("rebalance: {} cannot grow, every donor is at its floor", phase);
        }
    }

    /// Moves every phase one step back toward its fixed share, using the
    /// buffer as the counterparty.
    fn relax(&mut self) {
        let step = self.config.relax_step_ms;
        let executed = [PhaseId::Ui, PhaseId::Simulation, PhaseId::AiWindow];

        for phase in executed {
            let excess = self.reserve(phase) - self.config.base_ms(phase);
            if excess > MIN_TRANSFER_MS {
                self.transfer(phase, PhaseId::Buffer, excess.min(step));
            }
        }
        for phase in executed {
            let deficit = self.config.base_ms(phase) - self.reserve(phase);
            if deficit > MIN_TRANSFER_MS {
                let available = deficit.min(step).min(self.headroom(PhaseId::Buffer));
                if available > MIN_TRANSFER_MS {
                    self.transfer(PhaseId::Buffer, phase, available);
                }
            }
        }
    }
}
