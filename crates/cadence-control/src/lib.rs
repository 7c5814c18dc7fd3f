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


//! # Cadence Control
//!
//! Policy side of the runtime: the [`BudgetAllocator`] that splits each tick
//! between phases, the [`AppStateMachine`] that gates execution, and the
//! [`FrameScheduler`] that drives one tick at a time.

#![warn(missing_docs)]

pub mod budget;
pub mod lifecycle;
pub mod scheduler;

pub use budget::{BudgetAllocator, BudgetConfig, BudgetSplit, TimeBudget};
pub use lifecycle::{AppStateMachine, LifecycleConfig, Transition};
pub use scheduler::{FrameScheduler, TickOutcome};
