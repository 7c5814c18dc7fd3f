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

//! Telemetry, logging, and monitoring for the scheduling core.
//!
//! The [`PerformanceMonitor`] is a pure observer: it keeps rolling windows of
//! phase durations and reads queue depths on demand. The [`TelemetryLogSink`]
//! is the default consumer of `tick:completed` and `state:changed`.

#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod monitor;
pub mod sink;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use monitor::{PerformanceMonitor, RingBuffer, SAMPLE_WINDOW};
pub use sink::{SummaryScheduler, TelemetryLogSink};
