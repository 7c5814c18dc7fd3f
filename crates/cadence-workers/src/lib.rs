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


//! Background work for the scheduling core.
//!
//! The [`WorkerTaskDispatcher`] owns a fixed pool of named worker threads and
//! the only structure in the runtime that is shared across threads: the
//! pending queue plus the correlation table keyed by [`TaskId`]. Results flow
//! back over a channel and are only observed when the main context calls
//! [`WorkerTaskDispatcher::poll`].
//!
//! [`TaskId`]: cadence_core::TaskId

#![warn(missing_docs)]

pub mod config;
pub mod dispatcher;
mod queue;
pub mod worker;

pub use config::DispatcherConfig;
pub use dispatcher::WorkerTaskDispatcher;
pub use worker::{CancelToken, WorkError, WorkRequest, Worker};
