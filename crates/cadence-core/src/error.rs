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

//! Defines the error taxonomy of the scheduling core.
//!
//! Only [`FatalRuntimeError`] changes control flow (it forces the lifecycle
//! into `Error`). Everything else is absorbed at the point of detection and
//! turned into logs, events or telemetry.

use crate::lifecycle::AppState;
use crate::phase::PhaseId;
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Classification of every error the core can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A phase used more than its reservation. Recoverable, handled by rebalancing.
    BudgetOverrun,
    /// A background task missed its deadline. Recoverable.
    WorkerTimeout,
    /// A pool worker thread died. Recoverable, the worker is respawned.
    WorkerCrash,
    /// An invalid lifecycle transition was attempted. Local to the caller.
    TransitionRejected,
    /// A bus subscriber failed during delivery. Delivery continues.
    HandlerError,
    /// A phase failed in a way the tick cannot absorb.
    FatalRuntimeError,
}

impl ErrorKind {
    /// Returns `true` for every kind that is absorbed without a state change.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::FatalRuntimeError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A subscriber failed while handling a published event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Builds a handler error from a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::new(format!("handler panicked: {}", panic_message(payload)))
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::HandlerError
    }
}

/// A lifecycle transition was not permitted from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transition {from} -> {to} is not permitted")]
pub struct TransitionRejected {
    /// The state the machine was (and still is) in.
    pub from: AppState,
    /// The requested target state.
    pub to: AppState,
}

impl TransitionRejected {
    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransitionRejected
    }
}

/// An error returned by a phase's `update`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PhaseError(String);

impl PhaseError {
    /// Creates a phase error with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.0
    }
}

/// An unrecoverable failure inside a tick.
///
/// Produced by the scheduler when a phase returns an error or panics. It is
/// the only error that drives the lifecycle into `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fatal runtime error in {phase} phase during frame {frame}: {message}")]
pub struct FatalRuntimeError {
    /// Index of the frame that was open when the failure happened.
    pub frame: u64,
    /// Phase that failed.
    pub phase: PhaseId,
    /// Description of the failure.
    pub message: String,
}

impl FatalRuntimeError {
    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::FatalRuntimeError
    }
}

/// A configuration value is out of its valid range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A value that must be strictly positive was not.
    #[error("`{field}` must be positive (got {value})")]
    NotPositive {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// The phase split does not cover exactly the whole frame budget.
    #[error("budget split must sum to 1.0 (got {sum})")]
    SplitMismatch {
        /// The actual sum of the split fractions.
        sum: f64,
    },
    /// A fraction was outside `[0, 1]`.
    #[error("`{field}` must be within [0, 1] (got {value})")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
