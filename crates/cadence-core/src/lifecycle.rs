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

//! Application lifecycle states and the edges between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of the application.
///
/// ```text
/// Boot    -> Loading | Error
/// Loading -> Running | Error
/// Running -> Paused  | Error | Shutdown
/// Paused  -> Running | Error | Shutdown
/// Error   -> Loading | Shutdown
/// Shutdown (terminal)
/// ```
///
/// `Error` is additionally reachable from every non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum AppState {
    /// Process started, nothing loaded yet.
    #[default]
    Boot,
    /// Resources are being loaded.
    Loading,
    /// Ticks execute.
    Running,
    /// Ticks are suspended on user request.
    Paused,
    /// A fatal error was captured; waiting for explicit recovery.
    Error,
    /// Terminal state. Background work is drained.
    Shutdown,
}

impl AppState {
    /// All states, in declaration order.
    pub const ALL: [AppState; 6] = [
        AppState::Boot,
        AppState::Loading,
        AppState::Running,
        AppState::Paused,
        AppState::Error,
        AppState::Shutdown,
    ];

    /// The explicit edges leaving this state.
    pub fn successors(self) -> &'static [AppState] {
        match self {
            AppState::Boot => &[AppState::Loading, AppState::Error],
            AppState::Loading => &[AppState::Running, AppState::Error],
            AppState::Running => &[AppState::Paused, AppState::Error, AppState::Shutdown],
            AppState::Paused => &[AppState::Running, AppState::Error, AppState::Shutdown],
            AppState::Error => &[AppState::Loading, AppState::Shutdown],
            AppState::Shutdown => &[],
        }
    }

    /// Returns `true` if `self -> to` is an explicit edge or the implicit
    /// fatal-capture edge into `Error`.
    pub fn can_transition_to(self, to: AppState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == AppState::Error || self.successors().contains(&to)
    }

    /// Returns `true` for the state in which ticks execute.
    pub fn is_runnable(self) -> bool {
        self == AppState::Running
    }

    /// Returns `true` for `Shutdown`.
    pub fn is_terminal(self) -> bool {
        self == AppState::Shutdown
    }

    /// Parses a state from its name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Returns the state's name.
    pub fn name(self) -> &'static str {
        match self {
            AppState::Boot => "Boot",
            AppState::Loading => "Loading",
            AppState::Running => "Running",
            AppState::Paused => "Paused",
            AppState::Error => "Error",
            AppState::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// External inputs that drive the lifecycle, delivered over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleTrigger {
    /// Boot work is done; start loading.
    BootComplete,
    /// Loading finished; start running.
    ResourcesLoaded,
    /// The user asked to pause.
    UserPauseRequested,
    /// The user asked to resume.
    UserResumeRequested,
    /// A collaborator reported an unrecoverable error.
    FatalErrorReported,
    /// The host wants the application to stop.
    ShutdownRequested,
}

impl LifecycleTrigger {
    /// The state this trigger asks the machine to enter.
    pub fn target(self) -> AppState {
        match self {
            LifecycleTrigger::BootComplete => AppState::Loading,
            LifecycleTrigger::ResourcesLoaded => AppState::Running,
            LifecycleTrigger::UserPauseRequested => AppState::Paused,
            LifecycleTrigger::UserResumeRequested => AppState::Running,
            LifecycleTrigger::FatalErrorReported => AppState::Error,
            LifecycleTrigger::ShutdownRequested => AppState::Shutdown,
        }
    }
}

/// Diagnostic context attached to a transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionContext {
    /// Why the transition was requested.
    pub reason: String,
}

impl TransitionContext {
    /// Creates a context with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<LifecycleTrigger> for TransitionContext {
    fn from(trigger: LifecycleTrigger) -> Self {
        Self::new(format!("{trigger:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_edges() {
        assert!(AppState::Boot.can_transition_to(AppState::Loading));
        assert!(AppState::Loading.can_transition_to(AppState::Running));
        assert!(AppState::Running.can_transition_to(AppState::Paused));
        assert!(AppState::Paused.can_transition_to(AppState::Running));
        assert!(AppState::Error.can_transition_to(AppState::Loading));
        assert!(AppState::Paused.can_transition_to(AppState::Shutdown));

        assert!(!AppState::Boot.can_transition_to(AppState::Running));
        assert!(!AppState::Loading.can_transition_to(AppState::Paused));
        assert!(!AppState::Error.can_transition_to(AppState::Running));
        assert!(!AppState::Running.can_transition_to(AppState::Running));
    }

    #[test]
    fn test_error_reachable_from_every_non_terminal_state() {
        for state in AppState::ALL {
            assert_eq!(
                state.can_transition_to(AppState::Error),
                !state.is_terminal(),
                "{state} -> Error"
            );
        }
    }

    #[test]
    fn test_shutdown_is_terminal() {
        for to in AppState::ALL {
            assert!(!AppState::Shutdown.can_transition_to(to));
        }
    }

    #[test]
    fn test_from_name_round_trips() {
        for state in AppState::ALL {
            assert_eq!(AppState::from_name(state.name()), Some(state));
        }
        assert_eq!(AppState::from_name("Menu"), None);
    }

    #[test]
    fn test_trigger_targets() {
        assert_eq!(LifecycleTrigger::BootComplete.target(), AppState::Loading);
        assert_eq!(LifecycleTrigger::ResourcesLoaded.target(), AppState::Running);
        assert_eq!(LifecycleTrigger::ShutdownRequested.target(), AppState::Shutdown);
    }
}
