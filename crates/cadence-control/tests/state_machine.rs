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


use cadence_control::AppStateMachine;
use cadence_core::{topics, AppState, EventBus, RuntimeEvent, TransitionContext};
use std::cell::Cell;
use std::rc::Rc;

/// Shortest path from `Boot` to each state.
fn path_to(state: AppState) -> &'static [AppState] {
    match state {
        AppState::Boot => &[],
        AppState::Loading => &[AppState::Loading],
        AppState::Running => &[AppState::Loading, AppState::Running],
        AppState::Paused => &[AppState::Loading, AppState::Running, AppState::Paused],
        AppState::Error => &[AppState::Error],
        AppState::Shutdown => &[AppState::Loading, AppState::Running, AppState::Shutdown],
    }
}

fn machine_in(state: AppState) -> (Rc<EventBus<RuntimeEvent>>, AppStateMachine) {
    let bus = Rc::new(EventBus::new());
    let machine = AppStateMachine::new(Rc::clone(&bus));
    for &step in path_to(state) {
        machine
            .transition(step, TransitionContext::new("setup"))
            .unwrap();
    }
    assert_eq!(machine.state(), state);
    (bus, machine)
}

#[test]
fn test_invalid_edges_leave_state_untouched() {
    for from in AppState::ALL {
        for to in AppState::ALL {
            let valid = from.successors().contains(&to)
                || (to == AppState::Error && !from.is_terminal());
            if valid {
                continue;
            }

            let (bus, machine) = machine_in(from);
            let changes = Rc::new(Cell::new(0));
            let counter = Rc::clone(&changes);
            bus.subscribe(topics::STATE_CHANGED, move |_: &RuntimeEvent| {
                counter.set(counter.get() + 1);
                Ok(())
            });
            let history = machine.history();

            let err = machine
                .transition(to, TransitionContext::new("invalid edge"))
                .unwrap_err();
            assert_eq!((err.from, err.to), (from, to));
            assert_eq!(machine.state(), from, "{from} -> {to} must be rejected");
            assert_eq!(machine.history(), history);
            assert_eq!(changes.get(), 0);
        }
    }
}

#[test]
fn test_error_is_reachable_from_every_live_state() {
    for from in AppState::ALL {
        let (_bus, machine) = machine_in(from);
        let result = machine.transition(AppState::Error, TransitionContext::new("fatal"));
        assert_eq!(result.is_ok(), !from.is_terminal(), "{from} -> Error");
    }
}

#[test]
fn test_recovery_goes_through_loading() {
    let (_bus, machine) = machine_in(AppState::Error);
    assert!(machine
        .transition(AppState::Running, TransitionContext::new("skip"))
        .is_err());
    machine
        .transition(AppState::Loading, TransitionContext::new("reload"))
        .unwrap();
    machine
        .transition(AppState::Running, TransitionContext::new("loaded"))
        .unwrap();
    assert_eq!(
        machine.history(),
        vec![
            AppState::Boot,
            AppState::Error,
            AppState::Loading,
            AppState::Running
        ]
    );
}
