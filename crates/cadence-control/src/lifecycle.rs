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


//! The lifecycle gate of the runtime.

use cadence_core::{
    topics, AppState, DrainReport, EventBus, HandlerError, LifecycleTrigger, RuntimeEvent,
    SubscriptionId, TaskDrain, TransitionContext, TransitionRejected,
};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long shutdown waits for critical background work.
    pub shutdown_grace_ms: u64,
}

impl LifecycleConfig {
    /// The grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 2_000,
        }
    }
}

/// A transition handed to lifecycle hooks.
#[derive(Debug, Clone, Copy)]
pub struct Transition<'a> {
    /// State being left.
    pub from: AppState,
    /// State being entered.
    pub to: AppState,
    /// Why the transition happened.
    pub context: &'a TransitionContext,
}

type Hook = Rc<dyn Fn(&Transition<'_>)>;

struct ShutdownDrain {
    drain: Arc<dyn TaskDrain>,
    grace: Duration,
}

/// Validates and applies lifecycle transitions.
///
/// Lives on the main context. All methods take `&self` so the machine can be
/// shared between the scheduler and the bus handler installed by
/// [`attach`](Self::attach).
///
/// A transition runs, in order: exit hooks of the old state, the state
/// change, entry hooks of the new state (the shutdown drain first when
/// entering `Shutdown`), the history append, and finally `state:changed`.
/// A rejected transition has no effect at all. A panicking hook is logged
/// as a `HandlerError` and the transition still completes.
///
/// While the scheduler holds a frame open, an accepted `Shutdown` request is
/// deferred until [`close_frame`](Self::close_frame), so the drain never
/// runs in the middle of a tick.
pub struct AppStateMachine {
    state: Cell<AppState>,
    history: RefCell<Vec<AppState>>,
    bus: Rc<EventBus<RuntimeEvent>>,
    on_enter: RefCell<HashMap<AppState, Vec<Hook>>>,
    on_exit: RefCell<HashMap<AppState, Vec<Hook>>>,
    drain: Option<ShutdownDrain>,
    last_drain: Cell<Option<DrainReport>>,
    in_hooks: Cell<bool>,
    frame_open: Cell<bool>,
    deferred_shutdown: RefCell<Option<TransitionContext>>,
    trigger_subscription: Cell<Option<SubscriptionId>>,
}

impl AppStateMachine {
    /// Creates a machine in `Boot` that publishes on `bus`.
    pub fn new(bus: Rc<EventBus<RuntimeEvent>>) -> Self {
        Self {
            state: Cell::new(AppState::Boot),
            history: RefCell::new(vec![AppState::Boot]),
            bus,
            on_enter: RefCell::new(HashMap::new()),
            on_exit: RefCell::new(HashMap::new()),
            drain: None,
            last_drain: Cell::new(None),
            in_hooks: Cell::new(false),
            frame_open: Cell::new(false),
            deferred_shutdown: RefCell::new(None),
            trigger_subscription: Cell::new(None),
        }
    }

    /// Drains `drain` for at most `grace` when entering `Shutdown`.
    pub fn with_drain(mut self, drain: Arc<dyn TaskDrain>, grace: Duration) -> Self {
        self.drain = Some(ShutdownDrain { drain, grace });
        self
    }

    /// The current state.
    pub fn state(&self) -> AppState {
        self.state.get()
    }

    /// Every state entered so far, starting with `Boot`.
    pub fn history(&self) -> Vec<AppState> {
        self.history.borrow().clone()
    }

    /// Outcome of the shutdown drain, once it ran.
    pub fn last_drain(&self) -> Option<DrainReport> {
        self.last_drain.get()
    }

    /// Runs `hook` every time `state` is entered.
    pub fn on_enter<F>(&self, state: AppState, hook: F)
    where
        F: Fn(&Transition<'_>) + 'static,
    {
        self.on_enter
            .borrow_mut()
            .entry(state)
            .or_default()
            .push(Rc::new(hook));
    }

    /// Runs `hook` every time `state` is left.
    pub fn on_exit<F>(&self, state: AppState, hook: F)
    where
        F: Fn(&Transition<'_>) + 'static,
    {
        self.on_exit
            .borrow_mut()
            .entry(state)
            .or_default()
            .push(Rc::new(hook));
    }

    /// Moves to `to` if the edge is permitted.
    ///
    /// Hooks may not request transitions themselves; such requests are
    /// rejected. `state:changed` subscribers may. A `Shutdown` accepted while
    /// a frame is open returns `Ok` and is applied when the frame closes.
    pub fn transition(
        &self,
        to: AppState,
        context: TransitionContext,
    ) -> Result<(), TransitionRejected> {
        let from = self.state.get();
        if self.in_hooks.get() || !from.can_transition_to(to) {
            let rejected = TransitionRejected { from, to };
            log::warn!("{}: {} ({})", rejected.kind(), rejected, context.reason);
            return Err(rejected);
        }

        if to == AppState::Shutdown && self.frame_open.get() {
            log::info!(
                "shutdown requested during an open frame ({}); deferred to frame end",
                context.reason
            );
            let mut deferred = self.deferred_shutdown.borrow_mut();
            if deferred.is_none() {
                *deferred = Some(context);
            }
            return Ok(());
        }

        let transition = Transition {
            from,
            to,
            context: &context,
        };
        self.in_hooks.set(true);
        Self::run_hooks(&self.on_exit, from, &transition);
        self.state.set(to);
        if to == AppState::Shutdown {
            self.deferred_shutdown.borrow_mut().take();
            self.run_drain();
        }
        Self::run_hooks(&self.on_enter, to, &transition);
        self.in_hooks.set(false);

        self.history.borrow_mut().push(to);
        log::debug!("lifecycle: {} -> {} ({})", from, to, context.reason);
        self.bus.emit(&RuntimeEvent::StateChanged { from, to });
        Ok(())
    }

    /// Marks the start of a tick. Called by the scheduler.
    pub fn open_frame(&self) {
        self.frame_open.set(true);
    }

    /// Marks the end of a tick and applies a deferred `Shutdown`, if any.
    ///
    /// Returns the outcome of the deferred transition. It is re-validated,
    /// since the state may have changed during the frame.
    pub fn close_frame(&self) -> Option<Result<(), TransitionRejected>> {
        self.frame_open.set(false);
        let context = self.deferred_shutdown.borrow_mut().take()?;
        Some(self.transition(AppState::Shutdown, context))
    }

    /// Returns `true` if a `Shutdown` is waiting for the frame to close.
    pub fn shutdown_pending(&self) -> bool {
        self.deferred_shutdown.borrow().is_some()
    }

    /// Applies the transition requested by `trigger`.
    pub fn handle_trigger(&self, trigger: LifecycleTrigger) -> Result<(), TransitionRejected> {
        self.transition(trigger.target(), trigger.into())
    }

    /// Subscribes the machine to the `lifecycle` topic of its bus.
    ///
    /// Invalid triggers are logged and ignored; they are not handler errors.
    /// Calling it again replaces the previous subscription.
    pub fn attach(self: &Rc<Self>) -> SubscriptionId {
        self.detach();
        let weak: Weak<Self> = Rc::downgrade(self);
        let id = self
            .bus
            .subscribe(topics::LIFECYCLE, move |event: &RuntimeEvent| {
                if let (RuntimeEvent::Lifecycle(trigger), Some(machine)) = (event, weak.upgrade())
                {
                    // Rejections are already logged by `transition`.
                    let _ = machine.handle_trigger(*trigger);
                }
                Ok(())
            });
        self.trigger_subscription.set(Some(id));
        id
    }

    /// Removes the subscription installed by [`attach`](Self::attach).
    pub fn detach(&self) -> bool {
        match self.trigger_subscription.take() {
            Some(id) => self.bus.unsubscribe(id),
            None => false,
        }
    }

    fn run_hooks(
        hooks: &RefCell<HashMap<AppState, Vec<Hook>>>,
        state: AppState,
        transition: &Transition<'_>,
    ) {
        // Snapshot so hooks may register further hooks.
        let snapshot: Vec<Hook> = hooks.borrow().get(&state).cloned().unwrap_or_default();
        for hook in snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(transition))) {
                let error = HandlerError::from_panic(payload.as_ref());
                log::warn!(
                    "{} in lifecycle hook ({} -> {}): {}",
                    error.kind(),
                    transition.from,
                    transition.to,
                    error
                );
            }
        }
    }

    fn run_drain(&self) {
        let Some(shutdown) = &self.drain else {
            return;
        };
        let report = shutdown.drain.drain(shutdown.grace);
        log::info!(
            "shutdown drain: {} cancelled, {} settled, {} forced",
            report.cancelled,
            report.settled,
            report.forced
        );
        self.last_drain.set(Some(report));
    }
}

impl fmt::Debug for AppStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppStateMachine")
            .field("state", &self.state.get())
            .field("history", &self.history.borrow().len())
            .field("drain", &self.drain.is_some())
            .field("shutdown_pending", &self.shutdown_pending())
            .finish_non_exhaustive()
    }
}
