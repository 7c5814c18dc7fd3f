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

use crate::error::HandlerError;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// Name of a publish/subscribe channel on the [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(&'static str);

impl Topic {
    /// Creates a topic from a static name (e.g. `"tick:completed"`).
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the topic name.
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Token returned by [`EventBus::subscribe`], required to end the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// An event type that knows which topic it belongs to.
pub trait BusEvent {
    /// The topic this event is published on by [`EventBus::emit`].
    fn topic(&self) -> Topic;
}

/// Outcome of a single [`EventBus::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Number of handlers that were invoked.
    pub invoked: usize,
    /// Number of invoked handlers that returned an error or panicked.
    pub failed: usize,
}

type Handler<E> = Rc<dyn Fn(&E) -> Result<(), HandlerError>>;

struct Subscription<E> {
    id: SubscriptionId,
    handler: Handler<E>,
}

/// Synchronous, ordered publish/subscribe bus.
///
/// `publish` invokes every handler that was subscribed to the topic at the
/// moment `publish` was called, in subscription order, before returning.
/// The bus is not a queue: nothing is buffered between calls.
///
/// Handlers may subscribe, unsubscribe or publish from inside a delivery.
/// Registry changes made during a delivery only affect later `publish`
/// calls, because each delivery iterates over a snapshot of the registry.
///
/// The bus lives on the main execution context and is shared with `Rc`.
/// Handlers should hold it through a weak or borrowed reference, never own it.
pub struct EventBus<E> {
    topics: RefCell<HashMap<Topic, Vec<Subscription<E>>>>,
    index: RefCell<HashMap<SubscriptionId, Topic>>,
    next_id: Cell<u64>,
}

impl<E: 'static> EventBus<E> {
    /// Creates an empty bus.
    pub fn new() -> Self {
        log::debug!("EventBus initialized.");
        Self {
            topics: RefCell::new(HashMap::new()),
            index: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        }
    }

    /// Registers `handler` for `topic` and returns its subscription token.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&E) -> Result<(), HandlerError> + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        self.topics
            .borrow_mut()
            .entry(topic)
            .or_default()
            .push(Subscription {
                id,
                handler: Rc::new(handler),
            });
        self.index.borrow_mut().insert(id, topic);

        log::trace!("EventBus: {id} subscribed to '{topic}'.");
        id
    }

    /// Removes a subscription.
    ///
    /// Returns `false` if the token is unknown or was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some(topic) = self.index.borrow_mut().remove(&id) else {
            return false;
        };

        let mut topics = self.topics.borrow_mut();
        if let Some(subs) = topics.get_mut(&topic) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                topics.remove(&topic);
            }
        }

        log::trace!("EventBus: {id} unsubscribed from '{topic}'.");
        true
    }

    /// Delivers `event` to every current subscriber of `topic`.
    ///
    /// A handler that returns an error or panics is logged as a
    /// `HandlerError`; delivery continues with the remaining handlers.
    pub fn publish(&self, topic: Topic, event: &E) -> DeliveryReport {
        let snapshot: Vec<(SubscriptionId, Handler<E>)> = match self.topics.borrow().get(&topic) {
            Some(subs) => subs.iter().map(|s| (s.id, Rc::clone(&s.handler))).collect(),
            None => {
                log::trace!("EventBus: no subscribers for '{topic}'.");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();
        for (id, handler) in snapshot {
            report.invoked += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(payload) => HandlerError::from_panic(payload.as_ref()),
            };
            report.failed += 1;
            log::warn!("EventBus: {} from {id} on '{topic}': {error}", error.kind());
        }
        report
    }

    /// Returns the number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.borrow().get(&topic).map_or(0, Vec::len)
    }
}

impl<E: BusEvent + 'static> EventBus<E> {
    /// Publishes `event` on its own topic.
    pub fn emit(&self, event: &E) -> DeliveryReport {
        self.publish(event.topic(), event)
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics.borrow().len())
            .field("subscriptions", &self.index.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const PING: Topic = Topic::new("ping");
    const PONG: Topic = Topic::new("pong");

    /// A local, self-contained event type for testing purposes.
    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Ping(u32),
        Pong(u32),
    }

    impl BusEvent for TestEvent {
        fn topic(&self) -> Topic {
            match self {
                TestEvent::Ping(_) => PING,
                TestEvent::Pong(_) => PONG,
            }
        }
    }

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let clone = Rc::clone(&log);
        (log, move |_| Rc::clone(&clone))
    }

    #[test]
    fn test_publish_delivers_in_subscription_order() {
        let bus = EventBus::<TestEvent>::new();
        let (log, handle) = recorder();

        for name in ["a", "b", "c"] {
            let log = handle(name);
            bus.subscribe(PING, move |e| {
                log.borrow_mut().push(format!("{name}:{e:?}"));
                Ok(())
            });
        }

        let report = bus.emit(&TestEvent::Ping(1));
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(
            *log.borrow(),
            vec!["a:Ping(1)", "b:Ping(1)", "c:Ping(1)"]
        );
    }

    #[test]
    fn test_publish_only_reaches_matching_topic() {
        let bus = EventBus::<TestEvent>::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        bus.subscribe(PONG, move |_| {
            h.set(h.get() + 1);
            Ok(())
        });

        assert_eq!(bus.emit(&TestEvent::Ping(1)).invoked, 0);
        assert_eq!(bus.emit(&TestEvent::Pong(2)).invoked, 1);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::<TestEvent>::new();
        let id = bus.subscribe(PING, |_| Ok(()));
        assert_eq!(bus.subscriber_count(PING), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(PING), 0);
        assert_eq!(bus.emit(&TestEvent::Ping(0)).invoked, 0);
    }

    #[test]
    fn test_failing_handler_does_not_stop_delivery() {
        let bus = EventBus::<TestEvent>::new();
        let reached = Rc::new(Cell::new(false));

        bus.subscribe(PING, |_| Err(HandlerError::new("nope")));
        bus.subscribe(PING, |_| panic!("handler blew up"));
        let r = Rc::clone(&reached);
        bus.subscribe(PING, move |_| {
            r.set(true);
            Ok(())
        });

        let report = bus.emit(&TestEvent::Ping(7));
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 2);
        assert!(reached.get());
    }

    #[test]
    fn test_subscribe_during_publish_takes_effect_next_time() {
        let bus = Rc::new(EventBus::<TestEvent>::new());
        let late_hits = Rc::new(Cell::new(0));

        let weak = Rc::downgrade(&bus);
        let hits = Rc::clone(&late_hits);
        bus.subscribe(PING, move |_| {
            if let Some(bus) = weak.upgrade() {
                let hits = Rc::clone(&hits);
                bus.subscribe(PING, move |_| {
                    hits.set(hits.get() + 1);
                    Ok(())
                });
            }
            Ok(())
        });

        let first = bus.emit(&TestEvent::Ping(1));
        assert_eq!(first.invoked, 1);
        assert_eq!(late_hits.get(), 0, "late subscriber must not see the publish that added it");

        bus.emit(&TestEvent::Ping(2));
        assert_eq!(late_hits.get(), 1);
    }

    #[test]
    fn test_unsubscribe_during_publish_still_delivers_current_call() {
        let bus = Rc::new(EventBus::<TestEvent>::new());
        let second_hits = Rc::new(Cell::new(0));
        let second_id = Rc::new(Cell::new(None));

        let weak = Rc::downgrade(&bus);
        let target = Rc::clone(&second_id);
        bus.subscribe(PING, move |_| {
            if let (Some(bus), Some(id)) = (weak.upgrade(), target.get()) {
                assert!(bus.unsubscribe(id));
            }
            Ok(())
        });
        let hits = Rc::clone(&second_hits);
        let id = bus.subscribe(PING, move |_| {
            hits.set(hits.get() + 1);
            Ok(())
        });
        second_id.set(Some(id));

        bus.emit(&TestEvent::Ping(1));
        assert_eq!(second_hits.get(), 1);
        bus.emit(&TestEvent::Ping(2));
        assert_eq!(second_hits.get(), 1);
    }

    #[test]
    fn test_nested_publish_on_other_topic() {
        let bus = Rc::new(EventBus::<TestEvent>::new());
        let (log, handle) = recorder();

        let weak = Rc::downgrade(&bus);
        let l = handle("ping");
        bus.subscribe(PING, move |e| {
            l.borrow_mut().push(format!("ping:{e:?}"));
            if let (Some(bus), TestEvent::Ping(n)) = (weak.upgrade(), e) {
                bus.emit(&TestEvent::Pong(*n));
            }
            Ok(())
        });
        let l = handle("pong");
        bus.subscribe(PONG, move |e| {
            l.borrow_mut().push(format!("pong:{e:?}"));
            Ok(())
        });

        bus.emit(&TestEvent::Ping(3));
        assert_eq!(*log.borrow(), vec!["ping:Ping(3)", "pong:Pong(3)"]);
    }
}
