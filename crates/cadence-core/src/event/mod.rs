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

//! Provides the synchronous event bus used for all cross-component signaling.
//!
//! The [`EventBus`] is generic over its event type so that embedders can run
//! their own buses. The scheduling core itself speaks [`RuntimeEvent`] on the
//! well-known [`topics`].

mod bus;
mod runtime;

pub use self::bus::{BusEvent, DeliveryReport, EventBus, SubscriptionId, Topic};
pub use self::runtime::{topics, RuntimeEvent};
