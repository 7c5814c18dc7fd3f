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

//! Shared overload flag between the budget allocator and the dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A flag raised by the budget allocator while the runtime is overloaded.
///
/// Clones observe the same flag. The allocator is the only writer; the
/// dispatcher reads it at submission time to shed `Low` priority work.
#[derive(Debug, Clone, Default)]
pub struct OverloadSignal(Arc<AtomicBool>);

impl OverloadSignal {
    /// Creates a lowered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag.
    pub fn set(&self, overloaded: bool) {
        self.0.store(overloaded, Ordering::Release);
    }

    /// Returns `true` while the runtime is overloaded.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let signal = OverloadSignal::new();
        let reader = signal.clone();
        assert!(!reader.is_raised());
        signal.set(true);
        assert!(reader.is_raised());
        signal.set(false);
        assert!(!reader.is_raised());
    }
}
