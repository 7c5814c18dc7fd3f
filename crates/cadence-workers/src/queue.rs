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


//! Pending queue: one FIFO lane per priority.

use cadence_core::{Priority, TaskId};
use std::collections::VecDeque;

const LANES: usize = 3;

fn lane(priority: Priority) -> usize {
    match priority {
        Priority::Critical => 0,
        Priority::Normal => 1,
        Priority::Low => 2,
    }
}

/// Tasks waiting for a worker, served highest priority first, FIFO within a
/// priority.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    lanes: [VecDeque<TaskId>; LANES],
}

impl PendingQueue {
    pub(crate) fn push(&mut self, id: TaskId, priority: Priority) {
        self.lanes[lane(priority)].push_back(id);
    }

    pub(crate) fn pop(&mut self) -> Option<TaskId> {
        self.lanes.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Removes the oldest queued task of `priority`.
    pub(crate) fn pop_oldest(&mut self, priority: Priority) -> Option<TaskId> {
        self.lanes[lane(priority)].pop_front()
    }

    pub(crate) fn remove(&mut self, id: TaskId, priority: Priority) -> bool {
        let lane = &mut self.lanes[lane(priority)];
        let before = lane.len();
        lane.retain(|queued| *queued != id);
        lane.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_serves_priority_then_fifo() {
        let mut queue = PendingQueue::default();
        queue.push(TaskId::new(1), Priority::Low);
        queue.push(TaskId::new(2), Priority::Normal);
        queue.push(TaskId::new(3), Priority::Critical);
        queue.push(TaskId::new(4), Priority::Normal);

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(TaskId::get).collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_and_pop_oldest() {
        let mut queue = PendingQueue::default();
        queue.push(TaskId::new(1), Priority::Low);
        queue.push(TaskId::new(2), Priority::Low);
        queue.push(TaskId::new(3), Priority::Low);

        assert!(queue.remove(TaskId::new(2), Priority::Low));
        assert!(!queue.remove(TaskId::new(2), Priority::Low));
        assert_eq!(queue.pop_oldest(Priority::Low), Some(TaskId::new(1)));
        assert_eq!(queue.len(), 1);
    }
}
