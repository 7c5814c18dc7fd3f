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


//! Stand-in phases and worker that generate a steady, tunable load.

use cadence_sdk::prelude::*;
use std::thread;
use std::time::{Duration, Instant};

/// Kind of the UI-issued task: reverses its payload.
pub const PATH_KIND: &str = "path";
/// Kind of the simulation-issued task: sums its payload.
pub const THINK_KIND: &str = "think";

const PATH_EVERY: u64 = 10;
const THINK_EVERY: u64 = 3;

fn busy(ms: f64) {
    if ms > 0.0 {
        thread::sleep(Duration::from_secs_f64(ms / 1000.0));
    }
}

fn submit(ctx: &PhaseContext<'_>, kind: &str, priority: Priority, deadline_ms: u64) {
    let payload = TaskPayload::new(kind, ctx.frame.index.to_le_bytes());
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    if let Err(err) = ctx.tasks.submit(payload, priority, deadline) {
        log::debug!("frame {}: {} task not submitted: {}", ctx.frame.index, kind, err);
    }
}

/// UI phase: sleeps `work_ms` and asks for a path every few frames.
pub fn ui_phase(work_ms: f64) -> impl Phase {
    phase_fn(move |ctx| {
        busy(work_ms);
        if ctx.frame.index % PATH_EVERY == 0 {
            submit(ctx, PATH_KIND, Priority::Normal, 200);
        }
        Ok(())
    })
}

/// Simulation phase: sleeps `work_ms` and queues low-priority thinking.
pub fn simulation_phase(work_ms: f64) -> impl Phase {
    phase_fn(move |ctx| {
        busy(work_ms);
        if ctx.frame.index % THINK_EVERY == 0 {
            submit(ctx, THINK_KIND, Priority::Low, 50);
        }
        Ok(())
    })
}

/// Worker serving the two synthetic task kinds.
#[derive(Debug, Clone)]
pub struct SyntheticWorker {
    /// Simulated work per task.
    pub work: Duration,
}

impl Default for SyntheticWorker {
    fn default() -> Self {
        Self {
            work: Duration::from_millis(4),
        }
    }
}

impl Worker for SyntheticWorker {
    fn run(&self, request: &WorkRequest, cancel: &CancelToken) -> Result<Vec<u8>, WorkError> {
        // Sliced so cancellation is noticed mid-task.
        let slice = Duration::from_millis(1);
        let mut spent = Duration::ZERO;
        while spent < self.work {
            if cancel.is_cancelled() {
                return Err(WorkError::Failed("cancelled".into()));
            }
            thread::sleep(slice);
            spent += slice;
        }

        match request.kind.as_str() {
            PATH_KIND => Ok(request.payload.iter().rev().copied().collect()),
            THINK_KIND => {
                let sum: u64 = request.payload.iter().map(|&b| u64::from(b)).sum();
                Ok(sum.to_le_bytes().to_vec())
            }
            other => Err(WorkError::UnsupportedKind(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: &str, payload: Vec<u8>) -> WorkRequest {
        WorkRequest {
            id: cadence_core::TaskId::new(1),
            kind: kind.to_owned(),
            payload,
            deadline_ms: 100,
        }
    }

    #[test]
    fn test_worker_serves_both_kinds() {
        let worker = SyntheticWorker {
            work: Duration::ZERO,
        };
        let token = CancelToken::new();

        let path = worker.run(&request(PATH_KIND, vec![1, 2, 3]), &token).unwrap();
        assert_eq!(path, vec![3, 2, 1]);

        let think = worker.run(&request(THINK_KIND, vec![1, 2, 3]), &token).unwrap();
        assert_eq!(think, 6u64.to_le_bytes().to_vec());

        let err = worker.run(&request("fly", Vec::new()), &token).unwrap_err();
        assert!(matches!(err, WorkError::UnsupportedKind(kind) if kind == "fly"));
    }

    #[test]
    fn test_worker_stops_when_cancelled() {
        let worker = SyntheticWorker {
            work: Duration::from_secs(10),
        };
        let token = CancelToken::new();
        token.cancel();
        assert!(worker.run(&request(PATH_KIND, vec![1]), &token).is_err());
    }
}
