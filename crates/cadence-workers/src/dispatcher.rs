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


//! Request/response correlation between the main context and the worker pool.

use crate::config::DispatcherConfig;
use crate::queue::PendingQueue;
use crate::worker::{CancelToken, WorkError, WorkRequest, Worker};
use cadence_core::error::panic_message;
use cadence_core::{
    DrainReport, ErrorKind, OverloadSignal, Priority, QueueDepths, QueueProbe, ScheduledTask,
    SubmitError, TaskDrain, TaskId, TaskPayload, TaskStatus, TaskSubmitter, WorkerResult,
};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Locks `mutex`, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    InFlight { worker: usize },
}

#[derive(Debug)]
struct Entry {
    task: ScheduledTask,
    stage: Stage,
    token: CancelToken,
}

/// Correlation table plus pending queue. An id is in `tasks` until it is
/// resolved; removal and result emission happen together under the lock.
#[derive(Debug, Default)]
struct Table {
    queue: PendingQueue,
    tasks: HashMap<TaskId, Entry>,
    shutting_down: bool,
}

impl Table {
    /// Ids of entries matching `filter`, in submission order.
    fn ids_where(&self, filter: impl Fn(&Entry) -> bool) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, entry)| filter(entry))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn in_flight(&self) -> usize {
        self.tasks
            .values()
            .filter(|entry| matches!(entry.stage, Stage::InFlight { .. }))
            .count()
    }
}

struct Shared {
    table: Mutex<Table>,
    work_ready: Condvar,
    resolved: Condvar,
    results: Sender<WorkerResult>,
    grace: Duration,
}

impl Shared {
    /// Removes `id` from the table and emits its one and only result.
    /// Returns `false` if it was already resolved.
    fn resolve(
        &self,
        table: &mut Table,
        id: TaskId,
        status: TaskStatus,
        output: Option<Vec<u8>>,
    ) -> bool {
        let Some(entry) = table.tasks.remove(&id) else {
            return false;
        };
        if entry.stage == Stage::Pending {
            table.queue.remove(id, entry.task.priority);
        }

        match status {
            TaskStatus::Completed => log::trace!("{} completed", id),
            TaskStatus::Timeout => {
                entry.token.cancel();
                log::warn!(
                    "{}: {} ({:?}) missed its deadline",
                    ErrorKind::WorkerTimeout,
                    id,
                    entry.task.priority
                );
            }
            TaskStatus::Error | TaskStatus::Cancelled => {
                entry.token.cancel();
                log::debug!("{} resolved as {:?}", id, status);
            }
        }

        // The receiver lives as long as the dispatcher; a failed send means
        // nobody is left to observe the result.
        let _ = self.results.send(WorkerResult::new(id, status, output));
        self.resolved.notify_all();
        true
    }

    /// Blocks a pool thread until there is work or the pool stops.
    fn next_job(&self, worker: usize) -> Option<(WorkRequest, CancelToken)> {
        let mut table = lock(&self.table);
        loop {
            while let Some(id) = table.queue.pop() {
                let now = Instant::now();
                let Some(entry) = table.tasks.get_mut(&id) else {
                    continue;
                };
                if entry.task.is_expired(now) {
                    self.resolve(&mut table, id, TaskStatus::Timeout, None);
                    continue;
                }

                entry.stage = Stage::InFlight { worker };
                let payload = std::mem::take(&mut entry.task.payload);
                let request = WorkRequest {
                    id,
                    kind: payload.kind,
                    payload: payload.data,
                    deadline_ms: entry.task.deadline.saturating_duration_since(now).as_millis() as u64,
                };
                return Some((request, entry.token.clone()));
            }

            if table.shutting_down {
                return None;
            }
            table = self
                .work_ready
                .wait(table)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Records what a worker produced for `id`, unless the task was already
    /// resolved by a sweep, a cancellation or shutdown.
    fn complete(&self, id: TaskId, outcome: Result<Vec<u8>, WorkError>) {
        let mut table = lock(&self.table);
        let Some(entry) = table.tasks.get(&id) else {
            log::trace!("discarding late output of {}", id);
            return;
        };

        let (status, output) = if entry.token.is_cancelled() {
            (TaskStatus::Cancelled, None)
        } else if Instant::now() >= entry.task.deadline + self.grace {
            (TaskStatus::Timeout, None)
        } else {
            match outcome {
                Ok(bytes) => (TaskStatus::Completed, Some(bytes)),
                Err(err) => {
                    log::warn!("{} failed: {}", id, err);
                    (TaskStatus::Error, None)
                }
            }
        };
        self.resolve(&mut table, id, status, output);
    }

    /// Resolves pending tasks past their deadline and in-flight tasks past
    /// their deadline plus grace.
    fn sweep(&self, now: Instant) -> usize {
        let mut table = lock(&self.table);
        let grace = self.grace;
        let overdue = table.ids_where(|entry| match entry.stage {
            Stage::Pending => entry.task.is_expired(now),
            Stage::InFlight { .. } => now >= entry.task.deadline + grace,
        });
        for &id in &overdue {
            let status = if table.tasks[&id].token.is_cancelled() {
                TaskStatus::Cancelled
            } else {
                TaskStatus::Timeout
            };
            self.resolve(&mut table, id, status, None);
        }
        overdue.len()
    }

    /// Marks every task held by a dead worker as `Error`.
    fn fail_worker(&self, worker: usize) -> usize {
        let mut table = lock(&self.table);
        let held = table.ids_where(|entry| entry.stage == Stage::InFlight { worker });
        for &id in &held {
            self.resolve(&mut table, id, TaskStatus::Error, None);
        }
        held.len()
    }

    /// Resolves everything left in the table as `Cancelled`.
    fn cancel_all(&self, table: &mut Table) -> usize {
        let ids = table.ids_where(|_| true);
        for &id in &ids {
            self.resolve(table, id, TaskStatus::Cancelled, None);
        }
        ids.len()
    }
}

fn spawn_worker(
    index: usize,
    shared: &Arc<Shared>,
    worker: &Arc<dyn Worker>,
) -> io::Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    let worker = Arc::clone(worker);
    thread::Builder::new()
        .name(format!("cadence-worker-{index}"))
        .spawn(move || {
            log::debug!("cadence-worker-{} started", index);
            while let Some((request, token)) = shared.next_job(index) {
                let outcome = worker.run(&request, &token);
                shared.complete(request.id, outcome);
            }
            log::debug!("cadence-worker-{} stopped", index);
        })
}

/// Asynchronous task dispatcher backed by a fixed pool of worker threads.
///
/// `submit` and `cancel` never block on workers. Results are buffered in a
/// channel and only become visible through [`poll`](Self::poll), so the main
/// context observes them at a single point per tick. Every task id is
/// resolved exactly once as `Completed`, `Timeout`, `Error` or `Cancelled`.
///
/// Deadlines are enforced at submission, when a worker picks the task up,
/// and by the sweep that runs in [`housekeeping`](Self::housekeeping).
pub struct WorkerTaskDispatcher {
    shared: Arc<Shared>,
    worker: Arc<dyn Worker>,
    handles: Mutex<Vec<Option<JoinHandle<()>>>>,
    results: Receiver<WorkerResult>,
    overload: OverloadSignal,
    next_id: AtomicU64,
    max_pending: usize,
}

impl WorkerTaskDispatcher {
    /// Starts the pool. Low priority submissions are shed while `overload`
    /// is raised.
    pub fn new(
        config: &DispatcherConfig,
        worker: Arc<dyn Worker>,
        overload: OverloadSignal,
    ) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            table: Mutex::new(Table::default()),
            work_ready: Condvar::new(),
            resolved: Condvar::new(),
            results: tx,
            grace: config.deadline_grace(),
        });

        let count = config.worker_count.max(1);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            match spawn_worker(index, &shared, &worker) {
                Ok(handle) => handles.push(Some(handle)),
                Err(err) => {
                    lock(&shared.table).shutting_down = true;
                    shared.work_ready.notify_all();
                    return Err(err);
                }
            }
        }
        log::info!("worker pool started with {} thread(s)", count);

        Ok(Self {
            shared,
            worker,
            handles: Mutex::new(handles),
            results: rx,
            overload,
            next_id: AtomicU64::new(1),
            max_pending: config.max_pending,
        })
    }

    /// Drains every result that arrived since the previous poll.
    ///
    /// Runs [`housekeeping`](Self::housekeeping) first so overdue tasks and
    /// tasks held by crashed workers are included.
    pub fn poll(&self) -> Vec<WorkerResult> {
        self.housekeeping();
        self.results.try_iter().collect()
    }

    /// Reaps crashed workers and enforces deadlines. Never blocks on workers
    /// and never makes results visible; returns the number of tasks resolved.
    pub fn housekeeping(&self) -> usize {
        self.reap_crashed() + self.shared.sweep(Instant::now())
    }

    /// Number of pool threads.
    pub fn worker_count(&self) -> usize {
        lock(&self.handles).len()
    }

    /// Returns `true` once a drain or drop has started.
    pub fn is_shutting_down(&self) -> bool {
        lock(&self.shared.table).shutting_down
    }

    fn reap_crashed(&self) -> usize {
        if self.is_shutting_down() {
            return 0;
        }

        let mut handles = lock(&self.handles);
        let mut lost = 0;
        for (index, slot) in handles.iter_mut().enumerate() {
            if !slot.as_ref().is_some_and(JoinHandle::is_finished) {
                continue;
            }
            let Some(handle) = slot.take() else {
                continue;
            };

            let reason = match handle.join() {
                Ok(()) => "exited".to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            let failed = self.shared.fail_worker(index);
            lost += failed;
            log::warn!(
                "{}: cadence-worker-{} died ({}); {} task(s) marked Error",
                ErrorKind::WorkerCrash,
                index,
                reason,
                failed
            );

            match spawn_worker(index, &self.shared, &self.worker) {
                Ok(handle) => *slot = Some(handle),
                Err(err) => log::error!("failed to respawn cadence-worker-{}: {}", index, err),
            }
        }
        lost
    }
}

impl TaskSubmitter for WorkerTaskDispatcher {
    fn submit(
        &self,
        payload: TaskPayload,
        priority: Priority,
        deadline: Instant,
    ) -> Result<TaskId, SubmitError> {
        let mut table = lock(&self.shared.table);
        if table.shutting_down {
            return Err(SubmitError::ShuttingDown);
        }
        if priority == Priority::Low && self.overload.is_raised() {
            log::debug!("backpressure: shedding Low task `{}`", payload.kind);
            return Err(SubmitError::Backpressure { priority });
        }

        let now = Instant::now();
        let expired = now >= deadline;
        if !expired && table.queue.len() >= self.max_pending {
            if priority == Priority::Low {
                return Err(SubmitError::QueueFull {
                    capacity: self.max_pending,
                });
            }
            match table.queue.pop_oldest(Priority::Low) {
                Some(evicted) => {
                    log::warn!("pending queue full: evicting {} for a {:?} task", evicted, priority);
                    self.shared
                        .resolve(&mut table, evicted, TaskStatus::Cancelled, None);
                }
                None => log::debug!("admitting {:?} task above the pending cap", priority),
            }
        }

        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        table.tasks.insert(
            id,
            Entry {
                task: ScheduledTask {
                    id,
                    priority,
                    deadline,
                    payload,
                },
                stage: Stage::Pending,
                token: CancelToken::new(),
            },
        );

        if expired {
            // Resolved without ever reaching a worker.
            self.shared.resolve(&mut table, id, TaskStatus::Timeout, None);
        } else {
            table.queue.push(id, priority);
            self.shared.work_ready.notify_one();
        }
        Ok(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut table = lock(&self.shared.table);
        let Some(entry) = table.tasks.get(&id) else {
            return false;
        };
        let stage = entry.stage;
        match stage {
            Stage::Pending => self.shared.resolve(&mut table, id, TaskStatus::Cancelled, None),
            Stage::InFlight { .. } => {
                // Best effort: the worker may still finish, its output is
                // reported as Cancelled.
                entry.token.cancel();
                true
            }
        }
    }
}

impl QueueProbe for WorkerTaskDispatcher {
    fn queue_depths(&self) -> QueueDepths {
        let table = lock(&self.shared.table);
        QueueDepths {
            pending: table.queue.len(),
            in_flight: table.in_flight(),
            ready: self.results.len(),
        }
    }
}

impl TaskDrain for WorkerTaskDispatcher {
    fn drain(&self, grace: Duration) -> DrainReport {
        let give_up_at = Instant::now() + grace;
        let mut report = DrainReport::default();
        let mut table = lock(&self.shared.table);
        table.shutting_down = true;

        let doomed = table.ids_where(|entry| entry.task.priority != Priority::Critical);
        for id in doomed {
            if self.shared.resolve(&mut table, id, TaskStatus::Cancelled, None) {
                report.cancelled += 1;
            }
        }
        let critical = table.tasks.len();
        // Idle workers exit once the remaining critical work is picked up.
        self.shared.work_ready.notify_all();

        while !table.tasks.is_empty() {
            let now = Instant::now();
            if now >= give_up_at {
                break;
            }
            table = self
                .shared
                .resolved
                .wait_timeout(table, give_up_at - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        report.forced = self.shared.cancel_all(&mut table);
        report.settled = critical - report.forced;
        log::info!(
            "drained worker pool: {} cancelled, {} critical settled, {} forced",
            report.cancelled,
            report.settled,
            report.forced
        );
        report
    }
}

impl Drop for WorkerTaskDispatcher {
    fn drop(&mut self) {
        {
            let mut table = lock(&self.shared.table);
            table.shutting_down = true;
            self.shared.cancel_all(&mut table);
        }
        self.shared.work_ready.notify_all();

        let handles = self
            .handles
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for handle in handles.drain(..).flatten() {
            // A worker that panicked has already been accounted for.
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for WorkerTaskDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerTaskDispatcher")
            .field("depths", &self.queue_depths())
            .field("max_pending", &self.max_pending)
            .field("overloaded", &self.overload.is_raised())
            .finish_non_exhaustive()
    }
}
