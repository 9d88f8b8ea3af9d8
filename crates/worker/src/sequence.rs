//! Ordered task queues
//!
//! A sequence runs its tasks one at a time, in the order they were added.
//! Different sequences may run concurrently on different workers.

use crate::pool::PoolShared;
use crate::task::{FnTask, Task};
use parking_lot::{Condvar, Mutex, MutexGuard};
use recache_core::Variable;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub(crate) struct SequenceState {
    queue: VecDeque<Box<dyn Task>>,
    /// A worker has taken a task from this sequence and not yet come back
    active: bool,
    shutting_down: bool,
    /// Return to the pool's free list once the queue drains
    release_when_idle: bool,
    queue_size: Option<Arc<Variable>>,
    max_queue_size: usize,
}

impl SequenceState {
    pub(crate) fn is_busy(&self) -> bool {
        self.active || !self.queue.is_empty()
    }

    fn adjust_queue_size(&self, delta: i64) {
        if let Some(var) = &self.queue_size {
            var.add(delta);
        }
    }
}

pub(crate) enum Next {
    Run(Box<dyn Task>),
    Idle { release: bool },
}

/// An ordered queue of tasks owned by a [`WorkerPool`](crate::WorkerPool)
pub struct Sequence {
    id: usize,
    state: Mutex<SequenceState>,
    idle: Condvar,
    pool: Weak<PoolShared>,
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Sequence")
            .field("id", &self.id)
            .field("queued", &state.queue.len())
            .field("active", &state.active)
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

impl Sequence {
    pub(crate) fn new(
        id: usize,
        pool: Weak<PoolShared>,
        queue_size: Option<Arc<Variable>>,
        max_queue_size: usize,
    ) -> Self {
        Self {
            id,
            state: Mutex::new(SequenceState {
                queue: VecDeque::new(),
                active: false,
                shutting_down: false,
                release_when_idle: false,
                queue_size,
                max_queue_size,
            }),
            idle: Condvar::new(),
            pool,
        }
    }

    /// Identifier, stable across recycling
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Queue `task` behind everything already added
    ///
    /// If the sequence is shutting down the task is cancelled on the calling
    /// thread instead.
    pub fn add(self: &Arc<Self>, task: Box<dyn Task>) {
        let mut state = self.state.lock();
        if state.shutting_down {
            drop(state);
            debug!(sequence = self.id, "Cancelling task added after shutdown");
            task.cancel();
            return;
        }

        let was_idle = !state.is_busy();
        state.queue.push_back(task);
        state.adjust_queue_size(1);

        let shed = if state.max_queue_size > 0 && state.queue.len() > state.max_queue_size {
            let oldest = state.queue.pop_front();
            if oldest.is_some() {
                state.adjust_queue_size(-1);
            }
            oldest
        } else {
            None
        };
        drop(state);

        if let Some(oldest) = shed {
            warn!(sequence = self.id, "Queue over threshold, dropping oldest task");
            oldest.cancel();
        }

        if was_idle {
            match self.pool.upgrade() {
                Some(pool) => pool.queue_sequence(Arc::clone(self)),
                None => {
                    warn!(sequence = self.id, "Pool is gone, cancelling queued work");
                    self.initiate_shut_down();
                }
            }
        }
    }

    /// Queue a closure
    pub fn add_fn(self: &Arc<Self>, run: impl FnOnce() + Send + 'static) {
        self.add(Box::new(FnTask::new(run)));
    }

    /// Cancel every task that has not started yet
    ///
    /// The sequence lock is released around each `cancel` so a cancel handler
    /// may add to this sequence without deadlocking.
    pub fn cancel_pending_tasks(&self) {
        let mut cancelled = 0usize;
        loop {
            let task = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(task) => {
                        state.adjust_queue_size(-1);
                        task
                    }
                    None => break,
                }
            };
            task.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            debug!(sequence = self.id, cancelled, "Cancelled pending tasks");
        }
    }

    /// Refuse new work and cancel queued work; a running task is left to
    /// finish
    pub fn initiate_shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.cancel_pending_tasks();
    }

    /// Block until the running task (if any) finishes
    ///
    /// Polls every `poll` and gives up after `max_polls` timeouts, returning
    /// false.
    pub fn wait_for_shut_down(&self, poll: Duration, max_polls: u32) -> bool {
        let mut state = self.state.lock();
        let mut polls = 0u32;
        while state.active {
            if polls >= max_polls {
                error!(
                    sequence = self.id,
                    polls, "Gave up waiting for a running task during shutdown"
                );
                return false;
            }
            if self.idle.wait_for(&mut state, poll).timed_out() && state.active {
                polls += 1;
                info!(sequence = self.id, polls, "Waiting for running task to finish");
            }
        }
        true
    }

    /// Whether a task is running or waiting
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state.lock().is_busy()
    }

    /// Number of tasks waiting to run
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether this sequence refuses new work
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SequenceState> {
        self.state.lock()
    }

    /// Pop the next task for a worker, or mark the sequence idle
    pub(crate) fn next_task(&self) -> Next {
        let mut state = self.state.lock();
        if let Some(task) = state.queue.pop_front() {
            state.active = true;
            state.adjust_queue_size(-1);
            return Next::Run(task);
        }
        state.active = false;
        let release = std::mem::take(&mut state.release_when_idle) && !state.shutting_down;
        self.idle.notify_all();
        Next::Idle { release }
    }

    /// Ask for recycling; true when the sequence is idle and may be recycled
    /// now, otherwise recycling happens when the worker finds it idle
    pub(crate) fn mark_released(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutting_down {
            return false;
        }
        if state.is_busy() {
            state.release_when_idle = true;
            false
        } else {
            true
        }
    }

    pub(crate) fn reset_for_reuse(&self) {
        self.state.lock().release_when_idle = false;
    }

    pub(crate) fn set_queue_size_stat(&self, var: Option<Arc<Variable>>) {
        self.state.lock().queue_size = var;
    }

    pub(crate) fn set_max_queue_size(&self, max_queue_size: usize) {
        self.state.lock().max_queue_size = max_queue_size;
    }
}
