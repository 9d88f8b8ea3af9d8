//! Bounded pool of worker threads
//!
//! The pool mutex guards only pool bookkeeping (workers, pending and free
//! sequences). Each sequence guards its own queue, so a busy sequence never
//! contends with unrelated pool operations. A sequence always releases its
//! own lock before calling into the pool.

use crate::sequence::{Next, Sequence};
use parking_lot::Mutex;
use recache_core::{Variable, WorkerPoolConfig};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

struct Worker {
    sender: Option<Sender<Arc<Sequence>>>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct PoolState {
    shutting_down: bool,
    workers: Vec<Worker>,
    available_workers: Vec<usize>,
    queued_sequences: VecDeque<Arc<Sequence>>,
    free_sequences: Vec<Arc<Sequence>>,
    all_sequences: Vec<Arc<Sequence>>,
    next_sequence_id: usize,
    queue_size: Option<Arc<Variable>>,
    load_shedding_threshold: usize,
}

pub(crate) struct PoolShared {
    name: String,
    max_workers: usize,
    shutdown_poll: Duration,
    shutdown_max_polls: u32,
    state: Mutex<PoolState>,
}

impl PoolShared {
    /// Hand a sequence with fresh work to a worker, or park it until one
    /// frees up
    pub(crate) fn queue_sequence(self: &Arc<Self>, sequence: Arc<Sequence>) {
        let mut state = self.state.lock();
        if state.shutting_down {
            drop(state);
            sequence.initiate_shut_down();
            return;
        }

        let mut sequence = sequence;
        while let Some(index) = state.available_workers.pop() {
            let Some(sender) = state.workers[index].sender.as_ref() else {
                continue;
            };
            match sender.send(sequence) {
                Ok(()) => return,
                Err(mpsc::SendError(returned)) => {
                    warn!(pool = %self.name, worker = index, "Idle worker has exited");
                    sequence = returned;
                }
            }
        }

        if state.workers.len() < self.max_workers {
            let index = state.workers.len();
            let (sender, receiver) = mpsc::channel();
            let shared = Arc::clone(self);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", self.name))
                .spawn(move || shared.run_worker(index, receiver));
            match spawned {
                Ok(handle) => {
                    debug!(pool = %self.name, worker = index, "Started worker");
                    // The receiver lives in the new thread, so the send cannot fail
                    let _ = sender.send(sequence);
                    state.workers.push(Worker {
                        sender: Some(sender),
                        handle: Some(handle),
                    });
                    return;
                }
                Err(e) => {
                    error!(pool = %self.name, error = %e, "Failed to start worker thread");
                }
            }
        }

        state.queued_sequences.push_back(sequence);
    }

    fn run_worker(self: Arc<Self>, index: usize, receiver: Receiver<Arc<Sequence>>) {
        while let Ok(first) = receiver.recv() {
            let mut sequence = first;
            loop {
                self.run_sequence(&sequence);
                match self.next_sequence(index) {
                    Some(next) => sequence = next,
                    None => break,
                }
            }
        }
        debug!(pool = %self.name, worker = index, "Worker exiting");
    }

    /// Run tasks until the sequence's queue is empty. No lock is held while
    /// a task runs.
    fn run_sequence(&self, sequence: &Arc<Sequence>) {
        loop {
            match sequence.next_task() {
                Next::Run(task) => {
                    if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
                        error!(pool = %self.name, sequence = sequence.id(), "Task panicked");
                    }
                }
                Next::Idle { release } => {
                    if release {
                        self.sequence_no_longer_active(sequence);
                    }
                    return;
                }
            }
        }
    }

    /// Give a finished worker the next parked sequence, or mark it idle
    fn next_sequence(&self, index: usize) -> Option<Arc<Sequence>> {
        let mut state = self.state.lock();
        if !state.shutting_down
            && let Some(sequence) = state.queued_sequences.pop_front()
        {
            return Some(sequence);
        }
        state.available_workers.push(index);
        None
    }

    /// Put an idle, released sequence on the free list
    pub(crate) fn sequence_no_longer_active(&self, sequence: &Arc<Sequence>) {
        let mut state = self.state.lock();
        if state.shutting_down
            || state
                .free_sequences
                .iter()
                .any(|s| Arc::ptr_eq(s, sequence))
        {
            return;
        }
        state.free_sequences.push(Arc::clone(sequence));
    }
}

/// A bounded set of worker threads executing [`Sequence`]s
///
/// Tasks within one sequence run in submission order and never overlap.
/// Nothing is promised about ordering across sequences.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("max_workers", &self.shared.max_workers)
            .field("workers", &state.workers.len())
            .field("available_workers", &state.available_workers.len())
            .field("queued_sequences", &state.queued_sequences.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool that runs at most `max_workers` threads (at least one)
    #[must_use]
    pub fn new(max_workers: usize, name: impl Into<String>) -> Self {
        Self::from_config(&WorkerPoolConfig {
            max_workers,
            name: name.into(),
            ..WorkerPoolConfig::default()
        })
    }

    /// Create a pool from configuration
    #[must_use]
    pub fn from_config(config: &WorkerPoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: config.name.clone(),
                max_workers: config.max_workers.max(1),
                shutdown_poll: Duration::from_millis(config.shutdown_poll_ms),
                shutdown_max_polls: config.shutdown_max_polls,
                state: Mutex::new(PoolState {
                    load_shedding_threshold: config.load_shedding_threshold,
                    ..PoolState::default()
                }),
            }),
        }
    }

    /// A sequence to queue work on, recycled when possible
    ///
    /// Returns `None` once the pool is shutting down.
    #[must_use]
    pub fn new_sequence(&self) -> Option<Arc<Sequence>> {
        let mut state = self.shared.state.lock();
        if state.shutting_down {
            return None;
        }
        if let Some(sequence) = state.free_sequences.pop() {
            sequence.reset_for_reuse();
            return Some(sequence);
        }
        let id = state.next_sequence_id;
        state.next_sequence_id += 1;
        let sequence = Arc::new(Sequence::new(
            id,
            Arc::downgrade(&self.shared),
            state.queue_size.clone(),
            state.load_shedding_threshold,
        ));
        state.all_sequences.push(Arc::clone(&sequence));
        Some(sequence)
    }

    /// Return a sequence for reuse by a later [`new_sequence`](Self::new_sequence)
    ///
    /// If the sequence still has work, it is recycled once that work drains.
    /// The caller must not add to it afterwards.
    pub fn free_sequence(&self, sequence: &Arc<Sequence>) {
        if sequence.mark_released() {
            self.shared.sequence_no_longer_active(sequence);
        }
    }

    /// Whether any of `sequences` has running or queued work
    ///
    /// Every sequence lock is taken, in address order, before answering.
    #[must_use]
    pub fn are_busy(sequences: &[Arc<Sequence>]) -> bool {
        let mut ordered: Vec<&Arc<Sequence>> = sequences.iter().collect();
        ordered.sort_by_key(|s| Arc::as_ptr(*s) as usize);
        ordered.dedup_by(|a, b| Arc::ptr_eq(*a, *b));
        let states: Vec<_> = ordered.iter().map(|s| s.lock_state()).collect();
        states.iter().any(|state| state.is_busy())
    }

    /// Track the number of queued tasks across all sequences in `var`
    pub fn set_queue_size_stat(&self, var: Arc<Variable>) {
        let sequences = {
            let mut state = self.shared.state.lock();
            state.queue_size = Some(Arc::clone(&var));
            state.all_sequences.clone()
        };
        for sequence in sequences {
            sequence.set_queue_size_stat(Some(Arc::clone(&var)));
        }
    }

    /// Cancel the oldest queued task of a sequence once it holds more than
    /// `threshold` tasks; 0 disables shedding
    pub fn set_load_shedding_threshold(&self, threshold: usize) {
        let sequences = {
            let mut state = self.shared.state.lock();
            state.load_shedding_threshold = threshold;
            state.all_sequences.clone()
        };
        for sequence in sequences {
            sequence.set_max_queue_size(threshold);
        }
    }

    /// Stop accepting work and cancel everything not yet started
    pub fn initiate_shut_down(&self) {
        let sequences = {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.queued_sequences.clear();
            state.all_sequences.clone()
        };
        debug!(pool = %self.shared.name, sequences = sequences.len(), "Shutting down");
        for sequence in &sequences {
            sequence.initiate_shut_down();
        }
    }

    /// Wait for running tasks to finish, then stop the workers
    pub fn wait_for_shut_down(&self) {
        let sequences = self.shared.state.lock().all_sequences.clone();
        let mut all_idle = true;
        for sequence in &sequences {
            all_idle &=
                sequence.wait_for_shut_down(self.shared.shutdown_poll, self.shared.shutdown_max_polls);
        }

        let workers = {
            let mut state = self.shared.state.lock();
            state.available_workers.clear();
            std::mem::take(&mut state.workers)
        };
        // Dropping the senders lets idle workers fall out of their loop
        let handles: Vec<JoinHandle<()>> = workers
            .into_iter()
            .filter_map(|mut worker| {
                worker.sender.take();
                worker.handle.take()
            })
            .collect();

        if all_idle {
            let current = thread::current().id();
            for handle in handles {
                if handle.thread().id() == current {
                    continue;
                }
                if handle.join().is_err() {
                    error!(pool = %self.shared.name, "Worker thread panicked");
                }
            }
        } else {
            warn!(
                pool = %self.shared.name,
                workers = handles.len(),
                "Detaching workers that are still running tasks"
            );
        }

        let mut state = self.shared.state.lock();
        state.free_sequences.clear();
        state.all_sequences.clear();
    }

    /// Shut down and wait; idempotent
    pub fn shut_down(&self) {
        self.initiate_shut_down();
        self.wait_for_shut_down();
    }

    /// Whether shutdown has begun
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }

    /// Configured worker cap
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    /// Worker threads started so far
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.shared.state.lock().workers.len()
    }

    /// Sequences waiting for a worker
    #[must_use]
    pub fn num_queued_sequences(&self) -> usize {
        self.shared.state.lock().queued_sequences.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shut_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;

    #[test]
    fn test_new_sequence_after_shutdown_is_none() {
        let pool = WorkerPool::new(2, "test");
        assert!(pool.new_sequence().is_some());
        pool.shut_down();
        assert!(pool.new_sequence().is_none());
        // Idempotent
        pool.shut_down();
    }

    #[test]
    fn test_workers_created_on_demand_up_to_cap() {
        let pool = WorkerPool::new(2, "test");
        assert_eq!(pool.num_workers(), 0);

        let (release_tx, release_rx) = channel::<()>();
        let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));
        let (started_tx, started_rx) = channel::<()>();
        let mut sequences = Vec::new();
        for _ in 0..3 {
            let seq = pool.new_sequence().unwrap();
            let rx = Arc::clone(&release_rx);
            let started = started_tx.clone();
            seq.add_fn(move || {
                let _ = started.send(());
                let _ = rx.lock().recv();
            });
            sequences.push(seq);
        }

        started_rx.recv().unwrap();
        started_rx.recv().unwrap();
        assert_eq!(pool.num_workers(), 2);
        assert_eq!(pool.num_queued_sequences(), 1);

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        started_rx.recv().unwrap();
        pool.shut_down();
        assert!(!WorkerPool::are_busy(&sequences));
    }

    #[test]
    fn test_free_sequence_is_recycled() {
        let pool = WorkerPool::new(1, "test");
        let seq = pool.new_sequence().unwrap();
        let id = seq.id();
        pool.free_sequence(&seq);
        let again = pool.new_sequence().unwrap();
        assert_eq!(again.id(), id);
        let fresh = pool.new_sequence().unwrap();
        assert_ne!(fresh.id(), id);
    }

    #[test]
    fn test_panicking_task_does_not_wedge_sequence() {
        let pool = WorkerPool::new(1, "test");
        let seq = pool.new_sequence().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = channel();
        seq.add_fn(|| std::panic::panic_any("boom"));
        let c = Arc::clone(&count);
        seq.add_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        });
        done_rx.recv().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
