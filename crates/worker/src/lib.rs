//! Ordered task scheduling on a bounded thread pool
//!
//! - [`Task`]: a unit of work with `run` and `cancel`
//! - [`Sequence`]: a FIFO of tasks, executed one at a time in order
//! - [`WorkerPool`]: at most N threads shared by any number of sequences
//!
//! ```rust,no_run
//! use recache_worker::WorkerPool;
//!
//! let pool = WorkerPool::new(4, "rewrite");
//! if let Some(sequence) = pool.new_sequence() {
//!     sequence.add_fn(|| println!("first"));
//!     sequence.add_fn(|| println!("second, never before first"));
//! }
//! pool.shut_down();
//! ```

mod pool;
mod sequence;
mod task;

pub use pool::WorkerPool;
pub use sequence::Sequence;
pub use task::{FnTask, Task};
