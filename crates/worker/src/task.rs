//! Units of work

/// A unit of work queued on a [`Sequence`](crate::Sequence)
///
/// Exactly one of `run` or `cancel` is called, after which the task is
/// dropped. `cancel` is called only for tasks that never started.
pub trait Task: Send {
    /// Do the work
    fn run(self: Box<Self>);

    /// Give up without running, e.g. because the pool is shutting down
    fn cancel(self: Box<Self>) {}
}

type Callback = Box<dyn FnOnce() + Send>;

/// A task built from closures
pub struct FnTask {
    run: Callback,
    cancel: Option<Callback>,
}

impl FnTask {
    /// Task that runs `run` and does nothing when cancelled
    pub fn new(run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            run: Box::new(run),
            cancel: None,
        }
    }

    /// Task that runs `run`, or `cancel` if it never gets to start
    pub fn with_cancel(
        run: impl FnOnce() + Send + 'static,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            run: Box::new(run),
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl std::fmt::Debug for FnTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask")
            .field("has_cancel", &self.cancel.is_some())
            .finish()
    }
}

impl Task for FnTask {
    fn run(self: Box<Self>) {
        (self.run)();
    }

    fn cancel(self: Box<Self>) {
        if let Some(cancel) = self.cancel {
            cancel();
        }
    }
}
