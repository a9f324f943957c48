//! Task executor abstraction.
//!
//! The dispatch engine never spawns threads itself. Every unit of work
//! (processing one connection, or one accept burst in two-phase mode) is
//! packaged as a [`Task`] closure and handed to an `Executor` chosen once
//! at the composition root.
//!
//! # Implementors
//!
//! - `FixedPool` (portico-module): N OS threads sharing a bounded
//!   lock-free queue.
//! - `ThreadPerTask` (portico-module): one named OS thread per task.
//! - `InlineExecutor` (portico-module, testing): runs the task in the
//!   caller. Only for unit tests, it blocks the dispatcher!

use std::sync::Arc;

use crate::error::SubmitError;

/// A unit of work: runs exactly once on some executor thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted tasks asynchronously.
///
/// **Contract:**
/// - `submit()` must not wait for the task to finish.
/// - A rejected task is dropped before `submit()` returns, which releases
///   everything it captured (connection, admission guard).
/// - A task that panics must not take the executor down with it.
pub trait Executor: Send + Sync {
    /// Submit a task for execution.
    fn submit(&self, task: Task) -> Result<(), SubmitError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        (**self).submit(task)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
