//! `ThreadPerTask` and `InlineExecutor`: the simplest executors.

use portico_core::error::SubmitError;
use portico_core::executor::{Executor, Task};

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

/// Spawns one named OS thread per task.
///
/// Concurrency is bounded by the server's admission gate, not here.
pub struct ThreadPerTask {
    prefix: String,
    stack_size: Option<usize>,
    spawned: AtomicU64,
}

impl ThreadPerTask {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            stack_size: None,
            spawned: AtomicU64::new(0),
        }
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Threads spawned so far.
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Default for ThreadPerTask {
    fn default() -> Self {
        Self::new("portico-handler")
    }
}

impl Executor for ThreadPerTask {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.prefix, seq));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(task).map(drop).map_err(SubmitError::Spawn)
    }

    fn name(&self) -> &'static str {
        "thread-per-task"
    }
}

/// Runs each task synchronously in the caller.
///
/// Testing only: it blocks the dispatcher for the whole task.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        task();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_thread_per_task_names_threads() {
        let exec = ThreadPerTask::new("unit").stack_size(256 * 1024);
        let (tx, rx) = mpsc::channel();
        exec.submit(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }))
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("unit-0"));
        assert_eq!(exec.spawned(), 1);
    }

    #[test]
    fn test_inline_runs_before_return() {
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = flag.clone();
        InlineExecutor
            .submit(Box::new(move || f.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
