//! Executor trait for dispatching independent requests.
//!
//! Requests never share an invoke context, so a batch of them can be
//! processed on any number of threads. The dispatcher stays agnostic of the
//! threading strategy by going through this trait.

use std::fmt::Debug;

/// Runs a batch of work items, possibly in parallel.
///
/// Results come back in input order whatever the execution order was.
pub trait Executor: Send + Sync + Debug {
    fn execute_all<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + Clone + 'static;

    /// Number of items that may be in flight at once (1 for sequential executors).
    fn parallelism(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Processes items one after another on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct SyncExecutor;

impl SyncExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for SyncExecutor {
    fn execute_all<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + Clone + 'static,
    {
        items.into_iter().map(f).collect()
    }

    fn parallelism(&self) -> usize {
        1
    }

    fn name(&self) -> &'static str {
        "SyncExecutor"
    }
}
