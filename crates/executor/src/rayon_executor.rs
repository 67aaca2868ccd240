//! Rayon-based parallel executor.

use rayon::prelude::*;
use trellis_traits::Executor;

/// Dispatches items on rayon's global work-stealing pool.
///
/// The pool size is whatever rayon's global configuration says; configure it
/// with `rayon::ThreadPoolBuilder::build_global` before the first use.
#[derive(Debug, Clone)]
pub struct RayonExecutor {
    num_threads: usize,
}

impl RayonExecutor {
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
        }
    }
}

impl Default for RayonExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for RayonExecutor {
    fn execute_all<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + Clone + 'static,
    {
        items.into_par_iter().map(f).collect()
    }

    fn parallelism(&self) -> usize {
        self.num_threads
    }

    fn name(&self) -> &'static str {
        "RayonExecutor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_rayon_executor_preserves_input_order() {
        let executor = RayonExecutor::new();
        let uris: Vec<String> = (0..64).map(|i| format!("page/{i}")).collect();
        let results = executor.execute_all(uris.clone(), |uri| uri.len());
        let expected: Vec<usize> = uris.iter().map(|u| u.len()).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn test_rayon_executor_visits_every_item_once() {
        let executor = RayonExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        executor.execute_all((0..100).collect::<Vec<_>>(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert!(executor.parallelism() >= 1);
    }
}
