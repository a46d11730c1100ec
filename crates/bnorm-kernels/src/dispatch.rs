//! Task dispatch onto the calling thread or a rayon pool

use crate::geometry::DispatchGeometry;
use bnorm_common::{DispatchBackend, DispatchConfig};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Work executed for one task: the range of unit indices it covers.
pub type TaskFn<'a> = dyn Fn(Range<usize>) + Sync + 'a;

/// Runs the tasks of a [`DispatchGeometry`].
pub trait Dispatcher: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Run `job` once per task and return after all of them have finished.
    /// Tasks may run concurrently and in any order.
    fn dispatch(&self, geometry: &DispatchGeometry, job: &TaskFn<'_>);
}

/// Runs every task in order on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialDispatcher;

impl Dispatcher for SequentialDispatcher {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn dispatch(&self, geometry: &DispatchGeometry, job: &TaskFn<'_>) {
        for task in 0..geometry.tasks() {
            job(geometry.task_range(task));
        }
    }
}

/// Runs tasks on a rayon thread pool.
pub struct RayonDispatcher {
    /// Dedicated pool; `None` uses the global pool.
    pool: Option<ThreadPool>,
}

impl RayonDispatcher {
    /// Dispatcher on the global rayon pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Dispatcher on a dedicated pool of `num_threads` workers, or the
    /// global pool when `None`. If the pool cannot be built the global pool
    /// is used instead.
    pub fn new(num_threads: Option<usize>) -> Self {
        let Some(n) = num_threads else {
            return Self::global();
        };
        match ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("bnorm-worker-{i}"))
            .build()
        {
            Ok(pool) => Self { pool: Some(pool) },
            Err(e) => {
                tracing::warn!("Failed to build {n}-thread pool ({e}); using global rayon pool");
                Self::global()
            }
        }
    }

    /// Worker count tasks are spread over.
    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

impl fmt::Debug for RayonDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonDispatcher")
            .field("dedicated_pool", &self.pool.is_some())
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

impl Dispatcher for RayonDispatcher {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn dispatch(&self, geometry: &DispatchGeometry, job: &TaskFn<'_>) {
        let run = || {
            (0..geometry.tasks()).into_par_iter().for_each(|task| job(geometry.task_range(task)));
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

/// Rayon for large operations, the calling thread below a size threshold.
#[derive(Debug)]
pub struct AutoDispatcher {
    parallel: RayonDispatcher,
    /// Element count below which tasks run sequentially.
    threshold: usize,
}

impl AutoDispatcher {
    pub fn new(parallel: RayonDispatcher, threshold: usize) -> Self {
        Self { parallel, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl Dispatcher for AutoDispatcher {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn dispatch(&self, geometry: &DispatchGeometry, job: &TaskFn<'_>) {
        if geometry.tasks() <= 1 || geometry.total_elements() < self.threshold {
            SequentialDispatcher.dispatch(geometry, job);
        } else {
            self.parallel.dispatch(geometry, job);
        }
    }
}

/// Build the dispatcher described by `config`.
pub fn select_dispatcher(config: &DispatchConfig) -> Arc<dyn Dispatcher> {
    let dispatcher: Arc<dyn Dispatcher> = match config.backend {
        DispatchBackend::Sequential => Arc::new(SequentialDispatcher),
        DispatchBackend::Rayon => Arc::new(RayonDispatcher::new(config.num_threads)),
        DispatchBackend::Auto => Arc::new(AutoDispatcher::new(
            RayonDispatcher::new(config.num_threads),
            config.parallel_threshold,
        )),
    };
    tracing::debug!(dispatcher = dispatcher.name(), ?config, "selected dispatcher");
    dispatcher
}
