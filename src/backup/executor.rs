use crate::backup::result_error::result::Result;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::num::NonZeroUsize;

pub const DEFAULT_CONCURRENCY: usize = 5;

/// Fixed-size worker pool that runs one task per item.
///
/// Tasks start in submission order as slots free up; completion order is
/// unspecified. At most `concurrency` tasks are ever in flight.
pub struct BoundedExecutor {
    pool: ThreadPool,
}

impl BoundedExecutor {
    pub fn new(concurrency: NonZeroUsize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency.get())
            .thread_name(|i| format!("archive-worker-{i}"))
            .build()?;
        tracing::debug!("Started {} archive workers", concurrency);
        Ok(Self { pool })
    }

    pub fn concurrency(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Blocks the calling thread until every task has returned.
    pub fn run<T, I, F>(&self, tasks: I, task_fn: F)
    where
        T: Send,
        I: IntoIterator<Item = T>,
        F: Fn(T) + Sync,
    {
        let task_fn = &task_fn;
        self.pool.in_place_scope_fifo(|scope| {
            for task in tasks {
                scope.spawn_fifo(move |_| task_fn(task));
            }
        });
    }
}

pub fn run_bounded<T, I, F>(tasks: I, concurrency: NonZeroUsize, task_fn: F) -> Result<()>
where
    T: Send,
    I: IntoIterator<Item = T>,
    F: Fn(T) + Sync,
{
    BoundedExecutor::new(concurrency)?.run(tasks, task_fn);
    Ok(())
}
