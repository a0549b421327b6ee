use crate::scheduler::stealing::ThreadPool;
use anyhow::{Result, anyhow};
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Global queue interval default value.
const GLOBAL_QUEUE_INTERVAL: u32 = 31;

/// Maximum number of stealing attempts.
const MAX_STEAL_RETRIES: usize = 3;

/// Upper bound on how long an idle worker sleeps before looking for work.
const PARK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let worker_count = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = worker_count.fetch_add(1, Ordering::Relaxed);
        format!("taskweave-{}", id)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and starts a [`ThreadPool`].
///
/// ```
/// use taskweave::scheduler::ThreadPool;
///
/// let pool = ThreadPool::builder()
///     .worker_threads(2)
///     .thread_name("pool-worker")
///     .try_build()
///     .unwrap();
///
/// assert_eq!(pool.worker_threads(), 2);
/// pool.shutdown().unwrap();
/// ```
#[derive(Debug)]
pub struct Builder {
    /// Defaults to one worker per core.
    worker_threads: Option<usize>,

    thread_name: ThreadNameFn,

    thread_stack_size: Option<usize>,

    /// How many ticks before a worker looks at the global injector first.
    global_queue_interval: u32,

    /// How many times an idle worker sweeps the injector and its peers before
    /// parking.
    max_steal_retries: usize,

    park_timeout: Duration,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            global_queue_interval: GLOBAL_QUEUE_INTERVAL,
            max_steal_retries: MAX_STEAL_RETRIES,
            park_timeout: PARK_TIMEOUT,
        }
    }

    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker_threads must be greater than 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the name of every thread spawned by the pool. The default is
    /// "taskweave-{id}" with a monotonically increasing id.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(
            val.is_power_of_two(),
            "thread_stack_size must be a power of two"
        );
        self.thread_stack_size = Some(val);
        self
    }

    /// Setting the interval to `1` always prefers the global queue; larger
    /// values favor tasks already claimed by the worker.
    #[track_caller]
    pub fn global_queue_interval(mut self, val: u32) -> Self {
        assert!(val > 0, "global_queue_interval must be greater than 0");
        self.global_queue_interval = val;
        self
    }

    #[track_caller]
    pub fn max_steal_retries(mut self, val: usize) -> Self {
        assert!(val > 0, "max_steal_retries must be greater than 0");
        self.max_steal_retries = val;
        self
    }

    pub fn park_timeout(mut self, val: Duration) -> Self {
        self.park_timeout = val;
        self
    }

    /// Spawns the worker threads.
    pub fn try_build(self) -> Result<Arc<ThreadPool>> {
        ThreadPool::start(self.try_into()?)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated pool configuration.
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) global_queue_interval: u32,
    pub(crate) max_steal_retries: usize,
    pub(crate) park_timeout: Duration,
}

impl PoolConfig {
    fn validate(&self) -> Result<()> {
        if self.park_timeout.is_zero() {
            return Err(anyhow!("park_timeout must be greater than 0"));
        }
        Ok(())
    }
}

impl TryFrom<Builder> for PoolConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let cfg = PoolConfig {
            worker_threads,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            global_queue_interval: builder.global_queue_interval,
            max_steal_retries: builder.max_steal_retries,
            park_timeout: builder.park_timeout,
        };

        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() -> Result<()> {
        let cfg = PoolConfig::try_from(Builder::new())?;
        assert_eq!(cfg.worker_threads, thread::available_parallelism()?.get());
        assert_eq!(cfg.global_queue_interval, GLOBAL_QUEUE_INTERVAL);
        assert_eq!(cfg.max_steal_retries, MAX_STEAL_RETRIES);
        assert_eq!(cfg.park_timeout, PARK_TIMEOUT);
        Ok(())
    }

    #[test]
    fn test_thread_names() -> Result<()> {
        let cfg = PoolConfig::try_from(Builder::new())?;
        assert_eq!((cfg.thread_name.0)(), "taskweave-0");
        assert_eq!((cfg.thread_name.0)(), "taskweave-1");

        let cfg = PoolConfig::try_from(Builder::new().thread_name("fixed"))?;
        assert_eq!((cfg.thread_name.0)(), "fixed");
        assert_eq!((cfg.thread_name.0)(), "fixed");
        Ok(())
    }

    #[test]
    fn test_rejects_zero_park_timeout() {
        let res = PoolConfig::try_from(Builder::new().park_timeout(Duration::ZERO));
        assert!(res.is_err());
    }

    #[test]
    #[should_panic(expected = "worker_threads must be greater than 0")]
    fn test_zero_workers_panics() {
        let _ = Builder::new().worker_threads(0);
    }
}
