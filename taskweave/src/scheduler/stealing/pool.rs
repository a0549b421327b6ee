use crate::scheduler::Schedule;
use crate::scheduler::stealing::{Builder, PoolConfig, Shared, Worker, worker};
use crate::task::{TaskCreationOptions, TaskRef};
use anyhow::{Context, Result, anyhow, bail};
use crossbeam_deque::Worker as CbWorker;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{self, Ordering};
use std::thread;

/// A work-stealing thread pool.
///
/// Dropping the pool shuts it down. Shutdown lets the workers drain queued
/// tasks and refuses new ones; tasks queued afterwards fault with a scheduler
/// error.
#[derive(Debug)]
pub struct ThreadPool {
    pub(super) shared: Arc<Shared>,
    pub(super) handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// A pool with one worker per core.
    pub fn new() -> Result<Arc<Self>> {
        Builder::new().try_build()
    }

    pub(super) fn start(cfg: PoolConfig) -> Result<Arc<Self>> {
        let num_workers = cfg.worker_threads;

        let mut local_queues = Vec::with_capacity(num_workers);
        let mut stealers = Vec::with_capacity(num_workers);

        for _ in 0..num_workers {
            let w = CbWorker::new_lifo();
            stealers.push(w.stealer());
            local_queues.push(w);
        }

        let shared = Arc::new(Shared::new(cfg, stealers));
        let pool = Arc::new(Self {
            shared: Arc::clone(&shared),
            handles: Mutex::new(Vec::with_capacity(num_workers)),
        });

        for (index, local) in local_queues.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let handle = pool
                .thread_builder()
                .spawn(move || Worker::new(index, shared, local).run())
                .context("failed to spawn worker thread");

            match handle {
                Ok(handle) => pool.handles.lock().push(handle),
                Err(err) => {
                    pool.shutdown()?;
                    return Err(err);
                }
            }
        }

        tracing::debug!(pool = shared.id, workers = num_workers, "thread pool started");
        Ok(pool)
    }

    fn thread_builder(&self) -> thread::Builder {
        let cfg = &self.shared.cfg;
        let mut builder = thread::Builder::new().name((cfg.thread_name.0)());

        if let Some(stack_size) = cfg.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }
        builder
    }

    pub fn worker_threads(&self) -> usize {
        self.shared.cfg.worker_threads
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Stops accepting tasks and joins the workers once queued work is done.
    ///
    /// Called from a worker thread, that worker is not joined; it exits on
    /// its own.
    pub fn shutdown(&self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.unpark_all_threads();

        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.handles.lock());

        let panicked = handles
            .into_iter()
            .filter(|handle| handle.thread().id() != current)
            .filter_map(|handle| handle.join().err())
            .count();

        if panicked > 0 {
            return Err(anyhow!("{} worker thread(s) panicked", panicked));
        }

        tracing::debug!(pool = self.shared.id, "thread pool shut down");
        Ok(())
    }

    /// Long running tasks get a thread of their own, outside the pool.
    fn spawn_dedicated(&self, task: TaskRef) -> Result<()> {
        let name = format!("{}-long-{}", (self.shared.cfg.thread_name.0)(), task.id());
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                task.execute();
            })
            .context("failed to spawn thread for long running task")?;
        Ok(())
    }
}

impl Schedule for ThreadPool {
    fn queue(&self, task: TaskRef) -> Result<()> {
        if self.is_shutdown() {
            bail!("thread pool is shut down");
        }

        let options = task.options();
        if options.contains(TaskCreationOptions::LONG_RUNNING) {
            return self.spawn_dedicated(task);
        }

        let pushed = if options.contains(TaskCreationOptions::PREFER_FAIRNESS) {
            Err(task)
        } else {
            worker::try_push_local(self.shared.id, task)
        };

        if let Err(task) = pushed {
            self.shared.injector.push(task);

            // Workers exit once they see shutdown with nothing queued. If that
            // raced with the push, the task may sit in the injector forever.
            atomic::fence(Ordering::SeqCst);
            if self.is_shutdown() {
                self.shared.unpark_all_threads();
                bail!("thread pool shut down while queuing");
            }
        }

        self.shared.unpark_one_thread();
        Ok(())
    }

    fn try_execute_inline(&self, task: &TaskRef, previously_queued: bool) -> Result<bool> {
        // A queued long running task may already own a dedicated thread.
        if previously_queued && task.options().contains(TaskCreationOptions::LONG_RUNNING) {
            return Ok(false);
        }
        Ok(task.execute())
    }

    fn max_concurrency(&self) -> usize {
        self.worker_threads()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(pool = self.shared.id, error = %err, "error during thread pool shutdown");
        }
    }
}
