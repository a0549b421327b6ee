#![allow(unused)]

use crate::scheduler::{ManualScheduler, Schedule, SchedulerRef, ThreadPool};
use crate::task::TaskFactory;
use anyhow::anyhow;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub(crate) mod spy;
pub(crate) use spy::*;

/// Generous bound for anything that should finish promptly.
pub(crate) const TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn manual() -> Arc<ManualScheduler> {
    ManualScheduler::new()
}

pub(crate) fn pool(worker_threads: usize) -> Arc<ThreadPool> {
    ThreadPool::builder()
        .worker_threads(worker_threads)
        .park_timeout(Duration::from_millis(10))
        .try_build()
        .expect("failed to start thread pool")
}

pub(crate) fn factory<S: Schedule>(scheduler: &Arc<S>) -> TaskFactory {
    TaskFactory::new(Arc::clone(scheduler) as SchedulerRef)
}

pub(crate) fn boom(msg: &str) -> anyhow::Error {
    anyhow!(msg.to_string())
}

/// Spins until `cond` holds. Returns false on timeout.
pub(crate) fn spin_until(mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > TIMEOUT {
            return false;
        }
        thread::yield_now();
    }
    true
}
