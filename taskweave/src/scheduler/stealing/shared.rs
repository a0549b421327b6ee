use crate::scheduler::stealing::PoolConfig;
use crate::task::TaskRef;
use crossbeam_deque::{Injector, Stealer};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{self, AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, Thread};

/// State shared by every worker of a pool.
#[derive(Debug)]
pub(crate) struct Shared {
    /// Distinguishes pools when a worker of one queues into another.
    pub(crate) id: usize,

    pub(crate) cfg: PoolConfig,

    pub(crate) injector: Injector<TaskRef>,

    /// One per worker, indexed like the workers.
    pub(crate) stealers: Vec<Stealer<TaskRef>>,

    pub(crate) shutdown: AtomicBool,

    parked_threads: RwLock<VecDeque<(usize, Thread)>>,

    should_unpark: Vec<AtomicBool>,
}

impl Shared {
    pub(crate) fn new(cfg: PoolConfig, stealers: Vec<Stealer<TaskRef>>) -> Self {
        static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

        let should_unpark = (0..stealers.len()).map(|_| AtomicBool::new(false)).collect();

        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            cfg,
            injector: Injector::new(),
            stealers,
            shutdown: AtomicBool::new(false),
            parked_threads: RwLock::new(VecDeque::new()),
            should_unpark,
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shutdown was requested and nothing is left to run.
    pub(crate) fn is_drained(&self) -> bool {
        if !self.is_shutdown() {
            return false;
        }
        // Pairs with the fence in `ThreadPool::queue`.
        atomic::fence(Ordering::SeqCst);
        !self.has_work()
    }

    pub(crate) fn has_work(&self) -> bool {
        !self.injector.is_empty() || self.stealers.iter().any(|s| !s.is_empty())
    }

    pub(crate) fn park_current_thread(&self, index: usize) {
        {
            let mut parked_threads = self.parked_threads.write();

            // Checked under the lock: producers push before taking it to unpark.
            if self.has_work() || self.is_shutdown() {
                return;
            }

            self.should_unpark[index].store(false, Ordering::Release);
            parked_threads.push_back((index, thread::current()));
        }

        // Spurious wakeups are filtered by the flag. The timeout bounds how
        // long work pushed by a racing producer can wait.
        while !self.should_unpark[index].load(Ordering::Acquire) {
            thread::park_timeout(self.cfg.park_timeout);
            if self.has_work() || self.is_shutdown() {
                break;
            }
        }

        self.parked_threads.write().retain(|(i, _)| *i != index);
    }

    pub(crate) fn unpark_one_thread(&self) -> bool {
        if let Some((index, thread)) = self.parked_threads.write().pop_back() {
            self.should_unpark[index].store(true, Ordering::Release);
            thread.unpark();
            true
        } else {
            false
        }
    }

    pub(crate) fn unpark_all_threads(&self) -> usize {
        let mut num_unparked = 0;
        let mut parked_threads = self.parked_threads.write();

        while let Some((index, thread)) = parked_threads.pop_back() {
            num_unparked += 1;
            self.should_unpark[index].store(true, Ordering::Release);
            thread.unpark();
        }

        num_unparked
    }

    #[cfg(test)]
    pub(crate) fn parked_threads_len(&self) -> usize {
        self.parked_threads.read().len()
    }
}
