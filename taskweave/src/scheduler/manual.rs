use crate::scheduler::Schedule;
use crate::task::TaskRef;
use anyhow::anyhow;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// What [`ManualScheduler::try_execute_inline`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InlinePolicy {
    /// Run the task on the calling thread.
    #[default]
    Allow,
    /// Refuse; the task stays queued.
    Deny,
    /// Return an error, as a broken scheduler would.
    Fail,
}

/// A scheduler that only runs tasks when told to.
///
/// Tasks are queued in FIFO order and executed by [`ManualScheduler::run_one`]
/// or [`ManualScheduler::run_pending`] on the calling thread. Useful to drive
/// the engine deterministically and to model misbehaving schedulers.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<TaskRef>>,
    inline_policy: InlinePolicy,
    fail_queue: AtomicBool,
    queued: AtomicUsize,
    inlined: AtomicUsize,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_inline_policy(inline_policy: InlinePolicy) -> Arc<Self> {
        Arc::new(Self {
            inline_policy,
            ..Self::default()
        })
    }

    /// Makes every later `queue` call fail.
    pub fn set_fail_queue(&self, fail: bool) {
        self.fail_queue.store(fail, Ordering::Release);
    }

    /// Executes the oldest queued task. Returns `false` if the queue is empty.
    pub fn run_one(&self) -> bool {
        let Some(task) = self.queue.lock().pop_front() else {
            return false;
        };
        task.execute();
        true
    }

    /// Executes queued tasks, including those queued meanwhile, until the
    /// queue is empty. Returns how many were popped.
    pub fn run_pending(&self) -> usize {
        let mut n = 0;
        while self.run_one() {
            n += 1;
        }
        n
    }

    /// Removes every queued task without running it.
    pub fn drain(&self) -> Vec<TaskRef> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Number of successful `queue` calls.
    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Number of tasks executed through `try_execute_inline`.
    pub fn inlined_count(&self) -> usize {
        self.inlined.load(Ordering::Acquire)
    }

    fn remove(&self, task: &TaskRef) -> bool {
        let mut queue = self.queue.lock();
        match queue.iter().position(|t| t.ptr_eq(task)) {
            Some(idx) => queue.remove(idx).is_some(),
            None => false,
        }
    }
}

impl Schedule for ManualScheduler {
    fn queue(&self, task: TaskRef) -> anyhow::Result<()> {
        if self.fail_queue.load(Ordering::Acquire) {
            return Err(anyhow!("manual scheduler refused task {}", task.id()));
        }

        self.queue.lock().push_back(task);
        self.queued.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn try_execute_inline(&self, task: &TaskRef, previously_queued: bool) -> anyhow::Result<bool> {
        match self.inline_policy {
            InlinePolicy::Deny => Ok(false),
            InlinePolicy::Fail => Err(anyhow!("manual scheduler cannot inline task {}", task.id())),
            InlinePolicy::Allow => {
                if previously_queued {
                    self.remove(task);
                }

                let ran = task.execute();
                if ran {
                    self.inlined.fetch_add(1, Ordering::AcqRel);
                }
                Ok(ran)
            }
        }
    }

    fn try_dequeue(&self, task: &TaskRef) -> bool {
        self.remove(task)
    }

    fn scheduled_tasks(&self) -> Option<Vec<TaskRef>> {
        Some(self.queue.lock().iter().cloned().collect())
    }

    fn max_concurrency(&self) -> usize {
        1
    }
}
