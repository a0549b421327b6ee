use crate::scheduler::stealing::{Shared, Ticker, TickerData, TickerEvents};
use crate::task::TaskRef;
use crate::utils::ScopeGuard;
use crossbeam_deque::{Stealer, Worker as CbWorker};
use std::cell::{Cell, RefCell};
use std::iter;
use std::rc::Rc;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Rc<Worker>>> = const { RefCell::new(None) };
}

/// Pushes `task` on the local queue of the calling thread's worker, if the
/// calling thread is a worker of pool `pool_id`. Hands the task back otherwise.
pub(crate) fn try_push_local(pool_id: usize, task: TaskRef) -> Result<(), TaskRef> {
    CURRENT.with(|current| match current.borrow().as_deref() {
        Some(worker) if worker.shared.id == pool_id => {
            worker.local.push(task);
            Ok(())
        }
        _ => Err(task),
    })
}

pub(crate) struct Worker {
    index: usize,

    shared: Arc<Shared>,

    /// LIFO queue other workers steal from.
    local: CbWorker<TaskRef>,

    /// The other workers' queues, in an order unique to this worker.
    stealers: Vec<Stealer<TaskRef>>,

    cfg: RefCell<EventLoopConfig>,

    ticker: RefCell<Ticker>,

    /// Whether we should try to find our next task in the global queue.
    pop_global_queue: Cell<bool>,
}

impl Worker {
    pub(crate) fn new(index: usize, shared: Arc<Shared>, local: CbWorker<TaskRef>) -> Self {
        let mut stealers = shared
            .stealers
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != index)
            .map(|(_, s)| s.clone())
            .collect::<Vec<_>>();

        // Different search orders reduce contention between thieves.
        fastrand::shuffle(&mut stealers);

        let cfg = RefCell::new(EventLoopConfig::from(&*shared));

        Self {
            index,
            shared,
            local,
            stealers,
            cfg,
            ticker: RefCell::new(Ticker::new()),
            pop_global_queue: Cell::new(false),
        }
    }

    fn find_task(&self) -> Option<TaskRef> {
        // Enforce fairness by force-checking the global queue every
        // `global_queue_interval` ticks.
        if self.pop_global_queue.replace(false)
            && let Some(task) = self.shared.injector.steal_batch_and_pop(&self.local).success()
        {
            return Some(task);
        }

        self.local.pop().or_else(|| {
            iter::repeat_with(|| {
                self.shared
                    .injector
                    .steal_batch_and_pop(&self.local)
                    // `collect` stops at the first success.
                    .or_else(|| self.stealers.iter().map(|s| s.steal()).collect())
            })
            .take(self.cfg.borrow().max_steal_retries)
            .find(|s| !s.is_retry())
            .and_then(|s| s.success())
        })
    }

    /// Runs on the worker thread until the pool shuts down and no work is
    /// left.
    pub(crate) fn run(self) {
        let worker = Rc::new(self);
        CURRENT.with(|current| *current.borrow_mut() = Some(Rc::clone(&worker)));
        let _reset = ScopeGuard::new(|| {
            CURRENT.with(|current| current.borrow_mut().take());
        });

        tracing::trace!(pool = worker.shared.id, worker = worker.index, "worker started");
        worker.event_loop();
        tracing::trace!(pool = worker.shared.id, worker = worker.index, "worker exited");
    }

    fn event_loop(&self) {
        loop {
            if let Some(task) = self.find_task() {
                task.execute();
            } else if !self.shared.is_shutdown() {
                self.shared.park_current_thread(self.index);
            }

            let events = self
                .ticker
                .borrow_mut()
                .tick(&*self.shared, &mut *self.cfg.borrow_mut());

            if events.contains(TickerEvents::SHUTDOWN) {
                break;
            } else if events.contains(TickerEvents::POP_GLOBAL_QUEUE) {
                self.pop_global_queue.set(true);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct EventLoopConfig {
    global_queue_interval: u32,
    max_steal_retries: usize,
}

impl EventLoopConfig {
    fn should_pop_global_queue(&self, tick: u32) -> bool {
        tick.is_multiple_of(self.global_queue_interval)
    }
}

impl From<&Shared> for EventLoopConfig {
    fn from(shared: &Shared) -> EventLoopConfig {
        EventLoopConfig {
            global_queue_interval: shared.cfg.global_queue_interval,
            max_steal_retries: shared.cfg.max_steal_retries,
        }
    }
}

impl TickerData for EventLoopConfig {
    type Context = Shared;

    fn update_and_check(&mut self, shared: &Shared, tick: u32) -> TickerEvents {
        // Queued work still runs after shutdown was requested.
        if shared.is_drained() {
            return TickerEvents::SHUTDOWN;
        }

        if self.should_pop_global_queue(tick) {
            TickerEvents::POP_GLOBAL_QUEUE
        } else {
            TickerEvents::empty()
        }
    }
}
