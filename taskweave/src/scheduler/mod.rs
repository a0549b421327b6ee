//! The contract between tasks and whatever runs them.

use crate::task::TaskRef;
use std::fmt::Debug;
use std::sync::Arc;

// Public API
mod manual;
pub use manual::{InlinePolicy, ManualScheduler};

pub mod stealing;
pub use stealing::ThreadPool;

/// Executes tasks.
///
/// The only way to run a task is [`TaskRef::execute`], which runs its body at
/// most once no matter how many times it is called or by whom. Errors (and
/// panics) returned by `queue` or `try_execute_inline` fault the affected task
/// with [`Fault::Scheduler`]; they never leave it hanging.
///
/// [`Fault::Scheduler`]: crate::error::Fault::Scheduler
pub trait Schedule: Send + Sync + Debug + 'static {
    /// Accepts a task for later execution.
    fn queue(&self, task: TaskRef) -> anyhow::Result<()>;

    /// Runs `task` on the calling thread if the scheduler allows it. Used when
    /// a thread waits on a task that has not run yet, and for synchronous
    /// continuations. `previously_queued` tells whether `task` already went
    /// through `queue`.
    ///
    /// Returns whether the task was executed by this call.
    fn try_execute_inline(&self, task: &TaskRef, previously_queued: bool)
    -> anyhow::Result<bool>;

    /// Removes a queued task that is being canceled. Returning `false` is
    /// always correct; the task will then no-op when executed.
    fn try_dequeue(&self, _task: &TaskRef) -> bool {
        false
    }

    /// Snapshot of the queued tasks, for diagnostics. `None` when unsupported.
    fn scheduled_tasks(&self) -> Option<Vec<TaskRef>> {
        None
    }

    /// Upper bound on the number of tasks executing at once.
    fn max_concurrency(&self) -> usize {
        usize::MAX
    }
}

pub type SchedulerRef = Arc<dyn Schedule>;
