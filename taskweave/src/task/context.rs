use crate::cancel::CancellationToken;
use crate::error::OperationCanceled;
use crate::scheduler::SchedulerRef;
use crate::task::{Id, TaskRef};

/// Handed to a task body while it runs.
///
/// It is the only way to create attached children (through
/// [`TaskFactory::parent`]), which ties attachment to the lifetime of the
/// parent's body.
///
/// [`TaskFactory::parent`]: crate::task::TaskFactory::parent
pub struct TaskContext<'a> {
    task: &'a TaskRef,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(task: &'a TaskRef) -> Self {
        Self { task }
    }

    pub fn id(&self) -> Id {
        self.task.id()
    }

    /// The running task.
    pub fn task(&self) -> &TaskRef {
        self.task
    }

    pub fn token(&self) -> &CancellationToken {
        self.task.header().token()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.token().is_cancellation_requested()
    }

    /// Returning this error from the body (with `?`) acknowledges the
    /// cancellation and completes the task as canceled.
    pub fn throw_if_cancellation_requested(&self) -> Result<(), OperationCanceled> {
        self.token().throw_if_cancellation_requested()
    }

    /// The scheduler running this task.
    pub fn scheduler(&self) -> Option<&SchedulerRef> {
        self.task.header().scheduler()
    }
}
