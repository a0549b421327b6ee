use crate::cancel::CancellationToken;
use crate::error::{Fault, TaskError};
use crate::task::task::Outcome;
use crate::task::{Task, TaskCreationOptions};

/// The producer side of a task that has no body.
///
/// The first `try_set_*` call wins and completes the task; every later call
/// returns `false` (or [`TaskError::AlreadyCompleted`] for the non-`try`
/// variants).
///
/// ```
/// use taskweave::task::TaskCompletionSource;
///
/// let source = TaskCompletionSource::new();
/// let task = source.task();
///
/// assert!(source.try_set_result(7));
/// assert!(!source.try_set_result(8));
/// assert_eq!(*task.result().unwrap(), 7);
/// ```
#[derive(Debug)]
pub struct TaskCompletionSource<T> {
    task: Task<T>,
}

impl<T: Send + Sync + 'static> TaskCompletionSource<T> {
    pub fn new() -> Self {
        Self {
            task: Task::new_promise(TaskCreationOptions::empty()),
        }
    }

    /// Only `RUN_CONTINUATIONS_ASYNCHRONOUSLY` applies to a task without a
    /// body or scheduler; other options are rejected.
    pub fn with_options(options: TaskCreationOptions) -> Result<Self, TaskError> {
        let allowed = TaskCreationOptions::RUN_CONTINUATIONS_ASYNCHRONOUSLY;
        if !allowed.contains(options) {
            return Err(TaskError::IllegalOptions(format!(
                "{:?} cannot be used on a completion source",
                options.difference(allowed)
            )));
        }

        Ok(Self {
            task: Task::new_promise(options),
        })
    }

    pub fn task(&self) -> Task<T> {
        self.task.clone()
    }

    pub fn try_set_result(&self, value: T) -> bool {
        self.task.try_complete(Outcome::Value(value))
    }

    pub fn try_set_fault(&self, fault: Fault) -> bool {
        self.task.try_complete(Outcome::Faults(vec![fault]))
    }

    pub fn try_set_error(&self, err: anyhow::Error) -> bool {
        self.try_set_fault(Fault::from(err))
    }

    /// Faults the task with every fault in `faults`, in order.
    pub fn try_set_faults(
        &self,
        faults: impl IntoIterator<Item = Fault>,
    ) -> Result<bool, TaskError> {
        let faults = faults.into_iter().collect::<Vec<_>>();
        if faults.is_empty() {
            return Err(TaskError::EmptyCollection("faults"));
        }
        Ok(self.task.try_complete(Outcome::Faults(faults)))
    }

    pub fn try_set_canceled(&self) -> bool {
        self.task.try_complete(Outcome::Canceled(None))
    }

    /// Cancels the task, recording `token` as the cause.
    pub fn try_set_canceled_with(&self, token: CancellationToken) -> bool {
        self.task.try_complete(Outcome::Canceled(Some(token)))
    }

    pub fn set_result(&self, value: T) -> Result<(), TaskError> {
        Self::committed(self.try_set_result(value))
    }

    pub fn set_fault(&self, fault: Fault) -> Result<(), TaskError> {
        Self::committed(self.try_set_fault(fault))
    }

    pub fn set_error(&self, err: anyhow::Error) -> Result<(), TaskError> {
        Self::committed(self.try_set_error(err))
    }

    pub fn set_faults(&self, faults: impl IntoIterator<Item = Fault>) -> Result<(), TaskError> {
        Self::committed(self.try_set_faults(faults)?)
    }

    pub fn set_canceled(&self) -> Result<(), TaskError> {
        Self::committed(self.try_set_canceled())
    }

    fn committed(won: bool) -> Result<(), TaskError> {
        if won {
            Ok(())
        } else {
            Err(TaskError::AlreadyCompleted)
        }
    }
}

impl<T: Send + Sync + 'static> Default for TaskCompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}
