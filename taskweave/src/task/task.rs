use crate::cancel::CancellationToken;
use crate::error::{AggregateFault, Fault, TaskError};
use crate::task::cell::{Body, TaskCell};
use crate::task::continuation::Continuation;
use crate::task::raw::Header;
use crate::task::state::Flags;
use crate::task::{
    ContinuationOptions, Id, Status, TaskContext, TaskCreationOptions, TaskFactory, TaskRef,
};
use crate::utils::guarded;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a task is completed without running a body.
pub(crate) enum Outcome<T> {
    Value(T),
    /// The value of another task, shared rather than copied.
    Shared(Arc<T>),
    Faults(Vec<Fault>),
    Canceled(Option<CancellationToken>),
}

/// A handle to a unit of work producing a `T`.
///
/// Handles are cheap to clone and all refer to the same task. Tasks are
/// created through a [`TaskFactory`], by [`Task::continue_with`], by the
/// combinators or by a [`TaskCompletionSource`].
///
/// [`TaskCompletionSource`]: crate::task::TaskCompletionSource
pub struct Task<T> {
    cell: Arc<TaskCell<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Send + Sync + 'static> Task<T> {
    pub(crate) fn from_cell(cell: Arc<TaskCell<T>>) -> Self {
        Self { cell }
    }

    pub(crate) fn new(header: Header, body: Option<Body<T>>) -> Self {
        Self::from_cell(Arc::new(TaskCell::new(header, body)))
    }

    /// A task only a completion source or the engine can complete.
    pub(crate) fn new_promise(options: TaskCreationOptions) -> Self {
        let header = Header::new(options, CancellationToken::none(), None, None, Flags::PROMISE);
        Self::new(header, None)
    }

    /// A task that already ran to completion with `value`.
    pub fn from_result(value: T) -> Self {
        let task = Self::new_promise(TaskCreationOptions::empty());
        task.try_complete(Outcome::Value(value));
        task
    }

    /// A task that already faulted with `err`.
    pub fn from_error(err: anyhow::Error) -> Self {
        let task = Self::new_promise(TaskCreationOptions::empty());
        task.try_complete(Outcome::Faults(vec![Fault::from(err)]));
        task
    }

    /// A task that is already canceled by `token`.
    pub fn from_canceled(token: CancellationToken) -> Self {
        let task = Self::new_promise(TaskCreationOptions::empty());
        task.try_complete(Outcome::Canceled(Some(token)));
        task
    }

    fn header(&self) -> &Header {
        self.cell.header()
    }

    /// The type-erased handle schedulers and combinators work with.
    pub fn to_ref(&self) -> TaskRef {
        TaskRef::new(Arc::clone(&self.cell) as _)
    }

    pub fn id(&self) -> Id {
        self.header().id()
    }

    pub fn status(&self) -> Status {
        self.header().status()
    }

    pub fn options(&self) -> TaskCreationOptions {
        self.header().options()
    }

    pub fn token(&self) -> &CancellationToken {
        self.header().token()
    }

    pub fn is_completed(&self) -> bool {
        self.header().is_completed()
    }

    pub fn is_completed_successfully(&self) -> bool {
        self.status() == Status::RanToCompletion
    }

    pub fn is_canceled(&self) -> bool {
        self.status() == Status::Canceled
    }

    pub fn is_faulted(&self) -> bool {
        self.status() == Status::Faulted
    }

    /// Queues a task built with [`TaskFactory::build`].
    ///
    /// If the scheduler refuses it, the task is faulted and the scheduler
    /// fault is returned.
    pub fn start(&self) -> Result<(), TaskError> {
        self.to_ref().start()
    }

    /// Starts the task on the calling thread when its scheduler allows it,
    /// otherwise queues it, and waits for completion.
    ///
    /// The task's own outcome is not reported here; use [`Task::wait`] or
    /// [`Task::result`] for that.
    pub fn run_synchronously(&self) -> Result<(), TaskError> {
        let task = self.to_ref();
        task.transition_to_started()?;

        if let Some(scheduler) = self.header().scheduler() {
            let ran = guarded(|| scheduler.try_execute_inline(&task, false))
                .map_err(|err| TaskError::Scheduler(task.fault_from_scheduler(err)))?;

            if !ran {
                guarded(|| scheduler.queue(task.clone()))
                    .map_err(|err| TaskError::Scheduler(task.fault_from_scheduler(err)))?;
            }
        }

        match task.wait() {
            Ok(()) | Err(TaskError::Faulted(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Blocks until the task completes.
    pub fn wait(&self) -> Result<(), TaskError> {
        self.to_ref().wait()
    }

    /// Returns `Ok(false)` if the task is still running after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, TaskError> {
        self.wait_with(Some(timeout), &CancellationToken::none())
    }

    /// Waits with an optional timeout, giving up with [`TaskError::Canceled`]
    /// when `token` fires. Canceling the wait does not cancel the task.
    pub fn wait_with(
        &self,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<bool, TaskError> {
        self.to_ref().wait_with(timeout, token)
    }

    /// Waits for the task and returns its value.
    pub fn result(&self) -> Result<&T, TaskError> {
        if !self.is_completed() {
            self.wait()?;
        }

        self.header().outcome()?;
        self.cell.result().ok_or(TaskError::NotCompleted)
    }

    /// The fault of a faulted task, without waiting.
    pub fn fault(&self) -> Option<&AggregateFault> {
        self.header().fault()
    }

    /// Marks a completed task disposed: it can no longer be waited on or
    /// continued, but its result and fault remain readable.
    pub fn dispose(&self) -> Result<(), TaskError> {
        self.header().dispose()
    }

    /// Creates a task that runs `body` once this one completes, subject to
    /// the predicate flags in `options`.
    ///
    /// The continuation uses the factory's scheduler, token and parent. If
    /// this task already completed, the continuation is dispatched right away.
    pub fn continue_with<U, F>(
        &self,
        factory: &TaskFactory,
        options: ContinuationOptions,
        body: F,
    ) -> Result<Task<U>, TaskError>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&Task<T>, &TaskContext<'_>) -> anyhow::Result<U> + Send + 'static,
    {
        if self.header().is_disposed() {
            return Err(TaskError::Disposed("task"));
        }
        let options = options.validate()?;

        let antecedent = self.clone();
        let continuation = factory.create_continuation(
            options,
            Box::new(move |cx: &TaskContext<'_>| body(&antecedent, cx)),
        )?;

        self.to_ref().attach_continuation(Continuation::Task {
            task: continuation.to_ref(),
            options,
        });
        Ok(continuation)
    }

    /// The outcome of a completed task, for another task to complete with.
    /// `None` while it runs.
    pub(crate) fn shared_outcome(&self) -> Option<Outcome<T>> {
        let header = self.header();
        match header.status() {
            Status::RanToCompletion => self.cell.shared_result().map(Outcome::Shared),
            Status::Faulted => header
                .fault()
                .map(|fault| Outcome::Faults(fault.faults().to_vec())),
            Status::Canceled => Some(Outcome::Canceled(Some(header.canceled_by()))),
            _ => None,
        }
    }

    /// Completes a task that does not run a body. Returns `false` if it was
    /// already completed (or reserved) by someone else.
    pub(crate) fn try_complete(&self, outcome: Outcome<T>) -> bool {
        let header = self.header();
        if header.state.reserve_completion().is_err() {
            return false;
        }

        match outcome {
            Outcome::Value(value) => self.cell.set_result(value),
            Outcome::Shared(value) => self.cell.set_shared_result(value),
            Outcome::Faults(faults) => header.record_faults(faults),
            Outcome::Canceled(token) => header.acknowledge_cancellation(token),
        }

        header.finish_stage_two();
        true
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.cell.header();
        f.debug_struct("Task")
            .field("id", &header.id())
            .field("status", &header.status())
            .finish()
    }
}
