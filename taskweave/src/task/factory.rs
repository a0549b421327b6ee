use crate::cancel::CancellationToken;
use crate::error::TaskError;
use crate::scheduler::SchedulerRef;
use crate::task::cell::Body;
use crate::task::raw::Header;
use crate::task::state::Flags;
use crate::task::{ContinuationOptions, Task, TaskContext, TaskCreationOptions, TaskRef};

/// Creates tasks with a common scheduler, options, token and parent.
///
/// ```
/// use taskweave::scheduler::{ManualScheduler, SchedulerRef};
/// use taskweave::task::TaskFactory;
///
/// let scheduler: SchedulerRef = ManualScheduler::new();
/// let factory = TaskFactory::new(scheduler);
///
/// let task = factory.spawn(|_| Ok(21 * 2)).unwrap();
/// assert_eq!(*task.result().unwrap(), 42);
/// ```
#[derive(Debug, Clone)]
pub struct TaskFactory {
    scheduler: SchedulerRef,
    options: TaskCreationOptions,
    continuation_options: ContinuationOptions,
    token: CancellationToken,
    parent: Option<TaskRef>,
}

impl TaskFactory {
    pub fn new(scheduler: SchedulerRef) -> Self {
        Self {
            scheduler,
            options: TaskCreationOptions::empty(),
            continuation_options: ContinuationOptions::empty(),
            token: CancellationToken::none(),
            parent: None,
        }
    }

    pub fn with_options(mut self, options: TaskCreationOptions) -> Self {
        self.options = options;
        self
    }

    /// Default options of the combinators' continuations.
    pub fn with_continuation_options(mut self, options: ContinuationOptions) -> Self {
        self.continuation_options = options;
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Tasks created with `ATTACHED_TO_PARENT` attach to the task running
    /// `cx`, unless it denies child attachment.
    pub fn parent(mut self, cx: &TaskContext<'_>) -> Self {
        self.parent = Some(cx.task().clone());
        self
    }

    pub fn scheduler(&self) -> &SchedulerRef {
        &self.scheduler
    }

    pub fn options(&self) -> TaskCreationOptions {
        self.options
    }

    pub fn continuation_options(&self) -> ContinuationOptions {
        self.continuation_options
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Creates a task in the `Created` state; call [`Task::start`] to queue it.
    ///
    /// A task whose token is already signaled is `Canceled` right away and its
    /// body never runs.
    pub fn build<T, F>(&self, body: F) -> Result<Task<T>, TaskError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext<'_>) -> anyhow::Result<T> + Send + 'static,
    {
        self.create(self.options, Flags::empty(), false, Box::new(body))
    }

    /// Creates and starts a task.
    ///
    /// Scheduler failures do not fail the call: the returned task is faulted
    /// with the scheduler's error instead.
    pub fn spawn<T, F>(&self, body: F) -> Result<Task<T>, TaskError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext<'_>) -> anyhow::Result<T> + Send + 'static,
    {
        let task = self.build(body)?;
        match task.start() {
            Ok(()) | Err(TaskError::Scheduler(_)) => Ok(task),
            // Canceled at creation by an already signaled token.
            Err(TaskError::AlreadyStarted) if task.is_completed() => Ok(task),
            Err(err) => Err(err),
        }
    }

    /// A continuation task waiting for activation by the engine.
    pub(crate) fn create_continuation<T>(
        &self,
        options: ContinuationOptions,
        body: Body<T>,
    ) -> Result<Task<T>, TaskError>
    where
        T: Send + Sync + 'static,
    {
        self.create(
            options.creation_options(),
            Flags::WAITING_FOR_ACTIVATION,
            options.contains(ContinuationOptions::LAZY_CANCELLATION),
            body,
        )
    }

    fn create<T>(
        &self,
        options: TaskCreationOptions,
        initial: Flags,
        lazy_cancellation: bool,
        body: Body<T>,
    ) -> Result<Task<T>, TaskError>
    where
        T: Send + Sync + 'static,
    {
        if self.token.is_disposed() {
            return Err(TaskError::Disposed("cancellation source"));
        }

        let parent = self
            .parent
            .as_ref()
            .filter(|_| options.contains(TaskCreationOptions::ATTACHED_TO_PARENT))
            .filter(|p| !p.options().contains(TaskCreationOptions::DENY_CHILD_ATTACH))
            .filter(|p| p.header().try_attach_child())
            .map(TaskRef::downgrade);

        let header = Header::new(
            options,
            self.token.clone(),
            Some(self.scheduler.clone()),
            parent,
            initial,
        );

        let task = Task::new(header, Some(body));
        task.to_ref().register_cancellation(lazy_cancellation)?;

        tracing::trace!(task = %task.id(), ?options, "task created");
        Ok(task)
    }
}
