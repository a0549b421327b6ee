use crate::cancel::CancellationToken;
use crate::task::Id;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Acknowledgement that an operation observed a cancellation request.
///
/// A task body returns this error (usually through
/// [`TaskContext::throw_if_cancellation_requested`]) to transition its task to
/// [`Status::Canceled`]. The acknowledgement only counts when `token` is the
/// task's own token and that token has been signaled; otherwise the task
/// faults with this error as its fault.
///
/// [`TaskContext::throw_if_cancellation_requested`]: crate::task::TaskContext::throw_if_cancellation_requested
/// [`Status::Canceled`]: crate::task::Status::Canceled
#[derive(Debug, Clone)]
pub struct OperationCanceled {
    token: CancellationToken,
    task: Option<Id>,
}

impl OperationCanceled {
    pub fn new(token: CancellationToken) -> Self {
        Self { token, task: None }
    }

    pub(crate) fn for_task(id: Id, token: CancellationToken) -> Self {
        Self {
            token,
            task: Some(id),
        }
    }

    /// The token that was observed.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The canceled task, when this fault describes a task rather than a wait.
    pub fn task_id(&self) -> Option<Id> {
        self.task
    }
}

impl fmt::Display for OperationCanceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task {
            Some(id) => write!(f, "task {} was canceled", id),
            None => f.write_str("the operation was canceled"),
        }
    }
}

impl StdError for OperationCanceled {}

/// A single fault recorded on a task.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Fault {
    /// Cancellation surfaced as a fault, either because a task was canceled
    /// or because a body returned a cancellation it did not own.
    #[error(transparent)]
    Canceled(#[from] OperationCanceled),

    /// An error returned by a task body.
    #[error("{0}")]
    Error(Arc<anyhow::Error>),

    /// A task body panicked.
    #[error("task panicked: {0}")]
    Panic(String),

    /// The scheduler failed to queue or inline the task.
    #[error("scheduler failure: {0}")]
    Scheduler(Arc<anyhow::Error>),

    /// Faults of another task, e.g. an attached child.
    #[error(transparent)]
    Aggregate(#[from] AggregateFault),
}

impl Fault {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Fault::Canceled(_))
    }

    /// Looks for an error of type `E` inside an [`Fault::Error`].
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Fault::Error(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for Fault {
    /// Keeps the structure of faults that travel through bodies with `?`
    /// (waiting on a child, re-raising a fault) instead of burying them in an
    /// opaque error.
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<AggregateFault>() {
            Ok(aggregate) => return Fault::Aggregate(aggregate),
            Err(err) => err,
        };

        let err = match err.downcast::<Fault>() {
            Ok(fault) => return fault,
            Err(err) => err,
        };

        let err = match err.downcast::<OperationCanceled>() {
            Ok(canceled) => return Fault::Canceled(canceled),
            Err(err) => err,
        };

        match err.downcast::<TaskError>() {
            Ok(TaskError::Faulted(aggregate)) => Fault::Aggregate(aggregate),
            Ok(TaskError::Canceled(canceled)) => Fault::Canceled(canceled),
            Ok(TaskError::Scheduler(fault)) => fault,
            Ok(other) => Fault::Error(Arc::new(anyhow::Error::new(other))),
            Err(err) => Fault::Error(Arc::new(err)),
        }
    }
}

/// A container for one or more faults.
///
/// Waiting on a faulted or canceled task always reports an `AggregateFault`.
/// Faults of attached children appear as nested [`Fault::Aggregate`] entries;
/// use [`AggregateFault::flatten`] to get a flat list.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateFault {
    faults: Vec<Fault>,
}

impl AggregateFault {
    pub fn new(faults: impl IntoIterator<Item = Fault>) -> Self {
        Self {
            faults: faults.into_iter().collect(),
        }
    }

    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    pub fn into_faults(self) -> Vec<Fault> {
        self.faults
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    /// Recursively replaces nested aggregates by their contents, depth first,
    /// preserving the order in which faults appear.
    pub fn flatten(&self) -> AggregateFault {
        fn visit(faults: &[Fault], out: &mut Vec<Fault>) {
            for fault in faults {
                match fault {
                    Fault::Aggregate(inner) => visit(&inner.faults, out),
                    other => out.push(other.clone()),
                }
            }
        }

        let mut flat = Vec::with_capacity(self.faults.len());
        visit(&self.faults, &mut flat);
        AggregateFault { faults: flat }
    }

    /// Runs `predicate` over every fault. Faults for which it returns `false`
    /// are unhandled and returned in a new aggregate.
    pub fn handle<F>(&self, mut predicate: F) -> Result<(), AggregateFault>
    where
        F: FnMut(&Fault) -> bool,
    {
        let unhandled = self
            .faults
            .iter()
            .filter(|fault| !predicate(fault))
            .cloned()
            .collect::<Vec<_>>();

        if unhandled.is_empty() {
            Ok(())
        } else {
            Err(AggregateFault { faults: unhandled })
        }
    }

    /// True when every (flattened) fault is a cancellation.
    pub fn is_cancellation_only(&self) -> bool {
        let flat = self.flatten();
        !flat.is_empty() && flat.faults.iter().all(Fault::is_cancellation)
    }
}

impl fmt::Display for AggregateFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("one or more errors occurred")?;
        for fault in &self.faults {
            write!(f, " ({})", fault)?;
        }
        Ok(())
    }
}

impl StdError for AggregateFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.faults.first().map(|f| f as &(dyn StdError + 'static))
    }
}

// Identity-based: two `Error` faults are equal only if they share the same
// allocation, which is what cloning a recorded fault produces.
impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Fault::Canceled(a), Fault::Canceled(b)) => {
                a.task == b.task && a.token == b.token
            }
            (Fault::Error(a), Fault::Error(b)) => Arc::ptr_eq(a, b),
            (Fault::Panic(a), Fault::Panic(b)) => a == b,
            (Fault::Scheduler(a), Fault::Scheduler(b)) => Arc::ptr_eq(a, b),
            (Fault::Aggregate(a), Fault::Aggregate(b)) => a == b,
            _ => false,
        }
    }
}

/// A centralized error type for every engine operation.
#[derive(thiserror::Error, Debug, Clone)]
pub enum TaskError {
    #[error("task has already been started")]
    AlreadyStarted,

    /// Promise-style tasks and continuations are started by the engine.
    #[error("task cannot be started explicitly: {0}")]
    NotStartable(&'static str),

    #[error("{0} has been disposed")]
    Disposed(&'static str),

    #[error("argument `{0}` must not be empty")]
    EmptyCollection(&'static str),

    #[error("illegal option combination: {0}")]
    IllegalOptions(String),

    #[error("task has not completed")]
    NotCompleted,

    #[error("task has already completed")]
    AlreadyCompleted,

    /// The awaited task(s) faulted or were canceled.
    #[error(transparent)]
    Faulted(#[from] AggregateFault),

    /// The wait itself was canceled through its token.
    #[error(transparent)]
    Canceled(#[from] OperationCanceled),

    #[error("scheduler failure: {0}")]
    Scheduler(Fault),
}

impl TaskError {
    /// The aggregate carried by [`TaskError::Faulted`].
    pub fn as_aggregate(&self) -> Option<&AggregateFault> {
        match self {
            TaskError::Faulted(aggregate) => Some(aggregate),
            _ => None,
        }
    }

    /// True for a canceled wait, or for an aggregate made only of cancellations.
    pub fn is_canceled(&self) -> bool {
        match self {
            TaskError::Canceled(_) => true,
            TaskError::Faulted(aggregate) => aggregate.is_cancellation_only(),
            _ => false,
        }
    }
}
