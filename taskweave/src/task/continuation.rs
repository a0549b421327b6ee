use crate::task::state::Flags;
use crate::task::{ContinuationOptions, Status, TaskRef};
use crate::utils::CompletionEvent;
use std::fmt;
use std::sync::Arc;

/// Something to do once a task reaches a terminal state.
pub(crate) enum Continuation {
    /// A continuation task, filtered and scheduled according to `options`.
    Task {
        task: TaskRef,
        options: ContinuationOptions,
    },

    /// Engine-internal callback, used by combinators and proxies.
    Action(Box<dyn FnOnce() + Send + 'static>),

    /// A blocked waiter.
    Waiter(Arc<CompletionEvent>),
}

impl Continuation {
    pub(crate) fn is_waiter(&self) -> bool {
        matches!(self, Continuation::Waiter(_))
    }

    pub(crate) fn is_waiter_for(&self, event: &Arc<CompletionEvent>) -> bool {
        matches!(self, Continuation::Waiter(e) if Arc::ptr_eq(e, event))
    }

    /// `allow_inline` is false when the antecedent asked for its continuations
    /// to always run asynchronously.
    pub(crate) fn fire(self, antecedent: Status, allow_inline: bool) {
        match self {
            Continuation::Task { task, options } => {
                let header = task.header();
                if header
                    .state
                    .load()
                    .intersects(Flags::COMPLETION_RESERVED | Flags::TERMINAL)
                {
                    return;
                }

                if header.token().is_cancellation_requested()
                    || !options.is_satisfied_by(antecedent)
                {
                    task.cancel_unstarted();
                    return;
                }

                let inline =
                    allow_inline && options.contains(ContinuationOptions::EXECUTE_SYNCHRONOUSLY);
                task.activate(inline);
            }
            Continuation::Action(action) => action(),
            Continuation::Waiter(event) => event.set(),
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Continuation::Task { task, options } => f
                .debug_struct("Task")
                .field("task", task)
                .field("options", options)
                .finish(),
            Continuation::Action(_) => f.write_str("Action"),
            Continuation::Waiter(_) => f.write_str("Waiter"),
        }
    }
}
