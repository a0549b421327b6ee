//! Operations over groups of tasks.
//!
//! The blocking waits ([`wait_all`], [`wait_any`]) and the continuation
//! builders ([`continue_when_all`], [`continue_when_any`]) never cancel the
//! tasks they observe. `Task<Task<T>>::unwrap` flattens a task that produces
//! a task.

use crate::task::{Task, TaskRef};

mod unwrap;

mod wait;
pub use wait::{wait_all, wait_all_timeout, wait_all_with, wait_any, wait_any_timeout, wait_any_with};

mod when;
pub use when::{continue_when_all, continue_when_any};


/// A task a multi-antecedent continuation can wait on.
///
/// Implemented for typed [`Task`]s, whose results the continuation body can
/// read, and for type-erased [`TaskRef`]s.
pub trait Antecedent: Clone + Send + Sync + 'static {
    fn task_ref(&self) -> TaskRef;
}

impl<T: Send + Sync + 'static> Antecedent for Task<T> {
    fn task_ref(&self) -> TaskRef {
        self.to_ref()
    }
}

impl Antecedent for TaskRef {
    fn task_ref(&self) -> TaskRef {
        self.clone()
    }
}
