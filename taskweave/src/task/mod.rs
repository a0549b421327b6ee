//! Tasks: units of work with a lifecycle, a result and continuations.
//!
//! A task moves from `Created` (or `WaitingForActivation`) through
//! `WaitingToRun` and `Running` to exactly one terminal state:
//! `RanToCompletion`, `Canceled` or `Faulted`. Tasks with attached children
//! pass through `WaitingForChildrenToComplete` after their body returns.

// Public API
mod completion;
pub use completion::TaskCompletionSource;

mod context;
pub use context::TaskContext;

mod factory;
pub use factory::TaskFactory;

pub mod id;
pub use id::Id;

mod options;
pub use options::{ContinuationOptions, TaskCreationOptions};

mod raw;
pub use raw::TaskRef;

mod state;
pub use state::Status;

#[allow(clippy::module_inception)]
mod task;
pub use task::Task;
pub(crate) use task::Outcome;

// Internals
mod cell;

pub(crate) mod continuation;
