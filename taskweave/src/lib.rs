//! A task-parallel execution engine.
//!
//! Tasks are units of work with a lifecycle, a result and a fault tree. They
//! run on a pluggable [`scheduler`], chain through continuations, cooperate
//! with [`cancel`]lation and compose with the [`combinator`]s.
//!
//! ```
//! use taskweave::cancel::CancellationSource;
//! use taskweave::scheduler::{SchedulerRef, ThreadPool};
//! use taskweave::task::{ContinuationOptions, TaskFactory};
//!
//! let pool: SchedulerRef = ThreadPool::builder().worker_threads(2).try_build().unwrap();
//! let source = CancellationSource::new();
//! let factory = TaskFactory::new(pool).with_token(source.token());
//!
//! let answer = factory.spawn(|_| Ok(6 * 7)).unwrap();
//! let doubled = answer
//!     .continue_with(&factory, ContinuationOptions::empty(), |ante, _| {
//!         Ok(*ante.result()? * 2)
//!     })
//!     .unwrap();
//!
//! assert_eq!(*doubled.result().unwrap(), 84);
//! ```

pub mod cancel;

pub mod collections;

pub mod combinator;

pub mod error;
pub use error::{AggregateFault, Fault, OperationCanceled, TaskError};

pub mod scheduler;

pub mod task;
pub use task::{Task, TaskCompletionSource, TaskFactory, TaskRef};

pub(crate) mod utils;

#[cfg(test)]
pub(crate) mod test_utils;
