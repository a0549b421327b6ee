//! Cooperative cancellation.
//!
//! A [`CancellationSource`] owns the right to signal; [`CancellationToken`]s
//! are cheap read-only views handed to tasks and waits. Signaling is one-way
//! and happens at most once. Observers registered on a token run exactly once,
//! either on the thread that signals or, if the token is already signaled,
//! immediately on the registering thread.

mod source;
pub use source::CancellationSource;

mod token;
pub use token::{CancellationToken, Registration};

#[cfg(test)]
mod tests;
