use crate::cancel::source::{Callback, SourceInner};
use crate::error::{OperationCanceled, TaskError};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// A read-only view on a [`CancellationSource`].
///
/// Two tokens are equal when they observe the same source. The token returned
/// by [`CancellationToken::none`] can never be canceled and equals any other
/// `none` token.
///
/// [`CancellationSource`]: crate::cancel::CancellationSource
#[derive(Clone, Default)]
pub struct CancellationToken {
    source: Option<Arc<SourceInner>>,
}

impl CancellationToken {
    pub(super) fn from_inner(inner: Arc<SourceInner>) -> Self {
        Self {
            source: Some(inner),
        }
    }

    pub fn none() -> Self {
        Self { source: None }
    }

    /// A token that is already signaled.
    pub fn canceled() -> Self {
        Self::from_inner(Arc::new(SourceInner::new_canceled()))
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|s| s.is_cancellation_requested())
    }

    pub fn can_be_canceled(&self) -> bool {
        self.source.is_some()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_disposed())
    }

    pub fn throw_if_cancellation_requested(&self) -> Result<(), OperationCanceled> {
        if self.is_cancellation_requested() {
            Err(OperationCanceled::new(self.clone()))
        } else {
            Ok(())
        }
    }

    /// Registers `callback` to run once when the token is signaled.
    ///
    /// If the token is already signaled the callback runs right away on this
    /// thread and the returned registration is inert.
    pub fn register<F>(&self, callback: F) -> Result<Registration, TaskError>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(source) = &self.source else {
            return Ok(Registration::inert());
        };

        if source.is_disposed() {
            return Err(TaskError::Disposed("cancellation source"));
        }

        match source.register(Box::new(callback) as Callback) {
            Ok((key, seq)) => Ok(Registration {
                source: Some(Arc::downgrade(source)),
                key,
                seq,
            }),
            Err(callback) => {
                callback();
                Ok(Registration::inert())
            }
        }
    }

    /// Blocks until the token is signaled or `timeout` elapses (`None` waits
    /// forever). Returns whether the token is signaled.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool, TaskError> {
        let Some(source) = &self.source else {
            match timeout {
                Some(timeout) => thread::sleep(timeout),
                None => loop {
                    thread::park();
                },
            }
            return Ok(false);
        };

        if source.is_disposed() {
            return Err(TaskError::Disposed("cancellation source"));
        }

        Ok(source.event().wait(timeout))
    }
}

impl PartialEq for CancellationToken {
    fn eq(&self, other: &Self) -> bool {
        match (&self.source, &other.source) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for CancellationToken {}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            None => f.write_str("CancellationToken(none)"),
            Some(source) => f
                .debug_struct("CancellationToken")
                .field("source", &Arc::as_ptr(source))
                .field("canceled", &source.is_cancellation_requested())
                .finish(),
        }
    }
}

/// Handle to an observer registered with [`CancellationToken::register`].
///
/// Dropping it leaves the observer registered.
#[derive(Debug, Default)]
pub struct Registration {
    source: Option<Weak<SourceInner>>,
    key: usize,
    seq: u64,
}

impl Registration {
    fn inert() -> Self {
        Self::default()
    }

    /// Removes the observer. Returns `false` if it already ran, is running, or
    /// was removed before.
    pub fn unregister(self) -> bool {
        self.source
            .and_then(|weak| weak.upgrade())
            .is_some_and(|source| source.unregister(self.key, self.seq))
    }
}
