use crate::cancel::{CancellationToken, Registration};
use crate::error::{AggregateFault, Fault, TaskError};
use crate::utils::{CompletionEvent, payload_as_str};
use parking_lot::Mutex;
use slab::Slab;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

pub(super) type Callback = Box<dyn FnOnce() + Send + 'static>;

const IDLE: u8 = 0;
const NOTIFYING: u8 = 1;
const NOTIFIED: u8 = 2;

/// Registered observers. `seq` orders them since slab keys are recycled.
#[derive(Default)]
pub(super) struct Callbacks {
    entries: Slab<(u64, Callback)>,
    seq: u64,
}

pub(super) struct SourceInner {
    state: AtomicU8,
    disposed: AtomicBool,

    // `None` once notification started: late registrations run inline.
    callbacks: Mutex<Option<Callbacks>>,

    // Set when signaled, for blocking waits on the token.
    event: CompletionEvent,

    // Upstream registrations of a linked source.
    links: Mutex<Vec<Registration>>,
}

impl SourceInner {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            disposed: AtomicBool::new(false),
            callbacks: Mutex::new(Some(Callbacks::default())),
            event: CompletionEvent::new(),
            links: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn new_canceled() -> Self {
        let inner = Self::new();
        inner.state.store(NOTIFIED, Ordering::Release);
        inner.callbacks.lock().take();
        inner.event.set();
        inner
    }

    pub(super) fn is_cancellation_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    pub(super) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(super) fn event(&self) -> &CompletionEvent {
        &self.event
    }

    /// Stores `callback` or, when notification already started, hands it back
    /// so the caller runs it.
    pub(super) fn register(&self, callback: Callback) -> Result<(usize, u64), Callback> {
        let mut guard = self.callbacks.lock();
        match guard.as_mut() {
            Some(callbacks) => {
                let seq = callbacks.seq;
                callbacks.seq += 1;
                let key = callbacks.entries.insert((seq, callback));
                Ok((key, seq))
            }
            None => Err(callback),
        }
    }

    pub(super) fn unregister(&self, key: usize, seq: u64) -> bool {
        let mut guard = self.callbacks.lock();
        let Some(callbacks) = guard.as_mut() else {
            return false;
        };

        match callbacks.entries.get(key) {
            Some((found, _)) if *found == seq => {
                callbacks.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub(super) fn cancel(&self) -> Result<(), TaskError> {
        if self.is_disposed() {
            return Err(TaskError::Disposed("cancellation source"));
        }

        if self
            .state
            .compare_exchange(IDLE, NOTIFYING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let callbacks = self.callbacks.lock().take();
        self.event.set();

        let mut entries = callbacks
            .map(|c| c.entries.into_iter().map(|(_, entry)| entry).collect::<Vec<_>>())
            .unwrap_or_default();
        entries.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let mut panics = Vec::new();
        for (seq, callback) in entries {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                let msg = payload_as_str(&payload).to_string();
                tracing::warn!(callback = seq, panic = %msg, "cancellation callback panicked");
                panics.push(Fault::Panic(msg));
            }
        }

        self.state.store(NOTIFIED, Ordering::Release);

        if panics.is_empty() {
            Ok(())
        } else {
            Err(TaskError::Faulted(AggregateFault::new(panics)))
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Observers of a disposed source are dropped without running.
        if let Some(callbacks) = self.callbacks.lock().as_mut() {
            callbacks.entries.clear();
        }
        self.unlink();
    }

    fn unlink(&self) {
        for registration in self.links.lock().drain(..) {
            registration.unregister();
        }
    }
}

impl Drop for SourceInner {
    fn drop(&mut self) {
        self.unlink();
    }
}

/// Signals cancellation to every [`CancellationToken`] it hands out.
///
/// ```
/// use taskweave::cancel::CancellationSource;
///
/// let source = CancellationSource::new();
/// let token = source.token();
/// assert!(!token.is_cancellation_requested());
///
/// source.cancel().unwrap();
/// assert!(token.is_cancellation_requested());
/// ```
pub struct CancellationSource {
    inner: Arc<SourceInner>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SourceInner::new()),
        }
    }

    /// Creates a source that is signaled as soon as any of `tokens` is.
    ///
    /// If one of them is already signaled, the returned source starts
    /// signaled. Tokens that can never be canceled are ignored.
    pub fn linked(tokens: &[CancellationToken]) -> Result<Self, TaskError> {
        let source = Self::new();

        for token in tokens.iter().filter(|t| t.can_be_canceled()) {
            let weak: Weak<SourceInner> = Arc::downgrade(&source.inner);
            let registration = token.register(move || {
                if let Some(inner) = weak.upgrade() {
                    // Panicking downstream observers were already logged.
                    let _ = inner.cancel();
                }
            })?;
            source.inner.links.lock().push(registration);
        }

        Ok(source)
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken::from_inner(Arc::clone(&self.inner))
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.is_cancellation_requested()
    }

    /// Signals cancellation and runs every registered observer, newest first.
    ///
    /// Only the first call does anything. Observers that panic do not stop the
    /// others; their panics are returned together once all of them ran.
    pub fn cancel(&self) -> Result<(), TaskError> {
        self.inner.cancel()
    }

    /// Releases the source. Pending observers are dropped, links to upstream
    /// tokens are removed, and later calls to `cancel` or to `register`/`wait`
    /// on its tokens fail with [`TaskError::Disposed`].
    pub fn dispose(&self) {
        self.inner.dispose()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSource")
            .field("canceled", &self.is_cancellation_requested())
            .field("disposed", &self.inner.is_disposed())
            .finish()
    }
}
