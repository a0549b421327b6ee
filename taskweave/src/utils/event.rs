use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A one-shot, manual-reset event threads can block on.
///
/// Once set it stays set. Used to park threads waiting on task completion and
/// on cancellation tokens.
#[derive(Debug, Default)]
pub(crate) struct CompletionEvent {
    set: Mutex<bool>,
    cond: Condvar,
}

impl CompletionEvent {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self) {
        let mut set = self.set.lock();
        if !*set {
            *set = true;
            self.cond.notify_all();
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Blocks until the event is set or `timeout` elapses. `None` waits forever.
    /// Returns whether the event is set.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut set = self.set.lock();
        match timeout {
            None => {
                while !*set {
                    self.cond.wait(&mut set);
                }
            }
            Some(timeout) => {
                // An overflowing deadline is as good as no deadline.
                let Some(deadline) = Instant::now().checked_add(timeout) else {
                    while !*set {
                        self.cond.wait(&mut set);
                    }
                    return true;
                };

                while !*set {
                    if self.cond.wait_until(&mut set, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *set
    }
}
