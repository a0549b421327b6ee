use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, Ordering};

/// Lifecycle of a task as observed from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Built but not started.
    Created,
    /// Waiting for an antecedent, a combinator or a completion source.
    WaitingForActivation,
    /// Handed to a scheduler, not executing yet.
    WaitingToRun,
    Running,
    /// Body finished, attached children are still running.
    WaitingForChildrenToComplete,
    RanToCompletion,
    Canceled,
    Faulted,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::RanToCompletion | Status::Canceled | Status::Faulted
        )
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct Flags: u32 {
        /// Handed to a scheduler, or activated for continuations.
        const STARTED = 1;

        /// The body has been claimed for execution.
        const DELEGATE_INVOKED = 1 << 1;

        const DISPOSED = 1 << 2;

        /// Someone looked at the fault, no need to warn on drop.
        const FAULT_OBSERVED = 1 << 3;

        /// The body (or a cancel path) acknowledged the task's own token.
        const CANCELLATION_ACKNOWLEDGED = 1 << 4;

        const FAULTED = 1 << 5;
        const CANCELED = 1 << 6;
        const RAN_TO_COMPLETION = 1 << 7;

        const WAITING_ON_CHILDREN = 1 << 8;
        const WAITING_FOR_ACTIVATION = 1 << 9;

        /// Completion claimed without running the body: cancellation,
        /// scheduler failure or a promise commit.
        const COMPLETION_RESERVED = 1 << 10;

        /// Completed by a completion source, never executed.
        const PROMISE = 1 << 11;

        const TERMINAL = Self::FAULTED.bits() | Self::CANCELED.bits() | Self::RAN_TO_COMPLETION.bits();
    }
}

impl Flags {
    pub(crate) fn status(self) -> Status {
        if self.contains(Flags::FAULTED) {
            Status::Faulted
        } else if self.contains(Flags::CANCELED) {
            Status::Canceled
        } else if self.contains(Flags::RAN_TO_COMPLETION) {
            Status::RanToCompletion
        } else if self.contains(Flags::WAITING_ON_CHILDREN) {
            Status::WaitingForChildrenToComplete
        } else if self.contains(Flags::DELEGATE_INVOKED) {
            Status::Running
        } else if self.contains(Flags::STARTED) {
            Status::WaitingToRun
        } else if self.intersects(Flags::WAITING_FOR_ACTIVATION | Flags::PROMISE) {
            Status::WaitingForActivation
        } else {
            Status::Created
        }
    }

    pub(crate) fn is_terminal(self) -> bool {
        self.intersects(Flags::TERMINAL)
    }
}

/// Task state flags, updated atomically.
#[derive(Debug)]
pub(crate) struct State(AtomicU32);

impl State {
    pub(crate) fn new(initial: Flags) -> Self {
        State(AtomicU32::new(initial.bits()))
    }

    pub(crate) fn load(&self) -> Flags {
        Flags::from_bits_retain(self.0.load(Ordering::Acquire))
    }

    /// Sets `flags`, returning the previous value.
    pub(crate) fn set(&self, flags: Flags) -> Flags {
        Flags::from_bits_retain(self.0.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// CAS loop: `f` maps the current flags to the new ones, or `None` to give
    /// up. Returns the flags observed before the update.
    fn update<F>(&self, mut f: F) -> Result<Flags, Flags>
    where
        F: FnMut(Flags) -> Option<Flags>,
    {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                f(Flags::from_bits_retain(bits)).map(|next| next.bits())
            })
            .map(Flags::from_bits_retain)
            .map_err(Flags::from_bits_retain)
    }

    /// Created -> WaitingToRun for an explicit start.
    pub(crate) fn transition_to_started(&self) -> Result<Flags, Flags> {
        self.update(|cur| {
            let refused = Flags::STARTED
                | Flags::COMPLETION_RESERVED
                | Flags::PROMISE
                | Flags::WAITING_FOR_ACTIVATION
                | Flags::TERMINAL;
            (!cur.intersects(refused)).then(|| cur | Flags::STARTED)
        })
    }

    /// Claims the right to run the body. Succeeds for exactly one caller, and
    /// only if nobody reserved completion first.
    pub(crate) fn claim_execution(&self) -> Result<Flags, Flags> {
        self.update(|cur| {
            let ok = cur.contains(Flags::STARTED)
                && !cur.intersects(Flags::DELEGATE_INVOKED | Flags::COMPLETION_RESERVED);
            ok.then(|| cur | Flags::DELEGATE_INVOKED)
        })
    }

    /// Claims the right to complete the task without running its body.
    pub(crate) fn reserve_completion(&self) -> Result<Flags, Flags> {
        self.update(|cur| {
            let taken = Flags::DELEGATE_INVOKED | Flags::COMPLETION_RESERVED;
            (!cur.intersects(taken)).then(|| cur | Flags::COMPLETION_RESERVED)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[rstest]
    #[case::created(Flags::empty(), Status::Created)]
    #[case::activation(Flags::WAITING_FOR_ACTIVATION, Status::WaitingForActivation)]
    #[case::promise(Flags::PROMISE, Status::WaitingForActivation)]
    #[case::activated(Flags::WAITING_FOR_ACTIVATION | Flags::STARTED, Status::WaitingToRun)]
    #[case::running(Flags::STARTED | Flags::DELEGATE_INVOKED, Status::Running)]
    #[case::children(
        Flags::STARTED | Flags::DELEGATE_INVOKED | Flags::WAITING_ON_CHILDREN,
        Status::WaitingForChildrenToComplete
    )]
    #[case::faulted(
        Flags::STARTED | Flags::WAITING_ON_CHILDREN | Flags::FAULTED,
        Status::Faulted
    )]
    #[case::canceled(Flags::COMPLETION_RESERVED | Flags::CANCELED, Status::Canceled)]
    #[case::ran(Flags::STARTED | Flags::DELEGATE_INVOKED | Flags::RAN_TO_COMPLETION, Status::RanToCompletion)]
    fn test_status(#[case] flags: Flags, #[case] expected: Status) {
        assert_eq!(flags.status(), expected);
        assert_eq!(flags.is_terminal(), expected.is_terminal());
    }

    #[test]
    fn test_transition_to_started() {
        let state = State::new(Flags::empty());
        assert!(state.transition_to_started().is_ok());
        assert!(state.transition_to_started().is_err());

        let state = State::new(Flags::WAITING_FOR_ACTIVATION);
        assert!(state.transition_to_started().is_err());

        let state = State::new(Flags::PROMISE);
        assert!(state.transition_to_started().is_err());
    }

    #[test]
    fn test_claim_requires_started() {
        let state = State::new(Flags::empty());
        assert!(state.claim_execution().is_err());

        state.set(Flags::STARTED);
        assert!(state.claim_execution().is_ok());
        assert!(state.claim_execution().is_err());
        assert!(state.reserve_completion().is_err());
    }

    #[test]
    fn test_claim_and_reserve_are_exclusive() {
        for _ in 0..64 {
            let state = Arc::new(State::new(Flags::STARTED));
            let winners = Arc::new(AtomicUsize::new(0));

            let handles = (0..4)
                .map(|i| {
                    let state = Arc::clone(&state);
                    let winners = Arc::clone(&winners);
                    thread::spawn(move || {
                        let won = if i % 2 == 0 {
                            state.claim_execution().is_ok()
                        } else {
                            state.reserve_completion().is_ok()
                        };
                        if won {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect::<Vec<_>>();

            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }
}
