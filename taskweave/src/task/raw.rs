use crate::cancel::{CancellationToken, Registration};
use crate::error::{AggregateFault, Fault, OperationCanceled, TaskError};
use crate::scheduler::SchedulerRef;
use crate::task::continuation::Continuation;
use crate::task::state::{Flags, State};
use crate::task::{Id, Status, TaskContext, TaskCreationOptions};
use crate::utils::{CompletionEvent, guarded};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// How a body failed, before classification into a [`Fault`].
pub(crate) enum BodyFailure {
    Error(anyhow::Error),
    Panic(String),
}

/// Type-erased half of a task: everything except the body and its value.
pub(crate) trait RawTask: Send + Sync + 'static {
    fn header(&self) -> &Header;

    /// Runs the body and stores its value. Only called by the thread that won
    /// the execution claim.
    fn run_body(&self, cx: &TaskContext<'_>) -> Result<(), BodyFailure>;

    /// Drops a body that will never run, releasing whatever it captured.
    fn discard_body(&self);
}

/// Most tasks have zero or one continuation.
const INLINE_CONTINUATIONS: usize = 2;

pub(crate) struct Header {
    id: Id,
    pub(super) state: State,
    options: TaskCreationOptions,
    token: CancellationToken,
    scheduler: Option<SchedulerRef>,

    /// Set only when attached; the parent owns no reference back.
    parent: Option<Weak<dyn RawTask>>,

    /// Starts at 1 for the task itself, +1 per attached child.
    countdown: AtomicUsize,

    faults: Mutex<Vec<Fault>>,
    child_faults: Mutex<Vec<Fault>>,

    /// Written once, before the FAULTED flag is published.
    fault: OnceLock<AggregateFault>,

    /// Token that canceled a promise, when it differs from `token`.
    canceled_by: OnceLock<CancellationToken>,

    /// `None` once the task completed and its continuations were taken.
    continuations: Mutex<Option<SmallVec<[Continuation; INLINE_CONTINUATIONS]>>>,

    /// Self reference held while the body is done but children are running.
    keep_alive: Mutex<Option<TaskRef>>,

    registration: Mutex<Option<Registration>>,
}

impl Header {
    pub(crate) fn new(
        options: TaskCreationOptions,
        token: CancellationToken,
        scheduler: Option<SchedulerRef>,
        parent: Option<Weak<dyn RawTask>>,
        initial: Flags,
    ) -> Self {
        Self {
            id: Id::next(),
            state: State::new(initial),
            options,
            token,
            scheduler,
            parent,
            countdown: AtomicUsize::new(1),
            faults: Mutex::new(Vec::new()),
            child_faults: Mutex::new(Vec::new()),
            fault: OnceLock::new(),
            canceled_by: OnceLock::new(),
            continuations: Mutex::new(Some(SmallVec::new())),
            keep_alive: Mutex::new(None),
            registration: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn status(&self) -> Status {
        self.state.load().status()
    }

    pub(crate) fn options(&self) -> TaskCreationOptions {
        self.options
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn scheduler(&self) -> Option<&SchedulerRef> {
        self.scheduler.as_ref()
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.state.load().is_terminal()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.load().contains(Flags::DISPOSED)
    }

    pub(crate) fn dispose(&self) -> Result<(), TaskError> {
        if !self.is_completed() {
            return Err(TaskError::NotCompleted);
        }
        self.state.set(Flags::DISPOSED);
        Ok(())
    }

    /// The fault of a faulted task. Reading it marks it observed.
    pub(crate) fn fault(&self) -> Option<&AggregateFault> {
        if !self.state.load().contains(Flags::FAULTED) {
            return None;
        }
        self.state.set(Flags::FAULT_OBSERVED);
        self.fault.get()
    }

    /// What a waiter sees on a task that did not run to completion.
    pub(crate) fn completion_fault(&self) -> AggregateFault {
        if let Some(fault) = self.fault() {
            return fault.clone();
        }

        let token = self.canceled_by();
        AggregateFault::new([Fault::Canceled(OperationCanceled::for_task(self.id, token))])
    }

    /// The token a canceled task reports.
    pub(crate) fn canceled_by(&self) -> CancellationToken {
        self.canceled_by
            .get()
            .cloned()
            .unwrap_or_else(|| self.token.clone())
    }

    /// `Ok` for RanToCompletion, the waiter's fault for the other terminal
    /// states.
    pub(crate) fn outcome(&self) -> Result<(), TaskError> {
        match self.status() {
            Status::RanToCompletion => Ok(()),
            Status::Faulted | Status::Canceled => Err(TaskError::Faulted(self.completion_fault())),
            _ => Err(TaskError::NotCompleted),
        }
    }

    pub(crate) fn record_fault(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    pub(crate) fn record_faults(&self, faults: impl IntoIterator<Item = Fault>) {
        self.faults.lock().extend(faults);
    }

    pub(crate) fn acknowledge_cancellation(&self, canceled_by: Option<CancellationToken>) {
        if let Some(token) = canceled_by {
            let _ = self.canceled_by.set(token);
        }
        self.state.set(Flags::CANCELLATION_ACKNOWLEDGED);
    }

    fn record_body_failure(&self, failure: BodyFailure) {
        match failure {
            BodyFailure::Panic(msg) => self.record_fault(Fault::Panic(msg)),
            BodyFailure::Error(err) if self.is_own_cancellation(&err) => {
                self.acknowledge_cancellation(None)
            }
            BodyFailure::Error(err) => self.record_fault(Fault::from(err)),
        }
    }

    /// A body acknowledges cancellation by returning the task's own token,
    /// once that token is signaled.
    fn is_own_cancellation(&self, err: &anyhow::Error) -> bool {
        let observed = err.downcast_ref::<OperationCanceled>().or_else(|| {
            match err.downcast_ref::<TaskError>() {
                Some(TaskError::Canceled(canceled)) => Some(canceled),
                _ => None,
            }
        });

        observed.is_some_and(|canceled| {
            *canceled.token() == self.token && self.token.is_cancellation_requested()
        })
    }

    /// Accounts for one more attached child. Fails once the task completed.
    pub(crate) fn try_attach_child(&self) -> bool {
        self.countdown
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_child_slot(&self) {
        if self.countdown.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish_stage_two();
        }
    }

    /// Body finished. Completes now, or once the last attached child does.
    fn finish_stage_one(&self, me: &TaskRef) {
        if self.countdown.load(Ordering::Acquire) > 1 {
            *self.keep_alive.lock() = Some(me.clone());
        }

        if self.countdown.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish_stage_two();
        } else {
            self.state.set(Flags::WAITING_ON_CHILDREN);
        }
    }

    /// Picks the terminal state and publishes it. Faults win over
    /// cancellation, which wins over success.
    pub(crate) fn finish_stage_two(&self) {
        let mut faults = std::mem::take(&mut *self.faults.lock());
        faults.append(&mut self.child_faults.lock());

        let terminal = if !faults.is_empty() {
            let _ = self.fault.set(AggregateFault::new(faults));
            Flags::FAULTED
        } else if self.state.load().contains(Flags::CANCELLATION_ACKNOWLEDGED) {
            Flags::CANCELED
        } else {
            Flags::RAN_TO_COMPLETION
        };

        self.state.set(terminal);
        tracing::trace!(task = %self.id, status = ?terminal.status(), "task completed");

        self.finish_stage_three();
    }

    fn finish_stage_three(&self) {
        if let Some(registration) = self.registration.lock().take() {
            registration.unregister();
        }

        let keep_alive = self.keep_alive.lock().take();

        self.notify_parent();
        self.fire_continuations();

        drop(keep_alive);
    }

    fn notify_parent(&self) {
        let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        parent.header().process_child_completion(self);
    }

    fn process_child_completion(&self, child: &Header) {
        if child.state.load().contains(Flags::FAULTED)
            && let Some(fault) = child.fault()
        {
            self.child_faults.lock().push(Fault::Aggregate(fault.clone()));
        }

        self.release_child_slot();
    }

    /// Waiters are woken last so that they observe dispatched continuations.
    fn fire_continuations(&self) {
        let Some(continuations) = self.continuations.lock().take() else {
            return;
        };

        let status = self.status();
        let allow_inline = self.allows_inline_continuations();

        let (waiters, others): (Vec<_>, Vec<_>) = continuations
            .into_iter()
            .partition(Continuation::is_waiter);

        for continuation in others.into_iter().chain(waiters) {
            continuation.fire(status, allow_inline);
        }
    }

    fn allows_inline_continuations(&self) -> bool {
        !self
            .options
            .contains(TaskCreationOptions::RUN_CONTINUATIONS_ASYNCHRONOUSLY)
    }

    /// Hands back the continuation if the task already completed.
    fn add_continuation(&self, continuation: Continuation) -> Result<(), Continuation> {
        match self.continuations.lock().as_mut() {
            Some(list) => {
                list.push(continuation);
                Ok(())
            }
            None => Err(continuation),
        }
    }

    fn remove_waiter(&self, event: &Arc<CompletionEvent>) {
        if let Some(list) = self.continuations.lock().as_mut() {
            list.retain(|c| !c.is_waiter_for(event));
        }
    }
}

impl Drop for Header {
    fn drop(&mut self) {
        let flags = self.state.load();
        if flags.contains(Flags::FAULTED) && !flags.contains(Flags::FAULT_OBSERVED) {
            tracing::warn!(
                task = %self.id,
                fault = %self.fault.get().map(ToString::to_string).unwrap_or_default(),
                "faulted task dropped without its fault being observed"
            );
        }
    }
}

/// A type-erased, reference counted handle to a task.
///
/// This is what schedulers receive. It exposes the task's identity and status
/// and the single entry point to run it, [`TaskRef::execute`].
#[derive(Clone)]
pub struct TaskRef {
    raw: Arc<dyn RawTask>,
}

impl TaskRef {
    pub(crate) fn new(raw: Arc<dyn RawTask>) -> Self {
        Self { raw }
    }

    pub(crate) fn header(&self) -> &Header {
        self.raw.header()
    }

    pub(crate) fn downgrade(&self) -> Weak<dyn RawTask> {
        Arc::downgrade(&self.raw)
    }

    pub fn id(&self) -> Id {
        self.header().id()
    }

    pub fn status(&self) -> Status {
        self.header().status()
    }

    pub fn options(&self) -> TaskCreationOptions {
        self.header().options()
    }

    pub fn is_completed(&self) -> bool {
        self.header().is_completed()
    }

    /// The fault of a faulted task.
    pub fn fault(&self) -> Option<&AggregateFault> {
        self.header().fault()
    }

    /// True if both handles refer to the same task.
    pub fn ptr_eq(&self, other: &TaskRef) -> bool {
        ptr::addr_eq(Arc::as_ptr(&self.raw), Arc::as_ptr(&other.raw))
    }

    /// Runs the task's body on the calling thread.
    ///
    /// Exactly one call per task does anything: later calls, calls racing with
    /// another executor, and calls on tasks canceled or faulted before they
    /// ran return `false` without side effects.
    pub fn execute(&self) -> bool {
        let header = self.header();
        if header.state.claim_execution().is_err() {
            return false;
        }

        let cx = TaskContext::new(self);
        if let Err(failure) = self.raw.run_body(&cx) {
            header.record_body_failure(failure);
        }

        header.finish_stage_one(self);
        true
    }

    /// Blocks until the task completes. Faulted and canceled tasks report
    /// their [`AggregateFault`] through [`TaskError::Faulted`].
    pub fn wait(&self) -> Result<(), TaskError> {
        self.wait_with(None, &CancellationToken::none()).map(|_| ())
    }

    /// Like [`TaskRef::wait`], returning `Ok(false)` if `timeout` elapses or
    /// [`TaskError::Canceled`] if `token` fires first.
    pub fn wait_with(
        &self,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<bool, TaskError> {
        let header = self.header();
        if header.is_disposed() {
            return Err(TaskError::Disposed("task"));
        }
        token.throw_if_cancellation_requested()?;

        if !header.is_completed() {
            self.try_inline_for_wait(timeout, token);
        }

        if !header.is_completed() && !self.block_until_completed(timeout, token)? {
            return Ok(false);
        }

        header.outcome().map(|()| true)
    }

    /// Blocks without trying to run the task. Returns `Ok(false)` on timeout.
    pub(crate) fn block_until_completed(
        &self,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<bool, TaskError> {
        let event = Arc::new(CompletionEvent::new());
        if !self.add_waiter(&event) {
            return Ok(true);
        }

        let registration = {
            let event = Arc::clone(&event);
            token.register(move || event.set())
        };
        let registration = match registration {
            Ok(registration) => registration,
            Err(err) => {
                self.remove_waiter(&event);
                return Err(err);
            }
        };

        event.wait(timeout);
        registration.unregister();

        if self.is_completed() {
            return Ok(true);
        }

        self.remove_waiter(&event);
        token.throw_if_cancellation_requested()?;
        Ok(false)
    }

    /// Sets `event` once the task completes. Returns `false`, registering
    /// nothing, if it already did.
    pub(crate) fn add_waiter(&self, event: &Arc<CompletionEvent>) -> bool {
        self.header()
            .add_continuation(Continuation::Waiter(Arc::clone(event)))
            .is_ok()
    }

    /// Drops a waiter that gave up before the task completed.
    pub(crate) fn remove_waiter(&self, event: &Arc<CompletionEvent>) {
        self.header().remove_waiter(event);
    }

    #[cfg(test)]
    pub(crate) fn pending_continuations(&self) -> usize {
        self.header()
            .continuations
            .lock()
            .as_ref()
            .map_or(0, |list| list.len())
    }

    /// A waiting thread may run a queued task itself rather than block.
    ///
    /// Only unbounded waits do so: a timeout or a cancelable token must be
    /// able to release the waiter, which a body running on its thread would
    /// prevent.
    pub(crate) fn try_inline_for_wait(&self, timeout: Option<Duration>, token: &CancellationToken) {
        if timeout.is_some() || token.can_be_canceled() {
            return;
        }

        let header = self.header();
        let flags = header.state.load();
        if !flags.contains(Flags::STARTED)
            || flags.intersects(Flags::DELEGATE_INVOKED | Flags::COMPLETION_RESERVED)
        {
            return;
        }

        let Some(scheduler) = header.scheduler() else {
            return;
        };

        if let Err(err) = guarded(|| scheduler.try_execute_inline(self, true)) {
            self.fault_from_scheduler(err);
        }
    }

    /// Created -> WaitingToRun, then hands the task to its scheduler.
    pub(crate) fn start(&self) -> Result<(), TaskError> {
        self.transition_to_started()?;

        let Some(scheduler) = self.header().scheduler() else {
            return Ok(());
        };

        guarded(|| scheduler.queue(self.clone()))
            .map_err(|err| TaskError::Scheduler(self.fault_from_scheduler(err)))
    }

    pub(crate) fn transition_to_started(&self) -> Result<(), TaskError> {
        let header = self.header();
        if header.is_disposed() {
            return Err(TaskError::Disposed("task"));
        }

        let flags = header.state.load();
        if flags.contains(Flags::PROMISE) {
            return Err(TaskError::NotStartable("task is completed by a completion source"));
        }
        if flags.contains(Flags::WAITING_FOR_ACTIVATION) {
            return Err(TaskError::NotStartable("continuations are started by their antecedents"));
        }

        // Anything past Created, including a task canceled before it was
        // started, counts as started.
        header
            .state
            .transition_to_started()
            .map(|_| ())
            .map_err(|_| TaskError::AlreadyStarted)
    }

    /// Starts a continuation whose antecedent completed. `inline` asks to run
    /// it on this thread first.
    pub(crate) fn activate(&self, inline: bool) {
        let header = self.header();
        if header.state.set(Flags::STARTED).contains(Flags::STARTED) {
            return;
        }

        let Some(scheduler) = header.scheduler() else {
            return;
        };

        if inline {
            match guarded(|| scheduler.try_execute_inline(self, false)) {
                Ok(true) => return,
                Ok(false) => {}
                Err(err) => {
                    self.fault_from_scheduler(err);
                    return;
                }
            }
        }

        if let Err(err) = guarded(|| scheduler.queue(self.clone())) {
            self.fault_from_scheduler(err);
        }
    }

    /// Completes a task that has not run yet as canceled. Loses against a
    /// concurrent execution or any other completion.
    pub(crate) fn cancel_unstarted(&self) -> bool {
        let header = self.header();
        if header.state.reserve_completion().is_err() {
            return false;
        }

        if let Some(scheduler) = header.scheduler() {
            let _ = guarded(|| Ok(scheduler.try_dequeue(self)));
        }

        self.raw.discard_body();
        header.acknowledge_cancellation(None);
        header.finish_stage_two();
        true
    }

    /// Faults a task its scheduler failed to queue or run. Returns the
    /// recorded fault.
    pub(crate) fn fault_from_scheduler(&self, err: anyhow::Error) -> Fault {
        let header = self.header();
        let fault = Fault::Scheduler(Arc::new(err));
        tracing::warn!(task = %header.id(), error = %fault, "scheduler failure, faulting task");

        if header.state.reserve_completion().is_ok() {
            self.raw.discard_body();
            header.record_fault(fault.clone());
            header.finish_stage_two();
        }
        fault
    }

    /// Cancels the task when its token fires, unless the task is a lazily
    /// canceled continuation. An already signaled token cancels right away.
    pub(crate) fn register_cancellation(&self, lazy: bool) -> Result<(), TaskError> {
        let header = self.header();
        let token = header.token();

        if lazy || !token.can_be_canceled() {
            return Ok(());
        }

        if token.is_cancellation_requested() {
            self.cancel_unstarted();
            return Ok(());
        }

        let weak = self.downgrade();
        let registration = token.register(move || {
            if let Some(raw) = weak.upgrade() {
                TaskRef::new(raw).cancel_unstarted();
            }
        });

        match registration {
            Ok(registration) => {
                *header.registration.lock() = Some(registration);
                // Completed while registering: stage three already ran.
                if header.is_completed()
                    && let Some(registration) = header.registration.lock().take()
                {
                    registration.unregister();
                }
                Ok(())
            }
            Err(err) => {
                self.cancel_unstarted();
                Err(err)
            }
        }
    }

    /// Fires `continuation` when the task completes, or right away if it
    /// already did.
    pub(crate) fn attach_continuation(&self, continuation: Continuation) {
        let header = self.header();
        if let Err(continuation) = header.add_continuation(continuation) {
            continuation.fire(header.status(), header.allows_inline_continuations());
        }
    }

    /// Runs `action` once the task is terminal.
    pub(crate) fn on_completed<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.attach_continuation(Continuation::Action(Box::new(action)));
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for TaskRef {}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}
