use crate::cancel::CancellationToken;
use crate::error::{AggregateFault, TaskError};
use crate::task::{Status, TaskRef};
use crate::utils::CompletionEvent;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Blocks until every task in `tasks` is completed.
///
/// Returns [`TaskError::Faulted`] if any of them did not run to completion:
/// the aggregate holds the faults of every faulted task, in order, and one
/// cancellation per canceled task.
pub fn wait_all(tasks: &[TaskRef]) -> Result<(), TaskError> {
    wait_all_with(tasks, None, &CancellationToken::none()).map(|_| ())
}

/// Like [`wait_all`], returning `Ok(false)` if `timeout` elapses first.
pub fn wait_all_timeout(tasks: &[TaskRef], timeout: Duration) -> Result<bool, TaskError> {
    wait_all_with(tasks, Some(timeout), &CancellationToken::none())
}

/// Like [`wait_all`], with an optional timeout. If `token` fires first the
/// wait ends with [`TaskError::Canceled`]; the tasks are left alone.
pub fn wait_all_with(
    tasks: &[TaskRef],
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Result<bool, TaskError> {
    token.throw_if_cancellation_requested()?;
    validate(tasks)?;

    for task in tasks.iter().filter(|t| !t.is_completed()) {
        task.try_inline_for_wait(timeout, token);
    }

    // One task at a time against a shared deadline. Each wait takes its
    // waiter back off the task when it gives up.
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    for task in tasks.iter().filter(|t| !t.is_completed()) {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        if !task.block_until_completed(remaining, token)? {
            return Ok(false);
        }
    }

    let faults = tasks
        .iter()
        .filter(|t| matches!(t.status(), Status::Faulted | Status::Canceled))
        .flat_map(|t| t.header().completion_fault().into_faults())
        .collect::<Vec<_>>();

    if faults.is_empty() {
        Ok(true)
    } else {
        Err(TaskError::Faulted(AggregateFault::new(faults)))
    }
}

/// Blocks until any task in `tasks` is completed and returns the lowest
/// index among the completed ones. An empty slice returns `Ok(None)` without
/// blocking.
pub fn wait_any(tasks: &[TaskRef]) -> Result<Option<usize>, TaskError> {
    wait_any_with(tasks, None, &CancellationToken::none())
}

/// Like [`wait_any`], returning `Ok(None)` if `timeout` elapses first.
pub fn wait_any_timeout(tasks: &[TaskRef], timeout: Duration) -> Result<Option<usize>, TaskError> {
    wait_any_with(tasks, Some(timeout), &CancellationToken::none())
}

/// Like [`wait_any`], with an optional timeout and a token ending the wait.
///
/// An already signaled `token` fails before any task is looked at.
pub fn wait_any_with(
    tasks: &[TaskRef],
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Result<Option<usize>, TaskError> {
    token.throw_if_cancellation_requested()?;
    validate(tasks)?;

    if tasks.is_empty() {
        return Ok(None);
    }
    if let Some(index) = first_completed(tasks) {
        return Ok(Some(index));
    }

    let event = Arc::new(CompletionEvent::new());
    let all_pending = tasks.iter().all(|task| task.add_waiter(&event));

    let res = if all_pending {
        block(&event, timeout, token, || first_completed(tasks).is_some())
    } else {
        Ok(true)
    };

    for task in tasks {
        task.remove_waiter(&event);
    }

    res?;
    Ok(first_completed(tasks))
}

fn first_completed(tasks: &[TaskRef]) -> Option<usize> {
    tasks.iter().position(TaskRef::is_completed)
}

/// Disposed tasks cannot be waited on; nothing blocks if one is present.
fn validate(tasks: &[TaskRef]) -> Result<(), TaskError> {
    if tasks.iter().any(|t| t.header().is_disposed()) {
        return Err(TaskError::Disposed("task"));
    }
    Ok(())
}

/// Waits for `event`, which `token` also sets. Returns whether `done` holds
/// afterwards; a fired token takes precedence only if `done` does not.
fn block(
    event: &Arc<CompletionEvent>,
    timeout: Option<Duration>,
    token: &CancellationToken,
    done: impl Fn() -> bool,
) -> Result<bool, TaskError> {
    let registration = {
        let event = Arc::clone(event);
        token.register(move || event.set())?
    };

    event.wait(timeout);
    registration.unregister();

    if done() {
        return Ok(true);
    }
    token.throw_if_cancellation_requested()?;
    Ok(false)
}
