use crate::combinator::Antecedent;
use crate::error::TaskError;
use crate::task::continuation::Continuation;
use crate::task::{ContinuationOptions, Status, Task, TaskContext, TaskFactory, TaskRef};
use anyhow::anyhow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Creates a task that runs `body` once every antecedent completed,
/// whatever their outcome. The body receives the antecedents in order.
///
/// `options` may not carry `NOT_ON_*` or `ONLY_ON_*` flags.
pub fn continue_when_all<A, U, F>(
    factory: &TaskFactory,
    antecedents: &[A],
    options: ContinuationOptions,
    body: F,
) -> Result<Task<U>, TaskError>
where
    A: Antecedent,
    U: Send + Sync + 'static,
    F: FnOnce(&[A], &TaskContext<'_>) -> anyhow::Result<U> + Send + 'static,
{
    let (options, refs) = prepare(antecedents, options)?;

    let all = antecedents.to_vec();
    let continuation = factory.create_continuation(
        options,
        Box::new(move |cx: &TaskContext<'_>| body(&all, cx)),
    )?;

    // Its own token canceled it already.
    if continuation.is_completed() {
        return Ok(continuation);
    }

    let remaining = Arc::new(AtomicUsize::new(refs.len()));
    for antecedent in &refs {
        let remaining = Arc::clone(&remaining);
        let task = continuation.to_ref();
        antecedent.on_completed(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                activate(task, options);
            }
        });
    }

    Ok(continuation)
}

/// Creates a task that runs `body` with the first antecedent to complete.
///
/// The other antecedents keep running and are ignored. If several are
/// already completed, the lowest index wins.
pub fn continue_when_any<A, U, F>(
    factory: &TaskFactory,
    antecedents: &[A],
    options: ContinuationOptions,
    body: F,
) -> Result<Task<U>, TaskError>
where
    A: Antecedent,
    U: Send + Sync + 'static,
    F: FnOnce(&A, &TaskContext<'_>) -> anyhow::Result<U> + Send + 'static,
{
    let (options, refs) = prepare(antecedents, options)?;

    let winner = Arc::new(OnceLock::<A>::new());
    let slot = Arc::clone(&winner);
    let continuation = factory.create_continuation(
        options,
        Box::new(move |cx: &TaskContext<'_>| {
            let winner = slot
                .get()
                .ok_or_else(|| anyhow!("continuation ran before any antecedent completed"))?;
            body(winner, cx)
        }),
    )?;

    if continuation.is_completed() {
        return Ok(continuation);
    }

    for (antecedent, task_ref) in antecedents.iter().zip(&refs) {
        let winner = Arc::clone(&winner);
        let candidate = antecedent.clone();
        let task = continuation.to_ref();
        task_ref.on_completed(move || {
            if winner.set(candidate).is_ok() {
                activate(task, options);
            }
        });
    }

    Ok(continuation)
}

fn prepare<A: Antecedent>(
    antecedents: &[A],
    options: ContinuationOptions,
) -> Result<(ContinuationOptions, Vec<TaskRef>), TaskError> {
    if antecedents.is_empty() {
        return Err(TaskError::EmptyCollection("antecedents"));
    }
    let options = options.validate_for_many()?;

    let refs = antecedents.iter().map(Antecedent::task_ref).collect::<Vec<_>>();
    if refs.iter().any(|t| t.header().is_disposed()) {
        return Err(TaskError::Disposed("task"));
    }

    Ok((options, refs))
}

/// No predicate applies, so any status that satisfies one will do.
fn activate(task: TaskRef, options: ContinuationOptions) {
    Continuation::Task { task, options }.fire(Status::RanToCompletion, true);
}
