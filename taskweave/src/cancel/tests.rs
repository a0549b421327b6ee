use crate::cancel::{CancellationSource, CancellationToken};
use crate::error::{Fault, TaskError};
use anyhow::Result;
use parking_lot::Mutex;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

assert_impl_all!(CancellationSource: Send, Sync);
assert_impl_all!(CancellationToken: Send, Sync, Clone);

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let make = move || {
        let c = Arc::clone(&c);
        Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }) as Box<dyn FnOnce() + Send>
    };
    (count, make)
}

#[test]
fn test_none_token() -> Result<()> {
    let token = CancellationToken::none();
    assert!(!token.can_be_canceled());
    assert!(!token.is_cancellation_requested());
    assert!(token.throw_if_cancellation_requested().is_ok());
    assert_eq!(token, CancellationToken::none());
    assert!(!token.wait(Some(Duration::from_millis(1)))?);

    // Registering on a token that can never fire is a no-op.
    let (count, make) = counter();
    token.register(make())?;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_cancel_twice_runs_each_observer_once() -> Result<()> {
    let source = CancellationSource::new();
    let token = source.token();
    let (count, make) = counter();

    for _ in 0..3 {
        token.register(make())?;
    }

    source.cancel()?;
    source.cancel()?;

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert!(token.is_cancellation_requested());
    assert!(token.throw_if_cancellation_requested().is_err());
    Ok(())
}

#[test]
fn test_observers_run_newest_first() -> Result<()> {
    let source = CancellationSource::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..4 {
        let order = Arc::clone(&order);
        source.token().register(move || order.lock().push(i))?;
    }

    source.cancel()?;
    assert_eq!(*order.lock(), [3, 2, 1, 0]);
    Ok(())
}

#[test]
fn test_register_after_signal_runs_inline() -> Result<()> {
    let token = CancellationToken::canceled();
    let ran_on = Arc::new(Mutex::new(None));

    let r = Arc::clone(&ran_on);
    let registration = token.register(move || *r.lock() = Some(thread::current().id()))?;

    assert_eq!(*ran_on.lock(), Some(thread::current().id()));
    assert!(!registration.unregister());
    Ok(())
}

#[test]
fn test_unregister() -> Result<()> {
    let source = CancellationSource::new();
    let (count, make) = counter();

    let keep = source.token().register(make())?;
    let removed = source.token().register(make())?;
    assert!(removed.unregister());

    source.cancel()?;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!keep.unregister());
    Ok(())
}

#[test]
fn test_panicking_observer_does_not_stop_others() -> Result<()> {
    let source = CancellationSource::new();
    let (count, make) = counter();

    source.token().register(make())?;
    source.token().register(|| panic!("observer exploded"))?;
    source.token().register(make())?;

    let err = source.cancel().unwrap_err();
    let aggregate = err.as_aggregate().expect("aggregate");
    assert_eq!(aggregate.len(), 1);
    assert!(matches!(&aggregate.faults()[0], Fault::Panic(msg) if msg == "observer exploded"));
    assert_eq!(count.load(Ordering::SeqCst), 2);

    // The signal itself went through.
    assert!(source.is_cancellation_requested());
    source.cancel()?;
    Ok(())
}

#[test]
fn test_dispose() -> Result<()> {
    let source = CancellationSource::new();
    let token = source.token();
    let (count, make) = counter();
    token.register(make())?;

    source.dispose();

    assert!(matches!(source.cancel(), Err(TaskError::Disposed(_))));
    assert!(matches!(token.register(|| {}), Err(TaskError::Disposed(_))));
    assert!(matches!(token.wait(None), Err(TaskError::Disposed(_))));
    assert!(!token.is_cancellation_requested());
    assert_eq!(count.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_token_equality() {
    let a = CancellationSource::new();
    let b = CancellationSource::new();

    assert_eq!(a.token(), a.token());
    assert_ne!(a.token(), b.token());
    assert_ne!(a.token(), CancellationToken::none());
}

#[test]
fn test_wait_is_woken_by_cancel() -> Result<()> {
    let source = CancellationSource::new();
    let token = source.token();

    let waiter = thread::spawn(move || token.wait(None));
    thread::sleep(Duration::from_millis(10));
    source.cancel()?;

    assert!(waiter.join().unwrap()?);
    Ok(())
}

#[rstest]
#[case::first(0)]
#[case::middle(1)]
#[case::last(2)]
fn test_linked_fires_once_from_any_upstream(#[case] which: usize) -> Result<()> {
    let upstream = (0..3).map(|_| CancellationSource::new()).collect::<Vec<_>>();
    let tokens = upstream.iter().map(|s| s.token()).collect::<Vec<_>>();

    let linked = CancellationSource::linked(&tokens)?;
    let (count, make) = counter();
    linked.token().register(make())?;

    upstream[which].cancel()?;
    for source in &upstream {
        source.cancel()?;
    }

    assert!(linked.is_cancellation_requested());
    assert_eq!(count.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_linked_is_transitive_and_starts_signaled() -> Result<()> {
    let root = CancellationSource::new();
    let middle = CancellationSource::linked(&[root.token(), CancellationToken::none()])?;
    let leaf = CancellationSource::linked(&[middle.token()])?;

    root.cancel()?;
    assert!(middle.is_cancellation_requested());
    assert!(leaf.is_cancellation_requested());

    let late = CancellationSource::linked(&[CancellationToken::canceled()])?;
    assert!(late.is_cancellation_requested());
    Ok(())
}

#[test]
fn test_disposed_linked_source_detaches() -> Result<()> {
    let root = CancellationSource::new();
    let linked = CancellationSource::linked(&[root.token()])?;
    linked.dispose();

    root.cancel()?;
    assert!(!linked.is_cancellation_requested());
    Ok(())
}

#[test]
fn test_concurrent_cancel_runs_observers_once() -> Result<()> {
    let source = Arc::new(CancellationSource::new());
    let (count, make) = counter();
    for _ in 0..16 {
        source.token().register(make())?;
    }

    let handles = (0..8)
        .map(|_| {
            let source = Arc::clone(&source);
            thread::spawn(move || source.cancel())
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap()?;
    }

    assert_eq!(count.load(Ordering::SeqCst), 16);
    Ok(())
}
