use super::*;
use crate::combinator::wait_all;
use crate::error::{Fault, TaskError};
use crate::scheduler::Schedule;
use crate::task::{Status, TaskCreationOptions, TaskRef};
use crate::test_utils::*;
use anyhow::Result;
use parking_lot::Mutex;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

assert_impl_all!(ThreadPool: Send, Sync, Schedule);

#[test]
fn test_thread_names() -> Result<()> {
    let pool = ThreadPool::builder()
        .worker_threads(3)
        .thread_name_fn({
            let n = AtomicUsize::new(0);
            move || format!("named-{}", n.fetch_add(1, Ordering::Relaxed))
        })
        .try_build()?;

    let names = pool
        .handles
        .lock()
        .iter()
        .map(|h| h.thread().name().unwrap_or_default().to_string())
        .collect::<HashSet<_>>();

    assert_eq!(names, HashSet::from(["named-0".into(), "named-1".into(), "named-2".into()]));
    pool.shutdown()?;
    Ok(())
}

#[rstest]
#[case::single_worker(1)]
#[case::few_workers(4)]
fn test_runs_every_task(#[case] workers: usize) -> Result<()> {
    let pool = pool(workers);
    let factory = factory(&pool);
    let counter = Arc::new(AtomicUsize::new(0));

    let tasks = (0..200)
        .map(|_| {
            let counter = Arc::clone(&counter);
            factory.spawn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .map(|t| t.map(|t| t.to_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    wait_all(&tasks)?;
    assert_eq!(counter.load(Ordering::SeqCst), 200);
    assert!(tasks.iter().all(|t| t.status() == Status::RanToCompletion));
    Ok(())
}

#[test]
fn test_nested_spawn_gets_stolen() -> Result<()> {
    let pool = pool(4);
    let factory = factory(&pool);
    let threads = Arc::new(Mutex::new(HashSet::new()));

    let inner_factory = factory.clone();
    let t = Arc::clone(&threads);
    let root = factory.spawn(move |_| {
        let children = (0..64)
            .map(|_| {
                let t = Arc::clone(&t);
                inner_factory.spawn(move |_| {
                    thread::sleep(Duration::from_millis(2));
                    t.lock().insert(thread::current().id());
                    Ok(())
                })
            })
            .map(|c| c.map(|c| c.to_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(children)
    })?;

    // Children land on the spawning worker's local queue. Spinning instead of
    // waiting keeps this thread from inlining them.
    assert!(spin_until(|| root.is_completed()));
    let children = root.result()?.clone();
    assert!(spin_until(|| children.iter().all(TaskRef::is_completed)));

    assert!(!threads.lock().contains(&thread::current().id()));
    assert!(threads.lock().len() > 1);
    Ok(())
}

#[test]
fn test_workers_park_when_idle() -> Result<()> {
    let pool = pool(2);
    assert!(spin_until(|| pool.shared.parked_threads_len() == 2));

    let task = factory(&pool).spawn(|_| Ok(7))?;
    assert_eq!(*task.result()?, 7);
    Ok(())
}

#[test]
fn test_long_running_gets_dedicated_thread() -> Result<()> {
    let pool = pool(1);
    let factory = factory(&pool).with_options(TaskCreationOptions::LONG_RUNNING);

    let name = factory.spawn(|_| Ok(thread::current().name().map(str::to_string)))?;
    let name = name.result()?.clone().unwrap_or_default();
    assert!(name.contains("-long-"), "{name}");
    Ok(())
}

#[test]
fn test_long_running_not_inlined_once_queued() -> Result<()> {
    let pool = pool(1);
    let task = factory(&pool)
        .with_options(TaskCreationOptions::LONG_RUNNING)
        .build(|_| Ok(()))?;

    let task = task.to_ref();
    task.transition_to_started()?;
    assert!(!pool.try_execute_inline(&task, true)?);
    assert!(pool.try_execute_inline(&task, false)?);
    assert!(!pool.try_execute_inline(&task, false)?);
    Ok(())
}

#[test]
fn test_wait_inlines_queued_task() -> Result<()> {
    let pool = pool(1);
    let factory = factory(&pool);

    // Keep the only worker busy so the second task stays queued.
    let (release, blocked) = std::sync::mpsc::channel::<()>();
    let blocker = factory.spawn(move |_| {
        let _ = blocked.recv_timeout(TIMEOUT);
        Ok(())
    })?;
    assert!(spin_until(|| blocker.status() == Status::Running));

    let caller = thread::current().id();
    let task = factory.spawn(|_| Ok(thread::current().id()))?;
    assert_eq!(*task.result()?, caller);

    release.send(())?;
    blocker.wait()?;
    Ok(())
}

#[test]
fn test_timed_wait_returns_while_body_is_queued() -> Result<()> {
    let pool = pool(1);
    let factory = factory(&pool);

    let (release, blocked) = std::sync::mpsc::channel::<()>();
    let blocker = factory.spawn(move |_| {
        let _ = blocked.recv_timeout(TIMEOUT);
        Ok(())
    })?;
    assert!(spin_until(|| blocker.status() == Status::Running));

    let slow = factory.spawn(|_| {
        thread::sleep(Duration::from_millis(500));
        Ok(())
    })?;

    let start = Instant::now();
    assert!(!slow.wait_timeout(Duration::from_millis(10))?);
    assert!(start.elapsed() < Duration::from_millis(400));
    assert_eq!(slow.status(), Status::WaitingToRun);

    release.send(())?;
    blocker.wait()?;
    assert!(slow.wait_timeout(TIMEOUT)?);
    Ok(())
}

#[test]
fn test_spawn_racing_shutdown_never_strands_tasks() -> Result<()> {
    for _ in 0..20 {
        let pool = pool(2);
        let factory = factory(&pool);

        let spawner = thread::spawn(move || {
            (0..200)
                .map(|_| factory.spawn(|_| Ok(())))
                .collect::<Result<Vec<_>, _>>()
        });
        pool.shutdown()?;

        let tasks = spawner.join().expect("spawner panicked")?;
        for task in tasks {
            // Either it ran, or it was refused and faulted.
            match task.wait_timeout(TIMEOUT) {
                Ok(done) => assert!(done),
                Err(TaskError::Faulted(aggregate)) => {
                    assert!(matches!(aggregate.faults()[0], Fault::Scheduler(_)));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}

#[test]
fn test_shutdown_drains_then_refuses() -> Result<()> {
    let pool = pool(2);
    let factory = factory(&pool);
    let counter = Arc::new(AtomicUsize::new(0));

    let tasks = (0..32)
        .map(|_| {
            let counter = Arc::clone(&counter);
            factory.spawn(move |_| {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    pool.shutdown()?;
    assert!(pool.is_shutdown());
    assert_eq!(counter.load(Ordering::SeqCst), 32);
    assert!(tasks.iter().all(|t| t.is_completed_successfully()));

    // Queuing after shutdown faults the task instead of losing it.
    let late = factory.spawn(|_| Ok(()))?;
    assert_eq!(late.status(), Status::Faulted);
    let err = late.wait().unwrap_err();
    let aggregate = err.as_aggregate().expect("aggregate");
    assert!(matches!(aggregate.faults()[0], Fault::Scheduler(_)));

    let built = factory.build(|_| Ok(()))?;
    assert!(matches!(built.start(), Err(TaskError::Scheduler(_))));
    Ok(())
}

#[test]
fn test_drop_from_worker_thread() -> Result<()> {
    let pool = pool(2);
    let weak = Arc::downgrade(&pool);
    let (release, blocked) = std::sync::mpsc::channel::<()>();

    let task = factory(&pool).spawn(move |_| {
        let _ = blocked.recv_timeout(TIMEOUT);
        Ok(())
    })?;
    drop(pool);
    drop(task);

    // The task's header holds the last reference to the pool, so the pool
    // is dropped on the worker that ran it.
    release.send(())?;
    assert!(spin_until(|| weak.upgrade().is_none()));
    Ok(())
}

#[test]
fn test_max_concurrency() -> Result<()> {
    let pool = pool(3);
    assert_eq!(pool.max_concurrency(), 3);
    assert!(pool.scheduled_tasks().is_none());
    Ok(())
}
