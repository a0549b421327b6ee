use crate::scheduler::{Schedule, SchedulerRef};
use crate::task::{Id, TaskRef};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Queue,
    TryExecuteInline,
    TryDequeue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Queue {
        id: Id,
    },
    TryExecuteInline {
        id: Id,
        previously_queued: bool,
        executed: bool,
    },
    TryDequeue {
        id: Id,
        removed: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        map.insert(Method::Queue, Vec::new());
        map.insert(Method::TryExecuteInline, Vec::new());
        map.insert(Method::TryDequeue, Vec::new());

        Self {
            calls: Arc::new(map),
        }
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        self.calls
            .get_mut(&method)
            .expect("method not found")
            .push(call)
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .expect("method not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }
}

/// Forwards to `inner` and records every call.
#[derive(Debug)]
pub(crate) struct SpyScheduler {
    pub(crate) inner: SchedulerRef,
    pub(crate) tracker: Tracker,
}

impl SpyScheduler {
    pub(crate) fn new(inner: SchedulerRef) -> Arc<Self> {
        Arc::new(Self {
            inner,
            tracker: Tracker::new(),
        })
    }
}

impl Schedule for SpyScheduler {
    fn queue(&self, task: TaskRef) -> anyhow::Result<()> {
        self.tracker.record(Method::Queue, Call::Queue { id: task.id() });
        self.inner.queue(task)
    }

    fn try_execute_inline(&self, task: &TaskRef, previously_queued: bool) -> anyhow::Result<bool> {
        let executed = self.inner.try_execute_inline(task, previously_queued)?;
        self.tracker.record(
            Method::TryExecuteInline,
            Call::TryExecuteInline {
                id: task.id(),
                previously_queued,
                executed,
            },
        );
        Ok(executed)
    }

    fn try_dequeue(&self, task: &TaskRef) -> bool {
        let removed = self.inner.try_dequeue(task);
        self.tracker.record(
            Method::TryDequeue,
            Call::TryDequeue {
                id: task.id(),
                removed,
            },
        );
        removed
    }

    fn scheduled_tasks(&self) -> Option<Vec<TaskRef>> {
        self.inner.scheduled_tasks()
    }
}
