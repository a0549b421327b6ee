use crate::task::{Outcome, Task, TaskCreationOptions};

impl<T: Send + Sync + 'static> Task<Task<T>> {
    /// A proxy for the inner task this task produces.
    ///
    /// The proxy completes like the inner task, sharing its value, with the
    /// inner task's faults and no extra level of nesting. If this task is
    /// canceled or faulted (its scheduler failing included), the proxy is
    /// canceled or faulted with it and there is no inner task to follow.
    pub fn unwrap(&self) -> Task<T> {
        let proxy = Task::new_promise(TaskCreationOptions::empty());

        let outer = self.clone();
        let forward_to = proxy.clone();
        self.to_ref().on_completed(move || match outer.shared_outcome() {
            Some(Outcome::Shared(inner)) => forward((*inner).clone(), forward_to),
            Some(Outcome::Value(inner)) => forward(inner, forward_to),
            Some(Outcome::Faults(faults)) => {
                forward_to.try_complete(Outcome::Faults(faults));
            }
            Some(Outcome::Canceled(token)) => {
                forward_to.try_complete(Outcome::Canceled(token));
            }
            None => {}
        });

        proxy
    }
}

fn forward<T: Send + Sync + 'static>(inner: Task<T>, proxy: Task<T>) {
    let source = inner.clone();
    inner.to_ref().on_completed(move || {
        if let Some(outcome) = source.shared_outcome() {
            proxy.try_complete(outcome);
        }
    });
}
