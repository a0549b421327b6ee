use crate::task::TaskContext;
use crate::task::raw::{BodyFailure, Header, RawTask};
use crate::utils::payload_as_str;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

pub(crate) type Body<T> = Box<dyn FnOnce(&TaskContext<'_>) -> anyhow::Result<T> + Send + 'static>;

/// A task together with its body and result slot.
pub(crate) struct TaskCell<T> {
    header: Header,
    body: Mutex<Option<Body<T>>>,
    /// Shared so a proxy task can expose the same value.
    result: OnceLock<Arc<T>>,
}

impl<T> TaskCell<T> {
    pub(crate) fn new(header: Header, body: Option<Body<T>>) -> Self {
        Self {
            header,
            body: Mutex::new(body),
            result: OnceLock::new(),
        }
    }

    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn result(&self) -> Option<&T> {
        self.result.get().map(Arc::as_ref)
    }

    pub(crate) fn shared_result(&self) -> Option<Arc<T>> {
        self.result.get().cloned()
    }

    /// Stores the value of a promise-style task. First write wins.
    pub(crate) fn set_result(&self, value: T) {
        self.set_shared_result(Arc::new(value));
    }

    pub(crate) fn set_shared_result(&self, value: Arc<T>) {
        let _ = self.result.set(value);
    }
}

impl<T: Send + Sync + 'static> RawTask for TaskCell<T> {
    fn header(&self) -> &Header {
        &self.header
    }

    fn run_body(&self, cx: &TaskContext<'_>) -> Result<(), BodyFailure> {
        let Some(body) = self.body.lock().take() else {
            return Ok(());
        };

        match panic::catch_unwind(AssertUnwindSafe(|| body(cx))) {
            Ok(Ok(value)) => {
                self.set_result(value);
                Ok(())
            }
            Ok(Err(err)) => Err(BodyFailure::Error(err)),
            Err(payload) => Err(BodyFailure::Panic(payload_as_str(&payload).to_string())),
        }
    }

    fn discard_body(&self) {
        self.body.lock().take();
    }
}
