pub(crate) mod event;
pub(crate) use event::CompletionEvent;

pub(crate) mod panic;
pub(crate) use panic::{guarded, payload_as_str};

pub(crate) mod scope_guard;
pub(crate) use scope_guard::ScopeGuard;
