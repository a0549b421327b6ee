use anyhow::anyhow;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Best effort extraction of the message carried by a panic payload.
pub(crate) fn payload_as_str<'a>(payload: &'a Box<dyn Any + Send + 'static>) -> &'a str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Calls into code we do not control (schedulers) and turns a panic into an
/// error so it can be recorded as a fault.
pub(crate) fn guarded<R>(f: impl FnOnce() -> anyhow::Result<R>) -> anyhow::Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(payload) => Err(anyhow!("panicked: {}", payload_as_str(&payload))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_as_str() {
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(payload_as_str(&payload), "static");

        let payload = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(payload_as_str(&payload), "formatted 42");

        let payload = panic::catch_unwind(|| panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(payload_as_str(&payload), "unknown panic payload");
    }

    #[test]
    fn test_guarded() {
        assert_eq!(guarded(|| Ok(3)).unwrap(), 3);

        let err = guarded::<()>(|| panic!("scheduler bug")).unwrap_err();
        assert_eq!(err.to_string(), "panicked: scheduler bug");

        let err = guarded::<()>(|| Err(anyhow!("queue full"))).unwrap_err();
        assert_eq!(err.to_string(), "queue full");
    }
}
