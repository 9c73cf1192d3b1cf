#![forbid(unsafe_code)]

//! Failure isolation at callback boundaries.
//!
//! Every place the coordinator calls foreign code (teardown actions, watcher
//! callbacks, surface-close handlers) goes through [`run_isolated`]. A panic
//! is caught, logged at `WARN` on the `tether.isolate` target, and reported
//! as [`Outcome::Failed`]; it never unwinds into the coordinator.
//!
//! Host calls made inside helper teardowns return `Result`; those errors are
//! reported through [`log_teardown_error`] so both failure shapes land in the
//! same log stream.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Result of running one isolated callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The callback returned normally.
    Completed,
    /// The callback panicked; carries the panic message.
    Failed(String),
}

impl Outcome {
    /// Returns `true` for [`Outcome::Failed`].
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Call site classification, recorded on every isolation log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// A teardown action run by bulk unwind.
    Unwind,
    /// A teardown action run because its surface closed.
    SurfaceClose,
    /// A window-watch callback.
    Watch,
    /// An observer or event callback installed by a helper.
    Listener,
}

impl Site {
    /// Stable name used as the `site` log field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unwind => "unwind",
            Self::SurfaceClose => "surface_close",
            Self::Watch => "watch",
            Self::Listener => "listener",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run `f`, catching any panic.
///
/// `label` identifies the callback in logs; pass `None` when there is
/// nothing more specific than the site.
pub fn run_isolated<F>(site: Site, label: Option<&str>, f: F) -> Outcome
where
    F: FnOnce(),
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => Outcome::Completed,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(
                target: "tether.isolate",
                site = site.as_str(),
                label = label.unwrap_or("-"),
                panic_msg = %message,
                "callback failed; continuing"
            );
            Outcome::Failed(message)
        }
    }
}

/// Log a host error returned from inside a teardown.
pub fn log_teardown_error(label: &str, err: &dyn fmt::Display) {
    tracing::warn!(
        target: "tether.isolate",
        site = Site::Unwind.as_str(),
        label,
        error = %err,
        "teardown host call failed; continuing"
    );
}

/// Extract a readable message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
