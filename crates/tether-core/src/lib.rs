#![forbid(unsafe_code)]

//! Core teardown coordination for Tether.
//!
//! - [`registry`]: the [`UnloaderRegistry`], a stack of teardown actions run
//!   newest-first on unwind, optionally bound to a surface's close signal.
//! - [`isolate`]: panic containment for every callback the coordinator runs.
//! - `logging` (feature `tracing-subscriber`): subscriber setup helpers.
//!
//! Everything here is single-threaded: handles are `Rc`-based and `!Send`.
//!
//! # Log targets
//!
//! | Target             | Events                                       |
//! |--------------------|----------------------------------------------|
//! | `tether.registry`  | bind, cancel, rejection, abandoned-on-drop   |
//! | `tether.unwind`    | the unwind span and its completion summary   |
//! | `tether.isolate`   | caught panics and logged teardown errors     |

pub mod isolate;
#[cfg(feature = "tracing-subscriber")]
pub mod logging;
pub mod registry;

pub use isolate::{Outcome, Site, log_teardown_error, panic_message, run_isolated};
pub use registry::{
    ActionId, RegistryError, RegistryStats, TeardownFn, UnloadHandle, UnloaderRegistry,
    UnwindReport,
};
