#![forbid(unsafe_code)]

//! Extension-facing runtime for Tether.
//!
//! Builds on the [`tether_core`] registry:
//!
//! - [`starter`]: registration helpers that pair a host setup call with its
//!   teardown.
//! - [`watcher`]: apply a callback to every current and future surface of a
//!   window type, once each, after load.
//! - [`bootstrap`]: the startup/shutdown lifecycle with reason codes.
//! - [`policy`]: behavior knobs, loadable from TOML/JSON with the
//!   `policy-config` feature.
//!
//! # Example
//!
//! ```
//! use tether_host::headless::HeadlessHost;
//! use tether_runtime::{AddonData, Starter};
//!
//! let host = HeadlessHost::new();
//! let starter = Starter::new(host.services());
//! let data = AddonData::new("demo@example.org", "1.0", "/ext/demo", "file:///ext/demo/");
//!
//! starter.register_resource_host("demo", &data).unwrap();
//! starter.register_default_prefs("extensions.demo.", [("enabled", true)]).unwrap();
//! assert_eq!(host.substitution("demo").as_deref(), Some("file:///ext/demo/"));
//!
//! starter.unload();
//! assert_eq!(host.substitution("demo"), None);
//! assert!(host.prefs_under("extensions.demo.").is_empty());
//! ```

pub mod about;
pub mod bootstrap;
pub mod error;
pub mod policy;
mod prefs;
pub mod starter;
pub mod watcher;

pub use about::AboutRedirector;
pub use bootstrap::{AddonData, Bootstrap, Extension, LifecycleReason, Phase, ShutdownOutcome};
pub use error::{Error, Result};
pub use policy::{Policy, PolicyConfigError, UnsupportedValuePolicy};
pub use starter::{AboutPage, ListenerGuard, Starter};
pub use watcher::{WatchHandle, watch};
