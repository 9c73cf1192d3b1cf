#![forbid(unsafe_code)]

//! Tether public facade crate.
//!
//! Tether coordinates setup and teardown for host-embedded extensions: every
//! setup step records the action that undoes it, and the recorded actions
//! run exactly once, newest-first, when the extension stops or when the
//! surface they belong to closes.
//!
//! This crate re-exports the stable surface of the workspace crates and
//! offers a prelude for day-to-day usage.

use std::fmt;

// --- Host re-exports -------------------------------------------------------

pub use tether_host::{
    AboutModule, AboutRegistrar, ComponentRegistrar, EventTarget, HostError, HostResult,
    HostServices, ListenerId, ObserverService, PrefValue, PreferenceService, RedirectChannel,
    ResourceProtocol, Surface, SurfaceId, SurfaceRef, SurfaceSignal, WindowMediator,
};

// --- Core re-exports -------------------------------------------------------

pub use tether_core::{
    ActionId, Outcome, RegistryError, RegistryStats, Site, UnloadHandle, UnloaderRegistry,
    UnwindReport,
};

// --- Runtime re-exports ----------------------------------------------------

#[cfg(feature = "runtime")]
pub use tether_runtime::{
    AboutPage, AboutRedirector, AddonData, Bootstrap, Extension, LifecycleReason, ListenerGuard,
    Phase, Policy, PolicyConfigError, ShutdownOutcome, Starter, UnsupportedValuePolicy,
    WatchHandle,
};

#[cfg(feature = "logging")]
pub use tether_core::logging::{LoggingError, init_logging};

#[cfg(feature = "logging-json")]
pub use tether_core::logging::init_json_logging;

// --- Errors ---------------------------------------------------------------

/// Top-level error type for Tether extensions.
#[derive(Debug)]
pub enum Error {
    /// A host service failed.
    Host(HostError),
    /// The registry refused a registration.
    Registry(RegistryError),
    /// A runtime helper or lifecycle call failed.
    #[cfg(feature = "runtime")]
    Runtime(tether_runtime::Error),
    /// Policy loading or validation failed.
    #[cfg(feature = "runtime")]
    Policy(PolicyConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            #[cfg(feature = "runtime")]
            Self::Runtime(err) => write!(f, "{err}"),
            #[cfg(feature = "runtime")]
            Self::Policy(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Host(err) => Some(err),
            Self::Registry(err) => Some(err),
            #[cfg(feature = "runtime")]
            Self::Runtime(err) => Some(err),
            #[cfg(feature = "runtime")]
            Self::Policy(err) => Some(err),
        }
    }
}

impl From<HostError> for Error {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

#[cfg(feature = "runtime")]
impl From<tether_runtime::Error> for Error {
    fn from(err: tether_runtime::Error) -> Self {
        match err {
            tether_runtime::Error::Host(err) => Self::Host(err),
            tether_runtime::Error::Registry(err) => Self::Registry(err),
            other => Self::Runtime(other),
        }
    }
}

#[cfg(feature = "runtime")]
impl From<PolicyConfigError> for Error {
    fn from(err: PolicyConfigError) -> Self {
        Self::Policy(err)
    }
}

/// Standard result type for Tether APIs.
pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Error, HostServices, Result, Surface, SurfaceRef, UnloadHandle, UnloaderRegistry,
        UnwindReport,
    };

    #[cfg(feature = "runtime")]
    pub use crate::{AddonData, Bootstrap, Extension, LifecycleReason, Policy, Starter};

    pub use crate::{core, host};

    #[cfg(feature = "runtime")]
    pub use crate::runtime;
}

pub use tether_core as core;
pub use tether_host as host;
#[cfg(feature = "runtime")]
pub use tether_runtime as runtime;
