#![forbid(unsafe_code)]

//! Runtime error type.

use std::fmt;

use tether_core::RegistryError;
use tether_host::HostError;

/// Errors returned by registration helpers and the bootstrap lifecycle.
#[derive(Debug)]
pub enum Error {
    /// A host service refused a setup call.
    Host(HostError),
    /// The registry is unwinding; no new setup is accepted.
    Registry(RegistryError),
    /// A dynamic preference value has a kind the host cannot store.
    UnsupportedPrefValue { name: String, kind: &'static str },
    /// The preference prefix is empty.
    InvalidPrefPrefix(String),
    /// The `about:` page name is empty or contains reserved characters.
    InvalidAboutPage(String),
    /// `startup` was called while the extension was already running.
    AlreadyRunning,
    /// The extension's own startup code failed.
    Startup(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(e) => write!(f, "host error: {e}"),
            Self::Registry(e) => write!(f, "registry error: {e}"),
            Self::UnsupportedPrefValue { name, kind } => {
                write!(f, "unsupported value kind '{kind}' for preference '{name}'")
            }
            Self::InvalidPrefPrefix(prefix) => write!(f, "invalid preference prefix {prefix:?}"),
            Self::InvalidAboutPage(name) => write!(f, "invalid about page name {name:?}"),
            Self::AlreadyRunning => write!(f, "extension is already running"),
            Self::Startup(msg) => write!(f, "extension startup failed: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Host(e) => Some(e),
            Self::Registry(e) => Some(e),
            _ => None,
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

/// Standard result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
