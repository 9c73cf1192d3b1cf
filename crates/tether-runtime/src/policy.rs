#![forbid(unsafe_code)]

//! Policy-as-data configuration for the coordinator.
//!
//! # Loading
//!
//! ```toml
//! # tether-policy.toml
//! skip_unwind_on_app_shutdown = true
//! unsupported_values = "reject"
//! ```
//!
//! ```rust,ignore
//! let policy = Policy::from_toml_file("tether-policy.toml")?.validated()?;
//! ```
//!
//! # Defaults
//!
//! `Policy::default()` is the behavior an extension gets without any
//! configuration: application shutdown leaves teardowns alone, unsupported
//! preference values are skipped, and teardown host errors are logged.

#[cfg(feature = "policy-config")]
use std::path::Path;

#[cfg(feature = "policy-config")]
use serde::{Deserialize, Serialize};

/// Default prefix for `about:` page contract ids.
pub const DEFAULT_ABOUT_CONTRACT_PREFIX: &str = "@host/protocol/about;1?what=";

/// What to do with a dynamic preference value the host cannot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "policy-config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "policy-config", serde(rename_all = "snake_case"))]
pub enum UnsupportedValuePolicy {
    /// Leave the value out and log at `DEBUG`.
    #[default]
    Skip,
    /// Fail the whole registration before writing anything.
    Reject,
}

/// Coordinator policy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default))]
pub struct Policy {
    /// Leave pending teardowns alone when the whole application exits.
    pub skip_unwind_on_app_shutdown: bool,

    /// Handling of preference values outside bool/int/string.
    pub unsupported_values: UnsupportedValuePolicy,

    /// Registrations made while unwinding are rejected. Only `true` is
    /// accepted by [`Policy::validate`].
    pub reject_registration_during_unwind: bool,

    /// Log host errors returned by helper teardowns at `WARN` (otherwise
    /// `DEBUG`).
    pub log_teardown_failures: bool,

    /// Prefix prepended to an `about:` page name to form its contract id.
    pub about_contract_prefix: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            skip_unwind_on_app_shutdown: true,
            unsupported_values: UnsupportedValuePolicy::Skip,
            reject_registration_during_unwind: true,
            log_teardown_failures: true,
            about_contract_prefix: DEFAULT_ABOUT_CONTRACT_PREFIX.to_owned(),
        }
    }
}

impl Policy {
    /// Load from a TOML string.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(s: &str) -> Result<Self, PolicyConfigError> {
        toml::from_str(s).map_err(PolicyConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, PolicyConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(PolicyConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(s: &str) -> Result<Self, PolicyConfigError> {
        serde_json::from_str(s).map_err(PolicyConfigError::Json)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PolicyConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(PolicyConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Validate all parameters.
    ///
    /// Returns a list of validation errors. An empty list means the policy
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.reject_registration_during_unwind {
            errors.push(
                "reject_registration_during_unwind must be true; registrations during unwind \
                 cannot be honored"
                    .to_owned(),
            );
        }
        if self.about_contract_prefix.is_empty() {
            errors.push("about_contract_prefix must not be empty".to_owned());
        } else if self.about_contract_prefix.chars().any(char::is_whitespace) {
            errors.push(format!(
                "about_contract_prefix must not contain whitespace, got {:?}",
                self.about_contract_prefix
            ));
        }

        errors
    }

    /// Return `self` if [`validate`](Self::validate) finds nothing.
    pub fn validated(self) -> Result<Self, PolicyConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(PolicyConfigError::Validation(errors))
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur when loading a policy.
#[derive(Debug)]
pub enum PolicyConfigError {
    /// I/O error reading a file.
    Io(std::io::Error),
    /// TOML parse error.
    #[cfg(feature = "policy-config")]
    Toml(toml::de::Error),
    /// JSON parse error.
    #[cfg(feature = "policy-config")]
    Json(serde_json::Error),
    /// Validation errors.
    Validation(Vec<String>),
}

impl std::fmt::Display for PolicyConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            #[cfg(feature = "policy-config")]
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            #[cfg(feature = "policy-config")]
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => {
                write!(f, "validation errors: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for PolicyConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            #[cfg(feature = "policy-config")]
            Self::Toml(e) => Some(e),
            #[cfg(feature = "policy-config")]
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}
