#![forbid(unsafe_code)]

//! Extension lifecycle: startup, shutdown, install, uninstall.
//!
//! [`Bootstrap`] owns the [`Starter`] for one extension and drives the
//! [`Extension`] hooks with a [`LifecycleReason`]. Shutdown unwinds every
//! registered teardown, except when the whole application is exiting and
//! [`Policy::skip_unwind_on_app_shutdown`] is set: the host is about to free
//! everything anyway.
//!
//! ```text
//!   Idle ──startup──▶ Running ──shutdown──▶ Stopped ──startup──▶ Running
//!                        │
//!                        └─ startup error: unwind partial setup, back to Stopped
//! ```

use std::fmt;
use std::path::PathBuf;

use tether_core::UnwindReport;
use tether_host::HostServices;
use tracing::{debug, info, info_span, warn};
use web_time::Instant;

use crate::error::{Error, Result};
use crate::policy::Policy;
use crate::starter::Starter;

/// Why a lifecycle hook is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleReason {
    AppStartup = 1,
    AppShutdown = 2,
    AddonEnable = 3,
    AddonDisable = 4,
    AddonInstall = 5,
    AddonUninstall = 6,
    AddonUpgrade = 7,
    AddonDowngrade = 8,
}

impl LifecycleReason {
    /// Numeric code as reported by the host.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Parse a host-reported code.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::AppStartup,
            2 => Self::AppShutdown,
            3 => Self::AddonEnable,
            4 => Self::AddonDisable,
            5 => Self::AddonInstall,
            6 => Self::AddonUninstall,
            7 => Self::AddonUpgrade,
            8 => Self::AddonDowngrade,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppStartup => "app_startup",
            Self::AppShutdown => "app_shutdown",
            Self::AddonEnable => "addon_enable",
            Self::AddonDisable => "addon_disable",
            Self::AddonInstall => "addon_install",
            Self::AddonUninstall => "addon_uninstall",
            Self::AddonUpgrade => "addon_upgrade",
            Self::AddonDowngrade => "addon_downgrade",
        }
    }
}

impl fmt::Display for LifecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data the host passes to every lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonData {
    pub id: String,
    pub version: String,
    /// Directory or archive the add-on is installed at.
    pub install_path: PathBuf,
    /// Base location used for resource host substitution.
    pub resource_uri: String,
}

impl AddonData {
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        install_path: impl Into<PathBuf>,
        resource_uri: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            install_path: install_path.into(),
            resource_uri: resource_uri.into(),
        }
    }
}

/// An extension driven by [`Bootstrap`].
pub trait Extension {
    /// Perform setup through `starter`. Every teardown registered here is
    /// run on shutdown.
    fn startup(&mut self, starter: &Starter, data: &AddonData, reason: LifecycleReason)
    -> Result<()>;

    /// Called before pending teardowns are unwound (or skipped).
    fn shutdown(&mut self, _data: &AddonData, _reason: LifecycleReason) {}

    fn install(&mut self, _data: &AddonData, _reason: LifecycleReason) {}

    fn uninstall(&mut self, _data: &AddonData, _reason: LifecycleReason) {}
}

/// Lifecycle phase of a [`Bootstrap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopped,
}

/// What [`Bootstrap::shutdown`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Teardowns ran.
    Unwound(UnwindReport),
    /// Application shutdown; teardowns were left alone.
    Skipped,
    /// The extension was not running.
    NotRunning,
}

/// Owns one extension and its coordinator.
pub struct Bootstrap<E: Extension> {
    extension: E,
    data: AddonData,
    starter: Starter,
    phase: Phase,
}

impl<E: Extension> fmt::Debug for Bootstrap<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("addon", &self.data.id)
            .field("phase", &self.phase)
            .field("registry", self.starter.registry())
            .finish_non_exhaustive()
    }
}

impl<E: Extension> Bootstrap<E> {
    pub fn new(extension: E, data: AddonData, host: HostServices) -> Self {
        Self::with_policy(extension, data, host, Policy::default())
    }

    pub fn with_policy(extension: E, data: AddonData, host: HostServices, policy: Policy) -> Self {
        Self {
            extension,
            data,
            starter: Starter::with_policy(host, policy),
            phase: Phase::Idle,
        }
    }

    /// Run the extension's startup.
    ///
    /// If startup fails, whatever it had registered is unwound before the
    /// error is returned.
    pub fn startup(&mut self, reason: LifecycleReason) -> Result<()> {
        if self.phase == Phase::Running {
            return Err(Error::AlreadyRunning);
        }
        let span = info_span!(
            target: "tether.bootstrap",
            "tether.startup",
            addon = %self.data.id,
            reason = reason.as_str(),
        );
        let _enter = span.enter();
        let start = Instant::now();

        match self.extension.startup(&self.starter, &self.data, reason) {
            Ok(()) => {
                self.phase = Phase::Running;
                info!(
                    target: "tether.bootstrap",
                    registered = self.starter.registry().len(),
                    duration_us = start.elapsed().as_micros() as u64,
                    "extension started"
                );
                Ok(())
            }
            Err(err) => {
                warn!(target: "tether.bootstrap", error = %err, "startup failed; unwinding partial setup");
                self.starter.unload();
                self.phase = Phase::Stopped;
                Err(err)
            }
        }
    }

    /// Stop the extension. A second call is a no-op.
    pub fn shutdown(&mut self, reason: LifecycleReason) -> ShutdownOutcome {
        if self.phase != Phase::Running {
            debug!(target: "tether.bootstrap", reason = reason.as_str(), "shutdown while not running");
            return ShutdownOutcome::NotRunning;
        }
        self.phase = Phase::Stopped;
        self.extension.shutdown(&self.data, reason);

        if reason == LifecycleReason::AppShutdown
            && self.starter.policy().skip_unwind_on_app_shutdown
        {
            info!(
                target: "tether.bootstrap",
                addon = %self.data.id,
                pending = self.starter.registry().len(),
                "application shutdown; skipping unwind"
            );
            return ShutdownOutcome::Skipped;
        }

        let report = self.starter.unload();
        info!(
            target: "tether.bootstrap",
            addon = %self.data.id,
            reason = reason.as_str(),
            ran = report.ran,
            failed = report.failed,
            "extension stopped"
        );
        ShutdownOutcome::Unwound(report)
    }

    pub fn install(&mut self, reason: LifecycleReason) {
        debug!(target: "tether.bootstrap", addon = %self.data.id, reason = reason.as_str(), "install");
        self.extension.install(&self.data, reason);
    }

    pub fn uninstall(&mut self, reason: LifecycleReason) {
        debug!(target: "tether.bootstrap", addon = %self.data.id, reason = reason.as_str(), "uninstall");
        self.extension.uninstall(&self.data, reason);
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn starter(&self) -> &Starter {
        &self.starter
    }

    #[must_use]
    pub fn data(&self) -> &AddonData {
        &self.data
    }

    pub fn extension(&self) -> &E {
        &self.extension
    }

    pub fn extension_mut(&mut self) -> &mut E {
        &mut self.extension
    }
}
