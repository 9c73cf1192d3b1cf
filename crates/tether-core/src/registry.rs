#![forbid(unsafe_code)]

//! Unloader registry: a stack of teardown actions with reverse-order unwind.
//!
//! # Design
//!
//! [`UnloaderRegistry`] is a cheaply cloneable handle to shared,
//! single-threaded state (`Rc<..>` with interior mutability). Every setup
//! step in an extension records the action that undoes it; when the
//! extension stops, [`UnloaderRegistry::unwind_all`] runs the recorded
//! actions newest-first.
//!
//! An action may be bound to a [`Surface`]. The binding is a one-shot slot
//! holding the action plus the surface's close-listener id. Whichever trigger
//! takes the slot first (surface close, unwind, or cancel) also detaches the
//! other side, so a bound action fires at most once.
//!
//! # Invariants
//!
//! 1. Actions run in strict reverse-registration order during unwind, each
//!    to completion before the next starts.
//! 2. An action runs at most once; after it runs (or is cancelled) its
//!    handle is inert.
//! 3. A failing action never stops its siblings and never reaches the
//!    caller of `unwind_all`.
//! 4. After `unwind_all` returns the registry is empty.
//! 5. No interior borrow is held while an action runs, so actions may
//!    cancel other pending handles.
//!
//! # Failure Modes
//!
//! - **Registration during unwind**: rejected. The action is dropped without
//!   running, a `WARN` is logged, and the returned handle is inert.
//!   [`UnloaderRegistry::try_register`] reports this as
//!   [`RegistryError::Unwinding`].
//! - **Nested unwind**: calling `unwind_all` from inside a teardown is a
//!   logged no-op; the outer unwind finishes the job.
//! - **Dropping the registry**: pending actions are discarded without
//!   running and their surface listeners are detached.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tether_host::{ListenerId, Surface, SurfaceRef, SurfaceSignal};
use tracing::{debug, info, info_span, warn};
use web_time::Instant;

use crate::isolate::{Outcome, Site, run_isolated};

/// A teardown action: undo one setup step.
pub type TeardownFn = Box<dyn FnOnce()>;

/// Identity of a registered action, unique within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl ActionId {
    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors from [`UnloaderRegistry::try_register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry is currently running `unwind_all`.
    Unwinding,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unwinding => write!(f, "registry is unwinding; registration rejected"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Cumulative counters for one registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Actions accepted by `register*`.
    pub registered: u64,
    /// Actions that ran (by unwind or surface close), including failures.
    pub fired: u64,
    /// Actions that ran and panicked.
    pub failed: u64,
    /// Actions removed through [`UnloadHandle::cancel`].
    pub cancelled: u64,
    /// Registrations refused because the registry was unwinding.
    pub rejected: u64,
}

/// Summary of one `unwind_all` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnwindReport {
    /// Actions run.
    pub ran: usize,
    /// Actions that panicked.
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Surface binding
// ---------------------------------------------------------------------------

/// One-shot coupling between an action and a surface's close signal.
struct SurfaceBinding {
    surface: Weak<dyn Surface>,
    listener: Cell<Option<ListenerId>>,
    action: RefCell<Option<TeardownFn>>,
}

impl SurfaceBinding {
    /// Take the action and detach the close listener. Returns `None` if
    /// another trigger already took it.
    fn take(&self) -> Option<TeardownFn> {
        let action = self.action.borrow_mut().take()?;
        if let Some(listener) = self.listener.take()
            && let Some(surface) = self.surface.upgrade()
        {
            surface.remove_signal_listener(SurfaceSignal::Close, listener);
        }
        Some(action)
    }
}

enum Payload {
    Plain(TeardownFn),
    Bound(Rc<SurfaceBinding>),
}

struct Entry {
    id: ActionId,
    label: Option<Cow<'static, str>>,
    payload: Payload,
}

impl Entry {
    fn into_action(self) -> (Option<Cow<'static, str>>, Option<TeardownFn>) {
        let action = match self.payload {
            Payload::Plain(action) => Some(action),
            Payload::Bound(binding) => binding.take(),
        };
        (self.label, action)
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    next_id: u64,
    unwinding: bool,
}

#[derive(Default)]
struct Shared {
    state: RefCell<State>,
    stats: Cell<RegistryStats>,
}

impl Shared {
    fn bump(&self, f: impl FnOnce(&mut RegistryStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn remove(&self, id: ActionId) -> Option<Entry> {
        let mut state = self.state.borrow_mut();
        let idx = state.entries.iter().position(|entry| entry.id == id)?;
        Some(state.entries.remove(idx))
    }

    fn contains(&self, id: ActionId) -> bool {
        self.state
            .borrow()
            .entries
            .iter()
            .any(|entry| entry.id == id)
    }

    fn record_outcome(&self, outcome: &Outcome) {
        self.bump(|s| {
            s.fired += 1;
            if outcome.is_failed() {
                s.failed += 1;
            }
        });
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut self.state.get_mut().entries);
        if entries.is_empty() {
            return;
        }
        debug!(
            target: "tether.registry",
            abandoned = entries.len(),
            "registry dropped with pending teardown actions"
        );
        for entry in entries {
            // Detach surface listeners; the actions themselves are discarded.
            drop(entry.into_action());
        }
    }
}

/// Resets the unwinding flag even if an action's destructor panics.
struct UnwindGuard<'a> {
    shared: &'a Shared,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        self.shared.state.borrow_mut().unwinding = false;
    }
}

// ---------------------------------------------------------------------------
// UnloaderRegistry
// ---------------------------------------------------------------------------

/// Ordered store of pending teardown actions.
///
/// Cloning creates another handle to the **same** registry.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use tether_core::UnloaderRegistry;
///
/// let registry = UnloaderRegistry::new();
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// for name in ["manifest", "resource", "listener"] {
///     let log = Rc::clone(&log);
///     registry.register(move || log.borrow_mut().push(name));
/// }
///
/// registry.unwind_all();
/// assert_eq!(*log.borrow(), vec!["listener", "resource", "manifest"]);
/// assert!(registry.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct UnloaderRegistry {
    shared: Rc<Shared>,
}

impl fmt::Debug for UnloaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("UnloaderRegistry")
            .field("pending", &state.entries.len())
            .field("unwinding", &state.unwinding)
            .field("stats", &self.shared.stats.get())
            .finish()
    }
}

impl UnloaderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a teardown action.
    ///
    /// While [`unwind_all`](Self::unwind_all) is running the action is
    /// rejected and the returned handle is inert.
    pub fn register(&self, action: impl FnOnce() + 'static) -> UnloadHandle {
        self.insert_or_reject(None, Box::new(action), None)
    }

    /// Register a teardown action with a diagnostic label used in logs.
    pub fn register_labeled(
        &self,
        label: impl Into<Cow<'static, str>>,
        action: impl FnOnce() + 'static,
    ) -> UnloadHandle {
        self.insert_or_reject(Some(label.into()), Box::new(action), None)
    }

    /// Register a teardown action that also fires when `surface` closes.
    ///
    /// Whichever comes first (surface close or unwind) runs the action; the
    /// other trigger is detached.
    pub fn register_with_surface(
        &self,
        action: impl FnOnce() + 'static,
        surface: &SurfaceRef,
    ) -> UnloadHandle {
        self.insert_or_reject(None, Box::new(action), Some(surface))
    }

    /// Labeled variant of [`register_with_surface`](Self::register_with_surface).
    pub fn register_labeled_with_surface(
        &self,
        label: impl Into<Cow<'static, str>>,
        action: impl FnOnce() + 'static,
        surface: &SurfaceRef,
    ) -> UnloadHandle {
        self.insert_or_reject(Some(label.into()), Box::new(action), Some(surface))
    }

    /// Like [`register`](Self::register), but reports rejection instead of
    /// returning an inert handle.
    pub fn try_register(
        &self,
        action: impl FnOnce() + 'static,
    ) -> Result<UnloadHandle, RegistryError> {
        self.insert(None, Box::new(action), None)
    }

    fn insert_or_reject(
        &self,
        label: Option<Cow<'static, str>>,
        action: TeardownFn,
        surface: Option<&SurfaceRef>,
    ) -> UnloadHandle {
        self.insert(label, action, surface)
            .unwrap_or_else(|_| UnloadHandle::inert())
    }

    fn insert(
        &self,
        label: Option<Cow<'static, str>>,
        action: TeardownFn,
        surface: Option<&SurfaceRef>,
    ) -> Result<UnloadHandle, RegistryError> {
        let id = {
            let mut state = self.shared.state.borrow_mut();
            if state.unwinding {
                drop(state);
                self.shared.bump(|s| s.rejected += 1);
                warn!(
                    target: "tether.registry",
                    label = label.as_deref().unwrap_or("-"),
                    "registration during unwind rejected"
                );
                return Err(RegistryError::Unwinding);
            }
            state.next_id += 1;
            ActionId(state.next_id)
        };

        let (payload, bound) = match surface {
            Some(surface) => {
                let binding = Rc::new(SurfaceBinding {
                    surface: Rc::downgrade(surface),
                    listener: Cell::new(None),
                    action: RefCell::new(Some(action)),
                });
                (
                    Payload::Bound(Rc::clone(&binding)),
                    Some((binding, Rc::clone(surface))),
                )
            }
            None => (Payload::Plain(action), None),
        };

        self.shared.state.borrow_mut().entries.push(Entry {
            id,
            label: label.clone(),
            payload,
        });
        self.shared.bump(|s| s.registered += 1);

        // Host call happens with no registry borrow held.
        if let Some((binding, surface)) = bound {
            let listener = surface.add_signal_listener(
                SurfaceSignal::Close,
                close_handler(id, label, Rc::clone(&binding), Rc::downgrade(&self.shared)),
            );
            binding.listener.set(Some(listener));
            debug!(
                target: "tether.registry",
                action = id.get(),
                surface = surface.id().0,
                "teardown bound to surface close"
            );
        }

        Ok(UnloadHandle {
            id: Some(id),
            registry: Rc::downgrade(&self.shared),
        })
    }

    /// Run every pending action newest-first, leaving the registry empty.
    ///
    /// Panics inside actions are caught and logged; they never reach the
    /// caller. Calling this from inside a running action is a no-op.
    pub fn unwind_all(&self) -> UnwindReport {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.unwinding {
                drop(state);
                warn!(target: "tether.unwind", "nested unwind ignored");
                return UnwindReport::default();
            }
            state.unwinding = true;
        }
        let _guard = UnwindGuard {
            shared: &self.shared,
        };

        let start = Instant::now();
        let span = info_span!(
            target: "tether.unwind",
            "tether.unwind",
            actions = tracing::field::Empty,
            failed = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );
        let _enter = span.enter();

        let mut report = UnwindReport::default();
        loop {
            // One pop per borrow so actions can cancel their siblings.
            let next = self.shared.state.borrow_mut().entries.pop();
            let Some(entry) = next else { break };
            let id = entry.id;
            let (label, action) = entry.into_action();
            let Some(action) = action else { continue };

            let outcome = run_isolated(Site::Unwind, label.as_deref(), action);
            self.shared.record_outcome(&outcome);
            report.ran += 1;
            if outcome.is_failed() {
                report.failed += 1;
            }
            tracing::trace!(
                target: "tether.unwind",
                action = id.get(),
                label = label.as_deref().unwrap_or("-"),
                failed = outcome.is_failed(),
                "teardown ran"
            );
        }

        let duration_us = start.elapsed().as_micros() as u64;
        span.record("actions", report.ran as u64);
        span.record("failed", report.failed as u64);
        span.record("duration_us", duration_us);
        info!(
            target: "tether.unwind",
            ran = report.ran,
            failed = report.failed,
            duration_us,
            "unwind complete"
        );
        report
    }

    /// Number of pending actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.borrow().entries.len()
    }

    /// Whether no actions are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `unwind_all` is currently running.
    #[must_use]
    pub fn is_unwinding(&self) -> bool {
        self.shared.state.borrow().unwinding
    }

    /// Snapshot of the cumulative counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.shared.stats.get()
    }
}

fn close_handler(
    id: ActionId,
    label: Option<Cow<'static, str>>,
    binding: Rc<SurfaceBinding>,
    registry: Weak<Shared>,
) -> Rc<dyn Fn()> {
    Rc::new(move || {
        let Some(action) = binding.take() else {
            return;
        };
        let removed = registry.upgrade().and_then(|shared| shared.remove(id));
        drop(removed);

        let outcome = run_isolated(Site::SurfaceClose, label.as_deref(), action);
        if let Some(shared) = registry.upgrade() {
            shared.record_outcome(&outcome);
        }
        debug!(
            target: "tether.registry",
            action = id.get(),
            failed = outcome.is_failed(),
            "surface closed; bound teardown ran"
        );
    })
}

// ---------------------------------------------------------------------------
// UnloadHandle
// ---------------------------------------------------------------------------

/// Handle to one registered action.
///
/// Does not keep the registry alive. Once the action has run or been
/// cancelled every method is a no-op.
#[derive(Clone)]
pub struct UnloadHandle {
    id: Option<ActionId>,
    registry: Weak<Shared>,
}

impl fmt::Debug for UnloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnloadHandle")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl UnloadHandle {
    /// A handle that refers to nothing.
    #[must_use]
    pub fn inert() -> Self {
        Self {
            id: None,
            registry: Weak::new(),
        }
    }

    /// Remove the action without running it and detach any surface-close
    /// subscription.
    ///
    /// Returns `true` if an action was removed. Idempotent.
    pub fn cancel(&self) -> bool {
        let (Some(id), Some(shared)) = (self.id, self.registry.upgrade()) else {
            return false;
        };
        let Some(entry) = shared.remove(id) else {
            return false;
        };
        shared.bump(|s| s.cancelled += 1);
        let (label, action) = entry.into_action();
        drop(action);
        debug!(
            target: "tether.registry",
            action = id.get(),
            label = label.as_deref().unwrap_or("-"),
            "teardown cancelled"
        );
        true
    }

    /// Whether the action is still waiting to run.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        match (self.id, self.registry.upgrade()) {
            (Some(id), Some(shared)) => shared.contains(id),
            _ => false,
        }
    }

    /// The action's id, or `None` for an inert handle.
    #[must_use]
    pub fn id(&self) -> Option<ActionId> {
        self.id
    }
}
