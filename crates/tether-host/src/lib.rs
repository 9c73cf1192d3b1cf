#![forbid(unsafe_code)]
#![doc = "Host boundary traits for Tether: surfaces, window mediation, and host services."]
#![doc = ""]
#![doc = "This crate defines the boundary between the teardown coordinator and the"]
#![doc = "environment an extension is embedded in. The coordinator never talks to a"]
#![doc = "concrete host directly; every setup and teardown flows through these traits."]
#![doc = ""]
#![doc = "[`headless`] provides a deterministic in-memory host used by tests and the"]
#![doc = "reference harness."]

use std::fmt;
use std::path::Path;
use std::rc::Rc;

use uuid::Uuid;

pub mod headless;

/// Identity of a host surface (a top-level window or tab-like object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Token returned by every `add_*` call on the host; used to remove the
/// same subscription later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Lifecycle signals a surface can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceSignal {
    /// The surface finished loading its document.
    Load,
    /// The surface is being closed/unloaded.
    Close,
}

/// Errors reported by host services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The requested service is not available in this host.
    Unavailable(&'static str),
    /// A removal targeted something that was never registered.
    NotRegistered(String),
    /// A registration collided with an existing one.
    AlreadyRegistered(String),
    /// Reading an attribute from a surface failed.
    AttributeRead { surface: SurfaceId, attribute: String },
    /// The host refused the operation.
    Rejected(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(service) => write!(f, "host service unavailable: {service}"),
            Self::NotRegistered(what) => write!(f, "not registered: {what}"),
            Self::AlreadyRegistered(what) => write!(f, "already registered: {what}"),
            Self::AttributeRead { surface, attribute } => {
                write!(f, "failed to read attribute '{attribute}' on {surface}")
            }
            Self::Rejected(msg) => write!(f, "host rejected operation: {msg}"),
        }
    }
}

impl std::error::Error for HostError {}

/// Result alias for host operations.
pub type HostResult<T> = Result<T, HostError>;

// ---------------------------------------------------------------------------
// Surfaces
// ---------------------------------------------------------------------------

/// Callback attached to a surface signal.
pub type SignalCallback = Rc<dyn Fn()>;

/// A host-managed UI surface with load-complete and close signals.
///
/// Implementations must tolerate `remove_signal_listener` being called from
/// inside a listener that is currently being dispatched, and must not invoke
/// a listener that was removed earlier in the same dispatch.
pub trait Surface {
    /// Stable identity for the lifetime of the surface.
    fn id(&self) -> SurfaceId;

    /// The declared window-type attribute (e.g. `"navigator:browser"`).
    ///
    /// `Ok(None)` means the attribute is absent.
    fn window_type(&self) -> HostResult<Option<String>>;

    /// Whether the surface has already finished loading.
    fn is_loaded(&self) -> bool;

    /// Subscribe to a signal. The listener stays attached until removed or
    /// until the surface closes.
    fn add_signal_listener(&self, signal: SurfaceSignal, callback: SignalCallback) -> ListenerId;

    /// Remove a previously added listener. Unknown ids are ignored.
    fn remove_signal_listener(&self, signal: SurfaceSignal, id: ListenerId);
}

/// Shared handle to a surface.
pub type SurfaceRef = Rc<dyn Surface>;

/// Callback invoked when the host creates a new surface.
pub type CreationCallback = Rc<dyn Fn(SurfaceRef)>;

/// Enumerates live surfaces and announces new ones.
pub trait WindowMediator {
    /// All currently live surfaces, in host order.
    fn surfaces(&self) -> Vec<SurfaceRef>;

    /// Subscribe to the process-wide "surface created" notification.
    fn add_creation_listener(&self, callback: CreationCallback) -> ListenerId;

    /// Remove a creation subscription. Unknown ids are ignored.
    fn remove_creation_listener(&self, id: ListenerId);
}

// ---------------------------------------------------------------------------
// Host services
// ---------------------------------------------------------------------------

/// Component manifest locations.
pub trait ComponentRegistrar {
    /// Mark `path` as an active component-manifest location.
    fn add_manifest_location(&self, path: &Path) -> HostResult<()>;

    /// Unmark `path`.
    fn remove_manifest_location(&self, path: &Path) -> HostResult<()>;
}

/// Virtual-host substitutions for the resource protocol.
pub trait ResourceProtocol {
    /// Map `host` to `base`, or unmap it when `base` is `None`.
    fn set_substitution(&self, host: &str, base: Option<&str>) -> HostResult<()>;
}

/// The three value kinds the preference service stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefValue {
    Bool(bool),
    Int(i32),
    String(String),
}

impl PrefValue {
    /// Short kind name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::String(_) => "string",
        }
    }
}

impl From<bool> for PrefValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for PrefValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for PrefValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for PrefValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Default-preference storage.
pub trait PreferenceService {
    /// Write a default value for the fully-qualified preference `name`.
    fn set_default(&self, name: &str, value: &PrefValue) -> HostResult<()>;

    /// Read the effective value of `name`, if any.
    fn get(&self, name: &str) -> Option<PrefValue>;

    /// Delete every preference whose name starts with `prefix`.
    fn delete_branch(&self, prefix: &str) -> HostResult<()>;
}

/// Observer callback: receives `(topic, data)`.
pub type ObserverCallback = Rc<dyn Fn(&str, Option<&str>)>;

/// Topic-based notification service.
pub trait ObserverService {
    /// Subscribe `callback` to `topic`.
    fn add_observer(&self, topic: &str, callback: ObserverCallback) -> ListenerId;

    /// Unsubscribe a previously added observer.
    fn remove_observer(&self, topic: &str, id: ListenerId) -> HostResult<()>;
}

/// A resolved `about:` redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectChannel {
    /// Location actually loaded.
    pub target: String,
    /// The `about:` address the user asked for.
    pub original: String,
}

/// A module that serves an `about:<name>` page.
pub trait AboutModule {
    /// Flags advertised for the page.
    fn uri_flags(&self) -> u32;

    /// Open a channel for `original`.
    fn resolve(&self, original: &str) -> RedirectChannel;
}

/// Factory registry for `about:` modules.
pub trait AboutRegistrar {
    /// Register `module` under class id `cid` and `contract_id`.
    fn register_factory(
        &self,
        cid: Uuid,
        description: &str,
        contract_id: &str,
        module: Rc<dyn AboutModule>,
    ) -> HostResult<()>;

    /// Unregister the factory registered under `cid`.
    fn unregister_factory(&self, cid: Uuid) -> HostResult<()>;
}

/// Callback attached to a UI element; receives the event name.
pub type EventCallback = Rc<dyn Fn(&str)>;

/// A UI element that dispatches named events.
pub trait EventTarget {
    /// Attach `callback` for `event`, in the capture phase if `capture`.
    fn add_event_listener(&self, event: &str, callback: EventCallback, capture: bool)
    -> ListenerId;

    /// Detach a listener. Unknown ids are ignored.
    fn remove_event_listener(&self, event: &str, id: ListenerId, capture: bool);

    /// The surface that owns this element, if it is attached to one.
    fn owner_surface(&self) -> Option<SurfaceRef>;
}

/// Bundle of host services handed to the coordinator at startup.
#[derive(Clone)]
pub struct HostServices {
    pub windows: Rc<dyn WindowMediator>,
    pub components: Rc<dyn ComponentRegistrar>,
    pub resources: Rc<dyn ResourceProtocol>,
    pub prefs: Rc<dyn PreferenceService>,
    pub observers: Rc<dyn ObserverService>,
    pub about: Rc<dyn AboutRegistrar>,
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}
