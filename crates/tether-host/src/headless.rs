#![forbid(unsafe_code)]

//! Deterministic in-memory host.
//!
//! [`HeadlessHost`] implements every host service trait with plain
//! `RefCell` state so tests and the reference harness can script a complete
//! extension session: open and close surfaces, fire load signals, notify
//! observers, dispatch element events, and inject one-shot failures into any
//! host operation.
//!
//! Every mutating host call is appended to a journal (see
//! [`HeadlessHost::journal`]) so ordering can be asserted directly.
//!
//! # Dispatch rules
//!
//! Listener dispatch snapshots the listener ids first and then re-checks each
//! id before calling it, so a listener removed by an earlier listener in the
//! same dispatch is never invoked. No interior borrow is held while a
//! callback runs.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use uuid::Uuid;

use crate::{
    AboutModule, AboutRegistrar, ComponentRegistrar, CreationCallback, EventCallback,
    EventTarget, HostError, HostResult, HostServices, ListenerId, ObserverCallback,
    ObserverService, PrefValue, PreferenceService, RedirectChannel, ResourceProtocol,
    SignalCallback, Surface, SurfaceId, SurfaceRef, SurfaceSignal, WindowMediator,
};

// ---------------------------------------------------------------------------
// HeadlessSurface
// ---------------------------------------------------------------------------

struct SignalEntry {
    id: ListenerId,
    signal: SurfaceSignal,
    callback: SignalCallback,
}

/// A scripted surface.
///
/// Starts unloaded unless created through [`HeadlessHost::spawn_surface`].
/// Carries a tiny document model (an ordered list of node names) so consumers
/// can demonstrate DOM-style setup and teardown.
pub struct HeadlessSurface {
    id: SurfaceId,
    window_type: RefCell<Option<String>>,
    attribute_fails: Cell<bool>,
    loaded: Cell<bool>,
    closed: Cell<bool>,
    listeners: RefCell<Vec<SignalEntry>>,
    next_listener: Cell<u64>,
    nodes: RefCell<Vec<String>>,
}

impl HeadlessSurface {
    /// Create an unloaded surface.
    #[must_use]
    pub fn new(id: SurfaceId, window_type: Option<&str>) -> Self {
        Self {
            id,
            window_type: RefCell::new(window_type.map(str::to_owned)),
            attribute_fails: Cell::new(false),
            loaded: Cell::new(false),
            closed: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            nodes: RefCell::new(Vec::new()),
        }
    }

    /// Replace the declared window type.
    pub fn set_window_type(&self, window_type: Option<&str>) {
        *self.window_type.borrow_mut() = window_type.map(str::to_owned);
    }

    /// Make subsequent attribute reads fail (or succeed again).
    pub fn fail_attribute_reads(&self, fail: bool) {
        self.attribute_fails.set(fail);
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Mark the surface loaded and fire its load listeners.
    ///
    /// No-op if already loaded or closed.
    pub fn finish_load(&self) {
        if self.loaded.get() || self.closed.get() {
            return;
        }
        self.loaded.set(true);
        self.dispatch(SurfaceSignal::Load);
    }

    /// Fire close listeners, then drop every remaining listener.
    ///
    /// No-op if already closed.
    pub fn close(&self) {
        if self.closed.get() {
            return;
        }
        self.closed.set(true);
        self.dispatch(SurfaceSignal::Close);
        self.listeners.borrow_mut().clear();
    }

    /// Number of attached listeners for `signal`.
    #[must_use]
    pub fn listener_count(&self, signal: SurfaceSignal) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|entry| entry.signal == signal)
            .count()
    }

    /// Append a node to the document.
    pub fn append_node(&self, node: impl Into<String>) {
        self.nodes.borrow_mut().push(node.into());
    }

    /// Remove the first node equal to `node`. Returns whether one was found.
    pub fn remove_node(&self, node: &str) -> bool {
        let mut nodes = self.nodes.borrow_mut();
        match nodes.iter().position(|n| n == node) {
            Some(idx) => {
                nodes.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the document nodes.
    #[must_use]
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.borrow().clone()
    }

    fn dispatch(&self, signal: SurfaceSignal) {
        let ids: Vec<ListenerId> = self
            .listeners
            .borrow()
            .iter()
            .filter(|entry| entry.signal == signal)
            .map(|entry| entry.id)
            .collect();
        tracing::trace!(surface = self.id.0, ?signal, listeners = ids.len(), "dispatch");
        for id in ids {
            let callback = self
                .listeners
                .borrow()
                .iter()
                .find(|entry| entry.id == id)
                .map(|entry| Rc::clone(&entry.callback));
            if let Some(callback) = callback {
                callback();
            }
        }
    }
}

impl Surface for HeadlessSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn window_type(&self) -> HostResult<Option<String>> {
        if self.attribute_fails.get() {
            return Err(HostError::AttributeRead {
                surface: self.id,
                attribute: "windowtype".into(),
            });
        }
        Ok(self.window_type.borrow().clone())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    fn add_signal_listener(&self, signal: SurfaceSignal, callback: SignalCallback) -> ListenerId {
        let id = ListenerId(self.next_listener.get() + 1);
        self.next_listener.set(id.0);
        self.listeners.borrow_mut().push(SignalEntry {
            id,
            signal,
            callback,
        });
        id
    }

    fn remove_signal_listener(&self, signal: SurfaceSignal, id: ListenerId) {
        self.listeners
            .borrow_mut()
            .retain(|entry| !(entry.id == id && entry.signal == signal));
    }
}

impl fmt::Debug for HeadlessSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessSurface")
            .field("id", &self.id)
            .field("window_type", &self.window_type.borrow())
            .field("loaded", &self.loaded.get())
            .field("closed", &self.closed.get())
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HeadlessElement
// ---------------------------------------------------------------------------

struct ElementListener {
    id: ListenerId,
    event: String,
    capture: bool,
    callback: EventCallback,
}

/// A scripted UI element, optionally owned by a surface.
pub struct HeadlessElement {
    name: String,
    owner: Option<Rc<HeadlessSurface>>,
    listeners: RefCell<Vec<ElementListener>>,
    next_listener: Cell<u64>,
}

impl HeadlessElement {
    /// Create an element owned by `owner` (or detached when `None`).
    #[must_use]
    pub fn new(name: impl Into<String>, owner: Option<&Rc<HeadlessSurface>>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            owner: owner.cloned(),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        })
    }

    /// Element name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch `event`: capture listeners first, then bubble listeners.
    /// Returns how many listeners ran.
    pub fn dispatch(&self, event: &str) -> usize {
        let ids: Vec<ListenerId> = {
            let listeners = self.listeners.borrow();
            let capture = listeners.iter().filter(|l| l.event == event && l.capture);
            let bubble = listeners.iter().filter(|l| l.event == event && !l.capture);
            capture.chain(bubble).map(|l| l.id).collect()
        };
        let mut ran = 0;
        for id in ids {
            let callback = self
                .listeners
                .borrow()
                .iter()
                .find(|l| l.id == id)
                .map(|l| Rc::clone(&l.callback));
            if let Some(callback) = callback {
                callback(event);
                ran += 1;
            }
        }
        ran
    }

    /// Number of attached listeners across all events.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl EventTarget for HeadlessElement {
    fn add_event_listener(
        &self,
        event: &str,
        callback: EventCallback,
        capture: bool,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.get() + 1);
        self.next_listener.set(id.0);
        self.listeners.borrow_mut().push(ElementListener {
            id,
            event: event.to_owned(),
            capture,
            callback,
        });
        id
    }

    fn remove_event_listener(&self, event: &str, id: ListenerId, capture: bool) {
        self.listeners
            .borrow_mut()
            .retain(|l| !(l.id == id && l.event == event && l.capture == capture));
    }

    fn owner_surface(&self) -> Option<SurfaceRef> {
        self.owner
            .as_ref()
            .map(|surface| Rc::clone(surface) as SurfaceRef)
    }
}

impl fmt::Debug for HeadlessElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessElement")
            .field("name", &self.name)
            .field("owner", &self.owner.as_ref().map(|s| s.id))
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HeadlessHost
// ---------------------------------------------------------------------------

/// Host operations that can be made to fail once via
/// [`HeadlessHost::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    AddManifest,
    RemoveManifest,
    SetSubstitution,
    ClearSubstitution,
    SetDefault,
    DeleteBranch,
    RemoveObserver,
    RegisterFactory,
    UnregisterFactory,
}

struct ObserverEntry {
    id: ListenerId,
    topic: String,
    callback: ObserverCallback,
}

struct FactoryEntry {
    contract_id: String,
    module: Rc<dyn AboutModule>,
}

/// In-memory implementation of every host service.
#[derive(Default)]
pub struct HeadlessHost {
    next_id: Cell<u64>,
    surfaces: RefCell<Vec<Rc<HeadlessSurface>>>,
    creation_listeners: RefCell<Vec<(ListenerId, CreationCallback)>>,
    manifests: RefCell<Vec<PathBuf>>,
    substitutions: RefCell<BTreeMap<String, String>>,
    prefs: RefCell<BTreeMap<String, PrefValue>>,
    observers: RefCell<Vec<ObserverEntry>>,
    factories: RefCell<BTreeMap<Uuid, FactoryEntry>>,
    injected: RefCell<HashSet<HostOp>>,
    journal: RefCell<Vec<String>>,
}

impl HeadlessHost {
    /// Create an empty host.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Service bundle backed by this host.
    #[must_use]
    pub fn services(self: &Rc<Self>) -> HostServices {
        HostServices {
            windows: Rc::clone(self) as Rc<dyn WindowMediator>,
            components: Rc::clone(self) as Rc<dyn ComponentRegistrar>,
            resources: Rc::clone(self) as Rc<dyn ResourceProtocol>,
            prefs: Rc::clone(self) as Rc<dyn PreferenceService>,
            observers: Rc::clone(self) as Rc<dyn ObserverService>,
            about: Rc::clone(self) as Rc<dyn AboutRegistrar>,
        }
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn record(&self, entry: String) {
        self.journal.borrow_mut().push(entry);
    }

    fn check(&self, op: HostOp) -> HostResult<()> {
        if self.injected.borrow_mut().remove(&op) {
            return Err(HostError::Rejected(format!("injected failure: {op:?}")));
        }
        Ok(())
    }

    /// Make the next call of `op` fail with [`HostError::Rejected`].
    pub fn fail_next(&self, op: HostOp) {
        self.injected.borrow_mut().insert(op);
    }

    /// Every mutating host call so far, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }

    // --- surfaces ---------------------------------------------------------

    /// Add an already-loaded surface without announcing it (a surface that
    /// existed before anyone subscribed).
    pub fn spawn_surface(&self, window_type: Option<&str>) -> Rc<HeadlessSurface> {
        let surface = Rc::new(HeadlessSurface::new(SurfaceId(self.next_id()), window_type));
        surface.loaded.set(true);
        self.surfaces.borrow_mut().push(Rc::clone(&surface));
        surface
    }

    /// Create an unloaded surface and announce it to creation listeners.
    pub fn open_surface(&self, window_type: Option<&str>) -> Rc<HeadlessSurface> {
        let surface = Rc::new(HeadlessSurface::new(SurfaceId(self.next_id()), window_type));
        self.surfaces.borrow_mut().push(Rc::clone(&surface));

        let ids: Vec<ListenerId> = self
            .creation_listeners
            .borrow()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            let callback = self
                .creation_listeners
                .borrow()
                .iter()
                .find(|(lid, _)| *lid == id)
                .map(|(_, cb)| Rc::clone(cb));
            if let Some(callback) = callback {
                callback(Rc::clone(&surface) as SurfaceRef);
            }
        }
        surface
    }

    /// Close and forget the surface with `id`. Returns whether it was live.
    pub fn close_surface(&self, id: SurfaceId) -> bool {
        let surface = {
            let mut surfaces = self.surfaces.borrow_mut();
            surfaces
                .iter()
                .position(|s| s.id == id)
                .map(|idx| surfaces.remove(idx))
        };
        match surface {
            Some(surface) => {
                surface.close();
                true
            }
            None => false,
        }
    }

    /// The live surface with `id`, as its concrete type.
    #[must_use]
    pub fn surface(&self, id: SurfaceId) -> Option<Rc<HeadlessSurface>> {
        self.surfaces.borrow().iter().find(|s| s.id == id).cloned()
    }

    /// Number of live surfaces.
    #[must_use]
    pub fn surface_count(&self) -> usize {
        self.surfaces.borrow().len()
    }

    /// Number of active creation subscriptions.
    #[must_use]
    pub fn creation_listener_count(&self) -> usize {
        self.creation_listeners.borrow().len()
    }

    // --- observers --------------------------------------------------------

    /// Notify every observer of `topic`. Returns how many ran.
    pub fn notify_observers(&self, topic: &str, data: Option<&str>) -> usize {
        let ids: Vec<ListenerId> = self
            .observers
            .borrow()
            .iter()
            .filter(|o| o.topic == topic)
            .map(|o| o.id)
            .collect();
        let mut ran = 0;
        for id in ids {
            let callback = self
                .observers
                .borrow()
                .iter()
                .find(|o| o.id == id)
                .map(|o| Rc::clone(&o.callback));
            if let Some(callback) = callback {
                callback(topic, data);
                ran += 1;
            }
        }
        ran
    }

    /// Number of observers subscribed to `topic`.
    #[must_use]
    pub fn observer_count(&self, topic: &str) -> usize {
        self.observers
            .borrow()
            .iter()
            .filter(|o| o.topic == topic)
            .count()
    }

    // --- registrations ----------------------------------------------------

    /// Active manifest locations, in registration order.
    #[must_use]
    pub fn manifest_locations(&self) -> Vec<PathBuf> {
        self.manifests.borrow().clone()
    }

    /// Current substitution for `host`.
    #[must_use]
    pub fn substitution(&self, host: &str) -> Option<String> {
        self.substitutions.borrow().get(host).cloned()
    }

    /// All preferences whose name starts with `prefix`.
    #[must_use]
    pub fn prefs_under(&self, prefix: &str) -> Vec<(String, PrefValue)> {
        self.prefs
            .borrow()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Number of registered `about:` factories.
    #[must_use]
    pub fn factory_count(&self) -> usize {
        self.factories.borrow().len()
    }

    /// Resolve an `about:` address through the factory registered for
    /// `contract_id`.
    #[must_use]
    pub fn resolve_about(&self, contract_id: &str, original: &str) -> Option<RedirectChannel> {
        let module = self
            .factories
            .borrow()
            .values()
            .find(|f| f.contract_id == contract_id)
            .map(|f| Rc::clone(&f.module))?;
        Some(module.resolve(original))
    }
}

impl fmt::Debug for HeadlessHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessHost")
            .field("surfaces", &self.surfaces.borrow().len())
            .field("creation_listeners", &self.creation_listeners.borrow().len())
            .field("manifests", &self.manifests.borrow())
            .field("substitutions", &self.substitutions.borrow())
            .field("prefs", &self.prefs.borrow().len())
            .field("observers", &self.observers.borrow().len())
            .field("factories", &self.factories.borrow().len())
            .finish()
    }
}

impl WindowMediator for HeadlessHost {
    fn surfaces(&self) -> Vec<SurfaceRef> {
        self.surfaces
            .borrow()
            .iter()
            .map(|s| Rc::clone(s) as SurfaceRef)
            .collect()
    }

    fn add_creation_listener(&self, callback: CreationCallback) -> ListenerId {
        let id = ListenerId(self.next_id());
        self.creation_listeners.borrow_mut().push((id, callback));
        id
    }

    fn remove_creation_listener(&self, id: ListenerId) {
        self.creation_listeners
            .borrow_mut()
            .retain(|(lid, _)| *lid != id);
    }
}

impl ComponentRegistrar for HeadlessHost {
    fn add_manifest_location(&self, path: &Path) -> HostResult<()> {
        self.check(HostOp::AddManifest)?;
        self.record(format!("add_manifest {}", path.display()));
        self.manifests.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn remove_manifest_location(&self, path: &Path) -> HostResult<()> {
        self.check(HostOp::RemoveManifest)?;
        self.record(format!("remove_manifest {}", path.display()));
        let mut manifests = self.manifests.borrow_mut();
        match manifests.iter().position(|p| p == path) {
            Some(idx) => {
                manifests.remove(idx);
                Ok(())
            }
            None => Err(HostError::NotRegistered(path.display().to_string())),
        }
    }
}

impl ResourceProtocol for HeadlessHost {
    fn set_substitution(&self, host: &str, base: Option<&str>) -> HostResult<()> {
        match base {
            Some(base) => {
                self.check(HostOp::SetSubstitution)?;
                self.record(format!("map {host} -> {base}"));
                self.substitutions
                    .borrow_mut()
                    .insert(host.to_owned(), base.to_owned());
            }
            None => {
                self.check(HostOp::ClearSubstitution)?;
                self.record(format!("unmap {host}"));
                self.substitutions.borrow_mut().remove(host);
            }
        }
        Ok(())
    }
}

impl PreferenceService for HeadlessHost {
    fn set_default(&self, name: &str, value: &PrefValue) -> HostResult<()> {
        self.check(HostOp::SetDefault)?;
        self.record(format!("set_default {name}"));
        self.prefs
            .borrow_mut()
            .insert(name.to_owned(), value.clone());
        Ok(())
    }

    fn get(&self, name: &str) -> Option<PrefValue> {
        self.prefs.borrow().get(name).cloned()
    }

    fn delete_branch(&self, prefix: &str) -> HostResult<()> {
        self.check(HostOp::DeleteBranch)?;
        self.record(format!("delete_branch {prefix}"));
        self.prefs
            .borrow_mut()
            .retain(|name, _| !name.starts_with(prefix));
        Ok(())
    }
}

impl ObserverService for HeadlessHost {
    fn add_observer(&self, topic: &str, callback: ObserverCallback) -> ListenerId {
        let id = ListenerId(self.next_id());
        self.record(format!("add_observer {topic}"));
        self.observers.borrow_mut().push(ObserverEntry {
            id,
            topic: topic.to_owned(),
            callback,
        });
        id
    }

    fn remove_observer(&self, topic: &str, id: ListenerId) -> HostResult<()> {
        self.check(HostOp::RemoveObserver)?;
        self.record(format!("remove_observer {topic}"));
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|o| !(o.id == id && o.topic == topic));
        if observers.len() == before {
            return Err(HostError::NotRegistered(format!("observer {topic}")));
        }
        Ok(())
    }
}

impl AboutRegistrar for HeadlessHost {
    fn register_factory(
        &self,
        cid: Uuid,
        _description: &str,
        contract_id: &str,
        module: Rc<dyn AboutModule>,
    ) -> HostResult<()> {
        self.check(HostOp::RegisterFactory)?;
        let mut factories = self.factories.borrow_mut();
        if factories.contains_key(&cid) {
            return Err(HostError::AlreadyRegistered(cid.to_string()));
        }
        self.record(format!("register_factory {contract_id}"));
        factories.insert(
            cid,
            FactoryEntry {
                contract_id: contract_id.to_owned(),
                module,
            },
        );
        Ok(())
    }

    fn unregister_factory(&self, cid: Uuid) -> HostResult<()> {
        self.check(HostOp::UnregisterFactory)?;
        let removed = self.factories.borrow_mut().remove(&cid);
        match removed {
            Some(entry) => {
                self.record(format!("unregister_factory {}", entry.contract_id));
                Ok(())
            }
            None => Err(HostError::NotRegistered(cid.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn spawned_surfaces_are_loaded_and_silent() {
        let host = HeadlessHost::new();
        let seen = Rc::new(Cell::new(0));
        let seen_clone = Rc::clone(&seen);
        host.add_creation_listener(Rc::new(move |_: SurfaceRef| seen_clone.set(seen_clone.get() + 1)));

        let surface = host.spawn_surface(Some("navigator:browser"));
        assert!(surface.is_loaded());
        assert_eq!(seen.get(), 0);
        assert_eq!(host.surface_count(), 1);
    }

    #[test]
    fn open_surface_announces_unloaded_surface() {
        let host = HeadlessHost::new();
        let loaded_at_announce = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&loaded_at_announce);
        host.add_creation_listener(Rc::new(move |s: SurfaceRef| {
            log.borrow_mut().push(s.is_loaded());
        }));

        host.open_surface(None);
        assert_eq!(*loaded_at_announce.borrow(), vec![false]);
    }

    #[test]
    fn listener_removed_mid_dispatch_does_not_run() {
        let surface = Rc::new(HeadlessSurface::new(SurfaceId(1), None));
        let ran = Rc::new(RefCell::new(Vec::new()));

        let second_id = Rc::new(Cell::new(None));
        let s = Rc::clone(&surface);
        let second = Rc::clone(&second_id);
        let log = Rc::clone(&ran);
        surface.add_signal_listener(
            SurfaceSignal::Close,
            Rc::new(move || {
                log.borrow_mut().push("first");
                if let Some(id) = second.get() {
                    s.remove_signal_listener(SurfaceSignal::Close, id);
                }
            }),
        );
        let log = Rc::clone(&ran);
        let id = surface.add_signal_listener(
            SurfaceSignal::Close,
            Rc::new(move || log.borrow_mut().push("second")),
        );
        second_id.set(Some(id));

        surface.close();
        assert_eq!(*ran.borrow(), vec!["first"]);
        assert_eq!(surface.listener_count(SurfaceSignal::Close), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let host = HeadlessHost::new();
        let surface = host.spawn_surface(None);
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        surface.add_signal_listener(SurfaceSignal::Close, Rc::new(move || c.set(c.get() + 1)));

        assert!(host.close_surface(surface.id()));
        assert!(!host.close_surface(surface.id()));
        surface.close();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn injected_failure_fires_once() {
        let host = HeadlessHost::new();
        host.fail_next(HostOp::AddManifest);
        assert!(host.add_manifest_location(Path::new("/a")).is_err());
        assert!(host.add_manifest_location(Path::new("/a")).is_ok());
        assert_eq!(host.manifest_locations(), vec![PathBuf::from("/a")]);
    }

    #[test]
    fn delete_branch_removes_only_prefix() {
        let host = HeadlessHost::new();
        host.set_default("ext.a", &PrefValue::Bool(true)).unwrap();
        host.set_default("other.b", &PrefValue::Int(1)).unwrap();
        host.delete_branch("ext.").unwrap();
        assert!(host.get("ext.a").is_none());
        assert_eq!(host.get("other.b"), Some(PrefValue::Int(1)));
    }

    #[test]
    fn element_dispatch_runs_capture_first() {
        let element = HeadlessElement::new("button", None);
        let order = Rc::new(RefCell::new(Vec::new()));
        let o = Rc::clone(&order);
        element.add_event_listener("click", Rc::new(move |_: &str| o.borrow_mut().push("bubble")), false);
        let o = Rc::clone(&order);
        element.add_event_listener("click", Rc::new(move |_: &str| o.borrow_mut().push("capture")), true);

        assert_eq!(element.dispatch("click"), 2);
        assert_eq!(*order.borrow(), vec!["capture", "bubble"]);
        assert!(element.owner_surface().is_none());
    }

    #[test]
    fn journal_records_in_order() {
        let host = HeadlessHost::new();
        host.set_substitution("myaddon", Some("file:///addon/")).unwrap();
        host.set_substitution("myaddon", None).unwrap();
        assert_eq!(
            host.journal(),
            vec!["map myaddon -> file:///addon/", "unmap myaddon"]
        );
        assert!(host.substitution("myaddon").is_none());
    }

    #[test]
    fn attribute_read_failure_is_reported() {
        let surface = HeadlessSurface::new(SurfaceId(9), Some("navigator:browser"));
        surface.fail_attribute_reads(true);
        assert!(matches!(
            surface.window_type(),
            Err(HostError::AttributeRead { .. })
        ));
    }
}
