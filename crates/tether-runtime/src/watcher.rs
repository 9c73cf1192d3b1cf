#![forbid(unsafe_code)]

//! Apply a callback to every current and future surface of one kind.
//!
//! # Delivery rules
//!
//! - A surface is delivered only after it has finished loading. Live
//!   surfaces that are still loading, and every newly created surface, get a
//!   one-shot load listener.
//! - The type check happens at delivery time and is an exact string match on
//!   [`Surface::window_type`]. A missing attribute or a failed read is a
//!   non-match.
//! - Each surface is delivered at most once per watch, tracked by
//!   [`SurfaceId`], even if enumeration and a creation notice both see it.
//! - Callback panics are isolated per surface.
//!
//! Every surface the watch is waiting on or has delivered carries one close
//! listener that forgets it again, so bookkeeping is bounded by the number of
//! live surfaces. Surface ids are never reused.
//!
//! The watch registers one teardown with the registry. Running it (or calling
//! [`WatchHandle::cancel`]) removes the creation subscription and every load
//! and close listener the watch still holds.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tether_core::isolate::{Site, run_isolated};
use tether_core::{UnloadHandle, UnloaderRegistry};
use tether_host::{
    ListenerId, Surface, SurfaceId, SurfaceRef, SurfaceSignal, WindowMediator,
};
use tracing::{debug, info_span};

type WatchCallback = Box<dyn Fn(&SurfaceRef)>;

/// A live surface the watch is waiting on or has delivered.
struct Tracked {
    surface: Weak<dyn Surface>,
    close_listener: ListenerId,
    load_listener: Option<ListenerId>,
    delivered: bool,
}

impl Tracked {
    fn detach(self) {
        let Some(surface) = self.surface.upgrade() else {
            return;
        };
        surface.remove_signal_listener(SurfaceSignal::Close, self.close_listener);
        if let Some(load) = self.load_listener {
            surface.remove_signal_listener(SurfaceSignal::Load, load);
        }
    }
}

struct WatchState {
    kind: String,
    callback: WatchCallback,
    windows: Rc<dyn WindowMediator>,
    tracked: RefCell<HashMap<SurfaceId, Tracked>>,
    delivered_total: Cell<usize>,
    creation_listener: Cell<Option<ListenerId>>,
    active: Cell<bool>,
}

impl WatchState {
    fn matches(&self, surface: &SurfaceRef) -> bool {
        match surface.window_type() {
            Ok(Some(kind)) => kind == self.kind,
            Ok(None) => false,
            Err(err) => {
                debug!(
                    target: "tether.watch",
                    surface = surface.id().0,
                    error = %err,
                    "window type unreadable; treating as non-matching"
                );
                false
            }
        }
    }

    /// Deliver `surface` now if it is loaded, otherwise once it loads.
    fn consider(self: &Rc<Self>, surface: SurfaceRef) {
        if !self.active.get() || self.tracked.borrow().contains_key(&surface.id()) {
            return;
        }
        if surface.is_loaded() {
            self.deliver(&surface);
        } else {
            self.await_load(&surface);
        }
    }

    /// Start tracking `surface` with a close listener that forgets it.
    fn track(self: &Rc<Self>, surface: &SurfaceRef) {
        let id = surface.id();
        if self.tracked.borrow().contains_key(&id) {
            return;
        }
        let state = Rc::downgrade(self);
        let close_listener = surface.add_signal_listener(
            SurfaceSignal::Close,
            Rc::new(move || {
                if let Some(state) = state.upgrade() {
                    state.forget(id);
                }
            }),
        );
        self.tracked.borrow_mut().insert(
            id,
            Tracked {
                surface: Rc::downgrade(surface),
                close_listener,
                load_listener: None,
                delivered: false,
            },
        );
    }

    /// Stop tracking `id` and detach its listeners.
    fn forget(&self, id: SurfaceId) {
        let entry = self.tracked.borrow_mut().remove(&id);
        if let Some(entry) = entry {
            entry.detach();
            debug!(target: "tether.watch", kind = %self.kind, surface = id.0, "surface forgotten");
        }
    }

    fn await_load(self: &Rc<Self>, surface: &SurfaceRef) {
        let id = surface.id();
        self.track(surface);

        let state = Rc::downgrade(self);
        let weak_surface = Rc::downgrade(surface);
        let listener = surface.add_signal_listener(
            SurfaceSignal::Load,
            Rc::new(move || {
                let (Some(state), Some(surface)) = (state.upgrade(), weak_surface.upgrade())
                else {
                    return;
                };
                state.on_loaded(&surface);
            }),
        );
        if let Some(entry) = self.tracked.borrow_mut().get_mut(&id) {
            entry.load_listener = Some(listener);
        }
        debug!(target: "tether.watch", kind = %self.kind, surface = id.0, "waiting for load");
    }

    fn on_loaded(self: &Rc<Self>, surface: &SurfaceRef) {
        let listener = self
            .tracked
            .borrow_mut()
            .get_mut(&surface.id())
            .and_then(|entry| entry.load_listener.take());
        let Some(listener) = listener else {
            return;
        };
        surface.remove_signal_listener(SurfaceSignal::Load, listener);
        self.deliver(surface);
    }

    fn deliver(self: &Rc<Self>, surface: &SurfaceRef) {
        if !self.active.get() {
            return;
        }
        let id = surface.id();
        let already = self
            .tracked
            .borrow()
            .get(&id)
            .is_some_and(|entry| entry.delivered);
        if already {
            return;
        }
        if !self.matches(surface) {
            self.forget(id);
            return;
        }

        self.track(surface);
        if let Some(entry) = self.tracked.borrow_mut().get_mut(&id) {
            entry.delivered = true;
        }
        self.delivered_total.set(self.delivered_total.get() + 1);
        debug!(target: "tether.watch", kind = %self.kind, surface = id.0, "delivering");
        run_isolated(Site::Watch, Some(self.kind.as_str()), || (self.callback)(surface));
    }

    fn shutdown(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(listener) = self.creation_listener.take() {
            self.windows.remove_creation_listener(listener);
        }
        let tracked = std::mem::take(&mut *self.tracked.borrow_mut());
        let detached = tracked.len();
        for entry in tracked.into_values() {
            entry.detach();
        }
        debug!(
            target: "tether.watch",
            kind = %self.kind,
            delivered = self.delivered_total.get(),
            detached,
            "watch stopped"
        );
    }
}

/// Handle to a running watch.
pub struct WatchHandle {
    state: Rc<WatchState>,
    unload: UnloadHandle,
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("kind", &self.state.kind)
            .field("active", &self.is_active())
            .field("delivered", &self.delivered_count())
            .finish()
    }
}

impl WatchHandle {
    /// Stop the watch now and drop its registry entry. Idempotent.
    pub fn cancel(&self) {
        self.state.shutdown();
        self.unload.cancel();
    }

    /// Number of surfaces the callback has been invoked for.
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.state.delivered_total.get()
    }

    /// The window type being watched.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.state.kind
    }

    /// Whether the watch still delivers.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.active.get()
    }
}

/// Invoke `callback` once for every current and future loaded surface whose
/// window type is exactly `kind`.
///
/// If `registry` is unwinding the watch never starts and the returned handle
/// is inactive.
pub fn watch<F>(
    windows: &Rc<dyn WindowMediator>,
    registry: &UnloaderRegistry,
    kind: &str,
    callback: F,
) -> WatchHandle
where
    F: Fn(&SurfaceRef) + 'static,
{
    let span = info_span!(target: "tether.watch", "tether.watch", kind = %kind);
    let _enter = span.enter();

    let state = Rc::new(WatchState {
        kind: kind.to_owned(),
        callback: Box::new(callback),
        windows: Rc::clone(windows),
        tracked: RefCell::new(HashMap::new()),
        delivered_total: Cell::new(0),
        creation_listener: Cell::new(None),
        active: Cell::new(true),
    });

    let teardown_state = Rc::clone(&state);
    let unload = registry.register_labeled(format!("watch {kind}"), move || teardown_state.shutdown());
    if unload.id().is_none() {
        state.active.set(false);
        return WatchHandle { state, unload };
    }

    for surface in windows.surfaces() {
        state.consider(surface);
    }

    let weak = Rc::downgrade(&state);
    let listener = windows.add_creation_listener(Rc::new(move |surface: SurfaceRef| {
        if let Some(state) = weak.upgrade() {
            state.consider(surface);
        }
    }));
    state.creation_listener.set(Some(listener));

    debug!(
        target: "tether.watch",
        kind,
        delivered = state.delivered_total.get(),
        tracked = state.tracked.borrow().len(),
        "watch started"
    );
    WatchHandle { state, unload }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_host::headless::HeadlessHost;

    const BROWSER: &str = "navigator:browser";

    fn counter() -> (Rc<RefCell<Vec<SurfaceId>>>, impl Fn(&SurfaceRef) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |surface: &SurfaceRef| sink.borrow_mut().push(surface.id()))
    }

    fn mediator(host: &Rc<HeadlessHost>) -> Rc<dyn WindowMediator> {
        host.clone()
    }

    #[test]
    fn existing_loaded_matches_delivered_immediately() {
        let host = HeadlessHost::new();
        let a = host.spawn_surface(Some(BROWSER));
        host.spawn_surface(Some("mail:3pane"));
        let c = host.spawn_surface(Some(BROWSER));
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();

        let handle = watch(&mediator(&host), &registry, BROWSER, cb);
        assert_eq!(*seen.borrow(), vec![a.id(), c.id()]);
        assert_eq!(handle.delivered_count(), 2);
        assert_eq!(handle.kind(), BROWSER);
    }

    #[test]
    fn new_surface_delivered_only_after_load() {
        let host = HeadlessHost::new();
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();
        let _handle = watch(&mediator(&host), &registry, BROWSER, cb);

        let surface = host.open_surface(Some(BROWSER));
        assert!(seen.borrow().is_empty());
        surface.finish_load();
        assert_eq!(*seen.borrow(), vec![surface.id()]);
        assert_eq!(surface.listener_count(SurfaceSignal::Load), 0);
    }

    #[test]
    fn type_is_checked_after_load() {
        let host = HeadlessHost::new();
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();
        let _handle = watch(&mediator(&host), &registry, BROWSER, cb);

        let surface = host.open_surface(None);
        surface.set_window_type(Some(BROWSER));
        surface.finish_load();
        assert_eq!(*seen.borrow(), vec![surface.id()]);
    }

    #[test]
    fn unreadable_or_missing_type_is_non_matching() {
        let host = HeadlessHost::new();
        let broken = host.spawn_surface(Some(BROWSER));
        broken.fail_attribute_reads(true);
        host.spawn_surface(None);
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();

        let handle = watch(&mediator(&host), &registry, BROWSER, cb);
        assert!(seen.borrow().is_empty());
        assert_eq!(handle.delivered_count(), 0);
    }

    #[test]
    fn enumerated_then_announced_surface_delivered_once() {
        let host = HeadlessHost::new();
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();
        // Opened (announced) before the watch, still loading at watch time.
        let surface = host.open_surface(Some(BROWSER));
        let handle = watch(&mediator(&host), &registry, BROWSER, cb);

        let as_ref: SurfaceRef = surface.clone();
        handle.state.consider(Rc::clone(&as_ref));
        assert_eq!(surface.listener_count(SurfaceSignal::Load), 1);

        surface.finish_load();
        handle.state.consider(as_ref);
        assert_eq!(*seen.borrow(), vec![surface.id()]);
    }

    #[test]
    fn callback_panic_is_isolated_per_surface() {
        let host = HeadlessHost::new();
        let first = host.spawn_surface(Some(BROWSER));
        let second = host.spawn_surface(Some(BROWSER));
        let registry = UnloaderRegistry::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let bad = first.id();

        watch(&mediator(&host), &registry, BROWSER, move |surface: &SurfaceRef| {
            if surface.id() == bad {
                panic!("callback failed");
            }
            sink.borrow_mut().push(surface.id());
        });
        assert_eq!(*seen.borrow(), vec![second.id()]);
    }

    #[test]
    fn teardown_removes_creation_and_load_listeners() {
        let host = HeadlessHost::new();
        let loading = host.open_surface(Some(BROWSER));
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();
        let handle = watch(&mediator(&host), &registry, BROWSER, cb);
        assert_eq!(host.creation_listener_count(), 1);
        assert_eq!(loading.listener_count(SurfaceSignal::Load), 1);

        registry.unwind_all();
        assert_eq!(host.creation_listener_count(), 0);
        assert_eq!(loading.listener_count(SurfaceSignal::Load), 0);
        assert!(!handle.is_active());

        loading.finish_load();
        host.open_surface(Some(BROWSER)).finish_load();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn cancel_stops_future_deliveries() {
        let host = HeadlessHost::new();
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();
        let handle = watch(&mediator(&host), &registry, BROWSER, cb);
        assert_eq!(registry.len(), 1);

        handle.cancel();
        handle.cancel();
        assert!(registry.is_empty());
        assert_eq!(host.creation_listener_count(), 0);
        host.open_surface(Some(BROWSER)).finish_load();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn watch_during_unwind_never_starts() {
        let host = HeadlessHost::new();
        let registry = UnloaderRegistry::new();
        let inner = registry.clone();
        let windows = mediator(&host);
        let started = Rc::new(Cell::new(None));
        let slot = Rc::clone(&started);
        registry.register(move || {
            let handle = watch(&windows, &inner, BROWSER, |_: &SurfaceRef| {});
            slot.set(Some(handle.is_active()));
        });

        registry.unwind_all();
        assert_eq!(started.get(), Some(false));
        assert_eq!(host.creation_listener_count(), 0);
    }

    #[test]
    fn closed_surfaces_are_forgotten() {
        let host = HeadlessHost::new();
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();
        let handle = watch(&mediator(&host), &registry, BROWSER, cb);

        for _ in 0..50 {
            let surface = host.open_surface(Some(BROWSER));
            surface.finish_load();
            assert_eq!(surface.listener_count(SurfaceSignal::Close), 1);
            host.close_surface(surface.id());
        }
        let mut held = Vec::new();
        for _ in 0..20 {
            let surface = host.open_surface(Some(BROWSER));
            host.close_surface(surface.id());
            held.push(surface);
        }

        assert_eq!(seen.borrow().len(), 50);
        assert_eq!(handle.delivered_count(), 50);
        assert!(handle.state.tracked.borrow().is_empty());
        assert!(
            held.iter()
                .all(|s| s.listener_count(SurfaceSignal::Load) == 0)
        );
        assert_eq!(host.surface_count(), 0);
    }

    #[test]
    fn non_matching_load_is_not_tracked() {
        let host = HeadlessHost::new();
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();
        let handle = watch(&mediator(&host), &registry, BROWSER, cb);

        let other = host.open_surface(Some("mail:3pane"));
        assert_eq!(other.listener_count(SurfaceSignal::Close), 1);
        other.finish_load();
        assert!(seen.borrow().is_empty());
        assert_eq!(other.listener_count(SurfaceSignal::Close), 0);
        assert!(handle.state.tracked.borrow().is_empty());
    }

    #[test]
    fn teardown_detaches_close_listeners_of_delivered_surfaces() {
        let host = HeadlessHost::new();
        let delivered = host.spawn_surface(Some(BROWSER));
        let registry = UnloaderRegistry::new();
        let (seen, cb) = counter();
        let _handle = watch(&mediator(&host), &registry, BROWSER, cb);
        assert_eq!(delivered.listener_count(SurfaceSignal::Close), 1);

        registry.unwind_all();
        assert_eq!(delivered.listener_count(SurfaceSignal::Close), 0);
        assert_eq!(*seen.borrow(), vec![delivered.id()]);
    }
}
