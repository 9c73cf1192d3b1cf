#![forbid(unsafe_code)]

//! Registration helpers: one setup call paired with one teardown.
//!
//! Every helper performs its setup against the host and then registers the
//! matching teardown with the [`UnloaderRegistry`]. The teardown is
//! registered even when setup fails, so partial setup is always undone; the
//! setup error is still returned to the caller.
//!
//! | Helper                                   | Setup                  | Teardown                  |
//! |------------------------------------------|------------------------|---------------------------|
//! | [`Starter::register_manifest`]           | add manifest location  | remove manifest location  |
//! | [`Starter::register_resource_host`]      | map virtual host       | unmap host                |
//! | [`Starter::register_default_prefs`]      | write defaults         | delete branch at prefix   |
//! | [`Starter::register_about_page`]         | register factory       | unregister factory        |
//! | [`Starter::register_observer`]           | subscribe to topic     | unsubscribe               |
//! | [`Starter::register_event_listener`]     | attach listener        | detach (also on close)    |

use std::borrow::Cow;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tether_core::isolate::{Site, log_teardown_error, run_isolated};
use tether_core::{RegistryError, UnloadHandle, UnloaderRegistry, UnwindReport};
use tether_host::{
    EventTarget, HostResult, HostServices, ListenerId, PrefValue, SurfaceRef,
};
use tracing::debug;

use crate::about::{AboutRedirector, is_valid_page_name};
use crate::bootstrap::AddonData;
use crate::error::{Error, Result};
use crate::policy::Policy;
use crate::prefs::convert_map;
use crate::watcher::{WatchHandle, watch};

/// Extension-side entry point for registering setup/teardown pairs.
///
/// Cloning creates another handle to the **same** registry, so a clone can
/// be moved into watch callbacks that register per-surface teardowns.
#[derive(Debug, Clone)]
pub struct Starter {
    host: HostServices,
    registry: UnloaderRegistry,
    policy: Policy,
}

/// An `about:` page registration.
#[derive(Debug)]
pub struct AboutPage {
    pub redirector: Rc<AboutRedirector>,
    pub handle: UnloadHandle,
}

/// Detaches an event listener early.
///
/// Dropping the guard does nothing; the listener stays attached until
/// [`remove`](Self::remove), its surface closes, or the registry unwinds.
/// A guard that outlives its registry can still detach the listener.
pub struct ListenerGuard {
    element: Rc<dyn EventTarget>,
    event: String,
    id: ListenerId,
    capture: bool,
    handle: UnloadHandle,
    // Shared with the teardown; set by whichever detaches first.
    detached: Rc<Cell<bool>>,
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("event", &self.event)
            .field("capture", &self.capture)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl ListenerGuard {
    /// Detach the listener and drop its teardown. Returns `false` if it was
    /// already detached.
    pub fn remove(&self) -> bool {
        if self.detached.replace(true) {
            return false;
        }
        self.handle.cancel();
        self.element
            .remove_event_listener(&self.event, self.id, self.capture);
        true
    }

    /// Whether the listener is still attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.detached.get()
    }

    /// The registry handle for the detach teardown.
    #[must_use]
    pub fn handle(&self) -> &UnloadHandle {
        &self.handle
    }
}

impl Starter {
    /// Create a starter with a fresh registry and the default policy.
    #[must_use]
    pub fn new(host: HostServices) -> Self {
        Self::with_policy(host, Policy::default())
    }

    #[must_use]
    pub fn with_policy(host: HostServices, policy: Policy) -> Self {
        Self {
            host,
            registry: UnloaderRegistry::new(),
            policy,
        }
    }

    /// The underlying registry, for bespoke `register` calls.
    #[must_use]
    pub fn registry(&self) -> &UnloaderRegistry {
        &self.registry
    }

    #[must_use]
    pub fn host(&self) -> &HostServices {
        &self.host
    }

    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Register a teardown action.
    pub fn register_unloader(&self, action: impl FnOnce() + 'static) -> UnloadHandle {
        self.registry.register(action)
    }

    /// Register a teardown action that also fires when `surface` closes.
    pub fn register_unloader_for(
        &self,
        action: impl FnOnce() + 'static,
        surface: &SurfaceRef,
    ) -> UnloadHandle {
        self.registry.register_with_surface(action, surface)
    }

    /// Run every pending teardown newest-first.
    pub fn unload(&self) -> UnwindReport {
        self.registry.unwind_all()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.registry.is_unwinding() {
            return Err(Error::Registry(RegistryError::Unwinding));
        }
        Ok(())
    }

    /// Register a teardown that calls the host and logs, rather than
    /// propagates, any error it returns.
    fn host_teardown(
        &self,
        label: impl Into<Cow<'static, str>>,
        undo: impl FnOnce() -> HostResult<()> + 'static,
    ) -> UnloadHandle {
        let label = label.into();
        let log_failures = self.policy.log_teardown_failures;
        let action_label = label.clone();
        self.registry.register_labeled(label, move || {
            if let Err(err) = undo() {
                if log_failures {
                    log_teardown_error(&action_label, &err);
                } else {
                    debug!(target: "tether.starter", label = %action_label, error = %err, "teardown host call failed");
                }
            }
        })
    }

    fn finish(setup: HostResult<()>, handle: UnloadHandle, what: &str) -> Result<UnloadHandle> {
        match setup {
            Ok(()) => {
                debug!(target: "tether.starter", what, "registered");
                Ok(handle)
            }
            Err(err) => {
                tracing::warn!(target: "tether.starter", what, error = %err, "setup failed; teardown still registered");
                Err(Error::Host(err))
            }
        }
    }

    /// Mark the add-on's install path as an active component-manifest
    /// location.
    pub fn register_manifest(&self, data: &AddonData) -> Result<UnloadHandle> {
        self.ensure_open()?;
        let components = Rc::clone(&self.host.components);
        let path = data.install_path.clone();

        let setup = components.add_manifest_location(&path);
        let label = format!("manifest {}", path.display());
        let handle = self.host_teardown(label, move || components.remove_manifest_location(&path));
        Self::finish(setup, handle, "manifest")
    }

    /// Map the virtual resource host `host` to the add-on's resource base.
    pub fn register_resource_host(&self, host: &str, data: &AddonData) -> Result<UnloadHandle> {
        self.ensure_open()?;
        let resources = Rc::clone(&self.host.resources);
        let name = host.to_owned();

        let setup = resources.set_substitution(&name, Some(&data.resource_uri));
        let label = format!("resource host {name}");
        let handle = self.host_teardown(label, move || resources.set_substitution(&name, None));
        Self::finish(setup, handle, "resource host")
    }

    /// Write default preferences under `prefix`; teardown deletes the whole
    /// branch.
    ///
    /// Writes stop at the first host error, which is returned after the
    /// teardown has been registered.
    pub fn register_default_prefs<I, K, V>(&self, prefix: &str, prefs: I) -> Result<UnloadHandle>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<PrefValue>,
    {
        self.ensure_open()?;
        if prefix.is_empty() {
            return Err(Error::InvalidPrefPrefix(prefix.to_owned()));
        }
        let store = Rc::clone(&self.host.prefs);

        let mut written = 0usize;
        let mut setup = Ok(());
        for (key, value) in prefs {
            let name = format!("{prefix}{}", key.as_ref());
            if let Err(err) = store.set_default(&name, &value.into()) {
                setup = Err(err);
                break;
            }
            written += 1;
        }
        debug!(target: "tether.starter", prefix, written, "default preferences written");

        let branch = prefix.to_owned();
        let handle = self.host_teardown(format!("prefs {prefix}"), move || store.delete_branch(&branch));
        Self::finish(setup, handle, "default prefs")
    }

    /// Like [`register_default_prefs`](Self::register_default_prefs), for
    /// dynamic values. Unsupported kinds follow
    /// [`Policy::unsupported_values`].
    pub fn register_default_prefs_json(
        &self,
        prefix: &str,
        prefs: &Map<String, Value>,
    ) -> Result<UnloadHandle> {
        self.ensure_open()?;
        if prefix.is_empty() {
            return Err(Error::InvalidPrefPrefix(prefix.to_owned()));
        }
        let converted = convert_map(prefix, prefs, self.policy.unsupported_values)?;
        self.register_default_prefs(prefix, converted)
    }

    /// Serve `about:<name>` by redirecting to `target`.
    pub fn register_about_page(&self, name: &str, target: &str) -> Result<AboutPage> {
        self.ensure_open()?;
        if !is_valid_page_name(name) {
            return Err(Error::InvalidAboutPage(name.to_owned()));
        }
        let redirector = Rc::new(AboutRedirector::new(
            name,
            target,
            &self.policy.about_contract_prefix,
        ));
        let about = Rc::clone(&self.host.about);
        let cid = redirector.cid();

        let setup = about.register_factory(
            cid,
            &format!("about:{name}"),
            redirector.contract_id(),
            redirector.clone(),
        );
        let handle = self.host_teardown(format!("about:{name}"), move || about.unregister_factory(cid));
        Self::finish(setup, handle, "about page").map(|handle| AboutPage { redirector, handle })
    }

    /// Subscribe `callback` to `topic`. Panics in the callback are isolated.
    pub fn register_observer<F>(&self, topic: &str, callback: F) -> Result<UnloadHandle>
    where
        F: Fn(&str, Option<&str>) + 'static,
    {
        self.ensure_open()?;
        let observers = Rc::clone(&self.host.observers);
        let label = format!("observer {topic}");
        let isolated_label = label.clone();
        let id = observers.add_observer(
            topic,
            Rc::new(move |topic: &str, data: Option<&str>| {
                run_isolated(Site::Listener, Some(isolated_label.as_str()), || callback(topic, data));
            }),
        );

        let topic = topic.to_owned();
        let handle = self.host_teardown(label, move || observers.remove_observer(&topic, id));
        Self::finish(Ok(()), handle, "observer")
    }

    /// Attach `callback` for `event` on `element`.
    ///
    /// The listener is detached on unwind, when the element's owning surface
    /// closes, or through the returned guard.
    pub fn register_event_listener<F>(
        &self,
        element: &Rc<dyn EventTarget>,
        event: &str,
        callback: F,
        capture: bool,
    ) -> Result<ListenerGuard>
    where
        F: Fn(&str) + 'static,
    {
        self.ensure_open()?;
        let label = format!("listener {event}");
        let isolated_label = label.clone();
        let id = element.add_event_listener(
            event,
            Rc::new(move |name: &str| {
                run_isolated(Site::Listener, Some(isolated_label.as_str()), || callback(name));
            }),
            capture,
        );

        let target = Rc::clone(element);
        let event_name = event.to_owned();
        let detached = Rc::new(Cell::new(false));
        let flag = Rc::clone(&detached);
        let detach = move || {
            if !flag.replace(true) {
                target.remove_event_listener(&event_name, id, capture);
            }
        };
        let handle = match element.owner_surface() {
            Some(surface) => self
                .registry
                .register_labeled_with_surface(label, detach, &surface),
            None => self.registry.register_labeled(label, detach),
        };
        debug!(target: "tether.starter", event, capture, "event listener attached");

        Ok(ListenerGuard {
            element: Rc::clone(element),
            event: event.to_owned(),
            id,
            capture,
            handle,
            detached,
        })
    }

    /// Invoke `callback` once for every current and future loaded surface of
    /// type `kind`.
    pub fn watch_windows<F>(&self, kind: &str, callback: F) -> Result<WatchHandle>
    where
        F: Fn(&SurfaceRef) + 'static,
    {
        self.ensure_open()?;
        Ok(watch(&self.host.windows, &self.registry, kind, callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;
    use tether_host::headless::{HeadlessElement, HeadlessHost, HostOp};
    use tether_host::{HostError, PreferenceService, Surface, SurfaceSignal};

    fn addon() -> AddonData {
        AddonData::new(
            "tether@example.org",
            "1.0",
            PathBuf::from("/profile/extensions/tether"),
            "jar:file:///profile/extensions/tether.xpi!/",
        )
    }

    fn setup() -> (Rc<HeadlessHost>, Starter) {
        let host = HeadlessHost::new();
        let starter = Starter::new(host.services());
        (host, starter)
    }

    #[test]
    fn manifest_round_trip() {
        let (host, starter) = setup();
        starter.register_manifest(&addon()).unwrap();
        assert_eq!(host.manifest_locations(), vec![addon().install_path]);

        starter.unload();
        assert!(host.manifest_locations().is_empty());
    }

    #[test]
    fn resource_host_round_trip() {
        let (host, starter) = setup();
        starter.register_resource_host("tether", &addon()).unwrap();
        assert_eq!(
            host.substitution("tether").as_deref(),
            Some("jar:file:///profile/extensions/tether.xpi!/")
        );

        starter.unload();
        assert_eq!(host.substitution("tether"), None);
    }

    #[test]
    fn default_prefs_removed_on_unload() {
        let (host, starter) = setup();
        starter
            .register_default_prefs(
                "ext.test.",
                [
                    ("a", PrefValue::Bool(true)),
                    ("b", PrefValue::Int(7)),
                    ("c", PrefValue::from("x")),
                ],
            )
            .unwrap();
        assert_eq!(host.get("ext.test.b"), Some(PrefValue::Int(7)));
        assert_eq!(host.prefs_under("ext.test.").len(), 3);

        starter.unload();
        assert!(host.prefs_under("ext.test.").is_empty());
    }

    #[test]
    fn empty_prefix_rejected() {
        let (host, starter) = setup();
        let err = starter
            .register_default_prefs("", [("a", true)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPrefPrefix(_)));
        assert!(starter.registry().is_empty());
        assert!(host.journal().is_empty());
    }

    #[test]
    fn json_prefs_reject_writes_nothing() {
        let host = HeadlessHost::new();
        let policy = Policy {
            unsupported_values: crate::policy::UnsupportedValuePolicy::Reject,
            ..Policy::default()
        };
        let starter = Starter::with_policy(host.services(), policy);
        let prefs = serde_json::json!({"a": true, "ratio": 0.5});
        let Value::Object(map) = prefs else {
            panic!("object literal");
        };

        let err = starter.register_default_prefs_json("ext.json.", &map).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPrefValue { .. }));
        assert!(host.prefs_under("ext.json.").is_empty());
        assert!(starter.registry().is_empty());
    }

    #[test]
    fn json_prefs_skip_unsupported() {
        let (host, starter) = setup();
        let prefs = serde_json::json!({"a": true, "ratio": 0.5, "n": 3});
        let Value::Object(map) = prefs else {
            panic!("object literal");
        };

        starter.register_default_prefs_json("ext.json.", &map).unwrap();
        assert_eq!(host.prefs_under("ext.json.").len(), 2);
        starter.unload();
        assert!(host.prefs_under("ext.json.").is_empty());
    }

    #[test]
    fn setup_failure_still_registers_teardown() {
        let (host, starter) = setup();
        host.fail_next(HostOp::AddManifest);

        let err = starter.register_manifest(&addon()).unwrap_err();
        assert!(matches!(err, Error::Host(HostError::Rejected(_))));
        assert_eq!(starter.registry().len(), 1);

        // Removing a location that was never added is a logged teardown error.
        let report = starter.unload();
        assert_eq!(report, UnwindReport { ran: 1, failed: 0 });
    }

    #[test]
    fn teardown_host_error_does_not_stop_siblings() {
        let (host, starter) = setup();
        starter.register_manifest(&addon()).unwrap();
        starter.register_resource_host("tether", &addon()).unwrap();
        host.fail_next(HostOp::ClearSubstitution);

        starter.unload();
        assert!(host.manifest_locations().is_empty());
    }

    #[test]
    fn about_page_registered_and_removed() {
        let (host, starter) = setup();
        let page = starter
            .register_about_page("tether", "chrome://tether/content/about.html")
            .unwrap();
        assert_eq!(host.factory_count(), 1);

        let channel = host
            .resolve_about(page.redirector.contract_id(), "about:tether")
            .unwrap();
        assert_eq!(channel.target, "chrome://tether/content/about.html");
        assert_eq!(channel.original, "about:tether");

        starter.unload();
        assert_eq!(host.factory_count(), 0);
    }

    #[test]
    fn about_page_name_validated() {
        let (host, starter) = setup();
        let err = starter.register_about_page("bad name", "x").unwrap_err();
        assert!(matches!(err, Error::InvalidAboutPage(_)));
        assert_eq!(host.factory_count(), 0);
    }

    #[test]
    fn observer_receives_until_unload() {
        let (host, starter) = setup();
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        starter
            .register_observer("tether-ping", move |_: &str, _: Option<&str>| {
                sink.set(sink.get() + 1);
            })
            .unwrap();

        assert_eq!(host.notify_observers("tether-ping", None), 1);
        starter.unload();
        assert_eq!(host.notify_observers("tether-ping", None), 0);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn observer_panic_is_isolated() {
        let (host, starter) = setup();
        starter
            .register_observer("boom", |_: &str, _: Option<&str>| panic!("observer failed"))
            .unwrap();
        assert_eq!(host.notify_observers("boom", Some("payload")), 1);
    }

    #[test]
    fn event_listener_detached_on_surface_close() {
        let (host, starter) = setup();
        let surface = host.spawn_surface(Some("navigator:browser"));
        let element = HeadlessElement::new("toolbar-button", Some(&surface));
        let target: Rc<dyn EventTarget> = element.clone();
        let clicks = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&clicks);

        let guard = starter
            .register_event_listener(
                &target,
                "command",
                move |event: &str| sink.borrow_mut().push(event.to_owned()),
                false,
            )
            .unwrap();
        assert_eq!(element.dispatch("command"), 1);
        assert_eq!(surface.listener_count(SurfaceSignal::Close), 1);

        surface.close();
        assert_eq!(element.listener_count(), 0);
        assert!(!guard.is_attached());
        assert!(starter.registry().is_empty());
        assert_eq!(*clicks.borrow(), vec!["command".to_owned()]);
    }

    #[test]
    fn event_listener_guard_remove() {
        let (_host, starter) = setup();
        let element = HeadlessElement::new("detached", None);
        let target: Rc<dyn EventTarget> = element.clone();

        let guard = starter
            .register_event_listener(&target, "click", |_: &str| {}, true)
            .unwrap();
        assert_eq!(element.listener_count(), 1);
        assert!(guard.handle().id().is_some());
        assert!(guard.handle().is_pending());
        assert!(guard.remove());
        assert!(!guard.remove());
        assert_eq!(element.listener_count(), 0);
        assert!(!guard.handle().is_pending());
        assert!(starter.registry().is_empty());
    }

    #[test]
    fn guard_detaches_after_registry_dropped() {
        let (_host, starter) = setup();
        let element = HeadlessElement::new("orphan", None);
        let target: Rc<dyn EventTarget> = element.clone();

        let guard = starter
            .register_event_listener(&target, "click", |_: &str| {}, false)
            .unwrap();
        drop(starter);
        assert_eq!(element.listener_count(), 1);
        assert!(guard.is_attached());

        assert!(guard.remove());
        assert_eq!(element.listener_count(), 0);
        assert!(!guard.is_attached());
        assert!(!guard.remove());
    }

    #[test]
    fn guard_remove_after_unwind_is_noop() {
        let (_host, starter) = setup();
        let element = HeadlessElement::new("unwound", None);
        let target: Rc<dyn EventTarget> = element.clone();

        let guard = starter
            .register_event_listener(&target, "click", |_: &str| {}, false)
            .unwrap();
        starter.unload();
        assert_eq!(element.listener_count(), 0);
        assert!(!guard.is_attached());
        assert!(!guard.remove());
    }

    #[test]
    fn unloader_for_surface_fires_on_close() {
        let (host, starter) = setup();
        let surface = host.spawn_surface(Some("navigator:browser"));
        let surface_ref: SurfaceRef = surface.clone();
        let fired = Rc::new(Cell::new(0));
        let sink = Rc::clone(&fired);

        let handle = starter.register_unloader_for(move || sink.set(sink.get() + 1), &surface_ref);
        assert!(handle.is_pending());
        assert_eq!(starter.host().windows.surfaces().len(), 1);

        assert!(host.close_surface(surface.id()));
        assert!(surface.is_closed());
        assert_eq!(fired.get(), 1);
        assert!(starter.registry().is_empty());
        assert!(starter.host().windows.surfaces().is_empty());

        starter.unload();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn helpers_refuse_during_unwind() {
        let (host, starter) = setup();
        let starter = Rc::new(starter);
        let inner = Rc::clone(&starter);
        let result = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&result);
        starter.register_unloader(move || {
            *slot.borrow_mut() = Some(inner.register_resource_host("late", &addon()).is_err());
        });

        starter.unload();
        assert_eq!(*result.borrow(), Some(true));
        assert_eq!(host.substitution("late"), None);
    }

    #[test]
    fn watch_windows_registers_one_teardown() {
        let (host, starter) = setup();
        host.spawn_surface(Some("navigator:browser"));
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        let handle = starter
            .watch_windows("navigator:browser", move |_: &SurfaceRef| sink.set(sink.get() + 1))
            .unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(handle.delivered_count(), 1);
        assert_eq!(starter.registry().len(), 1);
    }
}
