//! End-to-end behavior of the runtime against the headless host.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use proptest::prelude::*;

use tether_host::headless::HeadlessHost;
use tether_host::{Surface, SurfaceId, SurfaceRef, SurfaceSignal};
use tether_runtime::{AddonData, Bootstrap, Extension, LifecycleReason, ShutdownOutcome, Starter};

const BROWSER: &str = "navigator:browser";

fn data() -> AddonData {
    AddonData::new(
        "stylist@example.org",
        "2.1",
        "/profile/extensions/stylist",
        "jar:file:///profile/extensions/stylist.xpi!/",
    )
}

#[test]
fn three_loaded_surfaces_two_matching_gives_two_callbacks() {
    let host = HeadlessHost::new();
    let first = host.spawn_surface(Some(BROWSER));
    host.spawn_surface(Some("devtools:toolbox"));
    let third = host.spawn_surface(Some(BROWSER));
    let starter = Starter::new(host.services());

    let seen = Rc::new(RefCell::new(Vec::<SurfaceId>::new()));
    let sink = Rc::clone(&seen);
    starter
        .watch_windows(BROWSER, move |surface: &SurfaceRef| sink.borrow_mut().push(surface.id()))
        .unwrap();

    assert_eq!(*seen.borrow(), vec![first.id(), third.id()]);
}

#[test]
fn created_surface_waits_for_load() {
    let host = HeadlessHost::new();
    let starter = Starter::new(host.services());
    let calls = Rc::new(Cell::new(0));
    let sink = Rc::clone(&calls);
    starter
        .watch_windows(BROWSER, move |_: &SurfaceRef| sink.set(sink.get() + 1))
        .unwrap();

    let surface = host.open_surface(Some(BROWSER));
    assert_eq!(calls.get(), 0);
    surface.finish_load();
    assert_eq!(calls.get(), 1);
    surface.finish_load();
    assert_eq!(calls.get(), 1);
}

#[test]
fn default_prefs_leave_nothing_after_teardown() {
    let host = HeadlessHost::new();
    let starter = Starter::new(host.services());
    let prefs = serde_json::json!({"a": true, "b": 7, "c": "x"});
    let serde_json::Value::Object(map) = prefs else {
        panic!("object literal");
    };

    starter.register_default_prefs_json("ext.test.", &map).unwrap();
    assert_eq!(host.prefs_under("ext.test.").len(), 3);
    starter.unload();
    assert!(host.prefs_under("ext.test.").is_empty());
}

/// Injects a stylesheet node into every browser surface and removes it on
/// close or unload.
struct Stylist {
    sheet: &'static str,
    host: Rc<HeadlessHost>,
}

impl Extension for Stylist {
    fn startup(
        &mut self,
        starter: &Starter,
        data: &AddonData,
        _reason: LifecycleReason,
    ) -> tether_runtime::Result<()> {
        starter.register_manifest(data)?;
        starter.register_resource_host("stylist", data)?;

        let host = Rc::clone(&self.host);
        let registry = starter.registry().clone();
        let sheet = self.sheet;
        starter.watch_windows(BROWSER, move |surface: &SurfaceRef| {
            let Some(document) = host.surface(surface.id()) else {
                return;
            };
            document.append_node(sheet);
            registry.register_with_surface(
                move || {
                    document.remove_node(sheet);
                },
                surface,
            );
        })?;
        Ok(())
    }
}

#[test]
fn stylesheet_lifecycle_close_then_disable() {
    let host = HeadlessHost::new();
    let early = host.spawn_surface(Some(BROWSER));
    let stylist = Stylist {
        sheet: "stylist.css",
        host: Rc::clone(&host),
    };

    let mut boot = Bootstrap::new(stylist, data(), host.services());
    boot.startup(LifecycleReason::AddonEnable).unwrap();
    assert_eq!(early.nodes(), vec!["stylist.css".to_owned()]);

    let late = host.open_surface(Some(BROWSER));
    late.finish_load();
    assert_eq!(late.nodes(), vec!["stylist.css".to_owned()]);

    // Closing a surface runs its bound teardown once, immediately.
    let pending_before = boot.starter().registry().len();
    late.close();
    assert!(late.nodes().is_empty());
    assert_eq!(boot.starter().registry().len(), pending_before - 1);

    let outcome = boot.shutdown(LifecycleReason::AddonDisable);
    let ShutdownOutcome::Unwound(report) = outcome else {
        panic!("expected unwind, got {outcome:?}");
    };
    assert_eq!(report.failed, 0);
    assert!(early.nodes().is_empty());
    assert!(host.manifest_locations().is_empty());
    assert_eq!(host.substitution("stylist"), None);
    assert_eq!(host.creation_listener_count(), 0);
    assert_eq!(early.listener_count(SurfaceSignal::Close), 0);

    // The stylesheet for `late` was removed exactly once.
    assert!(!late.remove_node("stylist.css"));
}

#[test]
fn journal_shows_reverse_teardown_order() {
    let host = HeadlessHost::new();
    let starter = Starter::new(host.services());
    let data = data();
    starter.register_manifest(&data).unwrap();
    starter.register_resource_host("stylist", &data).unwrap();
    starter
        .register_default_prefs("extensions.stylist.", [("enabled", true)])
        .unwrap();
    starter.unload();

    let journal = host.journal();
    let teardown: Vec<&str> = journal.iter().skip(3).map(String::as_str).collect();
    assert_eq!(
        teardown,
        vec![
            "delete_branch extensions.stylist.",
            "unmap stylist",
            "remove_manifest /profile/extensions/stylist",
        ]
    );
}

#[derive(Debug, Clone)]
enum WindowOp {
    Spawn { browser: bool },
    Open { browser: bool },
    Load(usize),
    Close(usize),
    Cancel,
    Unwind,
}

fn window_op() -> impl Strategy<Value = WindowOp> {
    prop_oneof![
        3 => any::<bool>().prop_map(|browser| WindowOp::Spawn { browser }),
        4 => any::<bool>().prop_map(|browser| WindowOp::Open { browser }),
        6 => (0usize..16).prop_map(WindowOp::Load),
        3 => (0usize..16).prop_map(WindowOp::Close),
        1 => Just(WindowOp::Cancel),
        1 => Just(WindowOp::Unwind),
    ]
}

/// One callback invocation, as seen from inside the callback.
#[derive(Debug, Clone, Copy)]
struct Delivery {
    id: SurfaceId,
    loaded: bool,
    browser: bool,
    after_stop: bool,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn watch_delivers_once_after_load_until_stopped(
        before in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..5),
        ops in proptest::collection::vec(window_op(), 0..40),
    ) {
        let host = HeadlessHost::new();
        // Surfaces spawned after the watch starts are never announced, so
        // they are excluded from the completeness check.
        let mut surfaces = Vec::new();
        let mut announced = Vec::new();
        for (browser, loaded) in before {
            let kind = if browser { BROWSER } else { "mail:3pane" };
            let surface = if loaded {
                host.spawn_surface(Some(kind))
            } else {
                host.open_surface(Some(kind))
            };
            surfaces.push(surface);
            announced.push(true);
        }

        let starter = Starter::new(host.services());
        let stopped = Rc::new(Cell::new(false));
        let deliveries = Rc::new(RefCell::new(Vec::<Delivery>::new()));
        let sink = Rc::clone(&deliveries);
        let flag = Rc::clone(&stopped);
        let handle = starter
            .watch_windows(BROWSER, move |surface: &SurfaceRef| {
                sink.borrow_mut().push(Delivery {
                    id: surface.id(),
                    loaded: surface.is_loaded(),
                    browser: surface.window_type().ok().flatten().as_deref() == Some(BROWSER),
                    after_stop: flag.get(),
                });
            })
            .unwrap();

        for op in ops {
            match op {
                WindowOp::Spawn { browser } => {
                    let kind = if browser { BROWSER } else { "mail:3pane" };
                    surfaces.push(host.spawn_surface(Some(kind)));
                    announced.push(false);
                }
                WindowOp::Open { browser } => {
                    let kind = if browser { BROWSER } else { "mail:3pane" };
                    surfaces.push(host.open_surface(Some(kind)));
                    announced.push(true);
                }
                WindowOp::Load(i) if !surfaces.is_empty() => {
                    surfaces[i % surfaces.len()].finish_load();
                }
                WindowOp::Close(i) if !surfaces.is_empty() => {
                    let id = surfaces[i % surfaces.len()].id();
                    host.close_surface(id);
                }
                WindowOp::Cancel => {
                    stopped.set(true);
                    handle.cancel();
                }
                WindowOp::Unwind => {
                    stopped.set(true);
                    starter.unload();
                }
                WindowOp::Load(_) | WindowOp::Close(_) => {}
            }
        }

        let deliveries = deliveries.borrow();
        let mut counts = HashMap::new();
        for d in deliveries.iter() {
            prop_assert!(d.loaded, "delivered before load: {:?}", d);
            prop_assert!(d.browser, "delivered a non-matching surface: {:?}", d);
            prop_assert!(!d.after_stop, "delivered after stop: {:?}", d);
            *counts.entry(d.id).or_insert(0usize) += 1;
        }
        prop_assert!(counts.values().all(|n| *n == 1));
        prop_assert_eq!(handle.delivered_count(), deliveries.len());

        if !stopped.get() {
            for (surface, seen) in surfaces.iter().zip(&announced) {
                let matching = surface.window_type().ok().flatten().as_deref() == Some(BROWSER);
                if *seen && matching && surface.is_loaded() && !surface.is_closed() {
                    prop_assert_eq!(counts.get(&surface.id()).copied(), Some(1));
                }
            }
        }

        starter.unload();
        prop_assert_eq!(host.creation_listener_count(), 0);
        for surface in &surfaces {
            prop_assert_eq!(surface.listener_count(SurfaceSignal::Load), 0);
            prop_assert_eq!(surface.listener_count(SurfaceSignal::Close), 0);
        }
    }
}
