#![forbid(unsafe_code)]

//! Scripted extension sessions against the headless host.
//!
//! The harness drives [`Stylist`], a small extension that injects a
//! stylesheet node into every browser surface, through a full
//! startup/shutdown cycle and reports what was left behind. A clean session
//! leaves nothing: no nodes, no preferences, no host mappings, no
//! listeners.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{Map, Value, json};
use tether::host::headless::{HeadlessElement, HeadlessHost};
use tether::{
    AddonData, Bootstrap, EventTarget, Extension, LifecycleReason, Policy, ShutdownOutcome,
    Starter, Surface, SurfaceRef, SurfaceSignal,
};

pub const BROWSER: &str = "navigator:browser";
pub const SHEET: &str = "stylist.css";
pub const PREF_PREFIX: &str = "extensions.stylist.";

/// Demo extension: stylesheet injection plus the usual resource plumbing.
pub struct Stylist {
    host: Rc<HeadlessHost>,
    reloads: Rc<Cell<u32>>,
    clicks: Rc<Cell<u32>>,
    buttons: Rc<RefCell<Vec<Rc<HeadlessElement>>>>,
}

impl Stylist {
    pub fn new(host: Rc<HeadlessHost>) -> Self {
        Self {
            host,
            reloads: Rc::new(Cell::new(0)),
            clicks: Rc::new(Cell::new(0)),
            buttons: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// `stylist-reload` notifications seen.
    pub fn reloads(&self) -> u32 {
        self.reloads.get()
    }

    /// Toolbar button presses seen.
    pub fn clicks(&self) -> u32 {
        self.clicks.get()
    }

    /// Press every toolbar button created so far. Returns how many listeners
    /// ran.
    pub fn press_buttons(&self) -> usize {
        let buttons = self.buttons.borrow().clone();
        buttons.iter().map(|b| b.dispatch("command")).sum()
    }
}

impl Extension for Stylist {
    fn startup(
        &mut self,
        starter: &Starter,
        data: &AddonData,
        reason: LifecycleReason,
    ) -> tether::runtime::Result<()> {
        tracing::info!(target: "tether.harness", addon = %data.id, %reason, "stylist starting");
        starter.register_manifest(data)?;
        starter.register_resource_host("stylist", data)?;
        // `scale` is a float the host cannot store; the policy decides
        // whether it is skipped or fails startup.
        let mut defaults = Map::new();
        defaults.insert("enabled".to_owned(), Value::Bool(true));
        defaults.insert("opacity".to_owned(), json!(80));
        defaults.insert("sheet".to_owned(), json!(SHEET));
        defaults.insert("scale".to_owned(), json!(1.5));
        starter.register_default_prefs_json(PREF_PREFIX, &defaults)?;
        starter.register_about_page("stylist", "chrome://stylist/content/about.html")?;

        let reloads = Rc::clone(&self.reloads);
        starter.register_observer("stylist-reload", move |_: &str, _: Option<&str>| {
            reloads.set(reloads.get() + 1);
        })?;

        let host = Rc::clone(&self.host);
        let clicks = Rc::clone(&self.clicks);
        let buttons = Rc::clone(&self.buttons);
        let per_surface = starter.clone();
        starter.watch_windows(BROWSER, move |surface: &SurfaceRef| {
            let Some(document) = host.surface(surface.id()) else {
                return;
            };
            document.append_node(SHEET);
            let owner = Rc::clone(&document);
            per_surface.registry().register_labeled_with_surface(
                format!("stylesheet {}", surface.id()),
                move || {
                    owner.remove_node(SHEET);
                },
                surface,
            );

            let button = HeadlessElement::new(
                format!("stylist-button-{}", surface.id().0),
                Some(&document),
            );
            let target: Rc<dyn EventTarget> = button.clone();
            let clicks = Rc::clone(&clicks);
            let attached = per_surface.register_event_listener(
                &target,
                "command",
                move |_: &str| clicks.set(clicks.get() + 1),
                false,
            );
            if let Err(err) = attached {
                tracing::warn!(target: "tether.harness", error = %err, "toolbar button not wired");
                return;
            }
            buttons.borrow_mut().push(button);
        })?;
        Ok(())
    }
}

/// Shape of one scripted session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Loaded browser surfaces present before startup.
    pub preexisting: usize,
    /// Browser surfaces opened (and loaded) after startup.
    pub opened: usize,
    /// Non-browser surfaces present before startup.
    pub unrelated: usize,
    /// Close this many browser surfaces before shutdown.
    pub close_before_shutdown: usize,
    pub shutdown_reason: LifecycleReason,
    pub policy: Policy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preexisting: 2,
            opened: 1,
            unrelated: 1,
            close_before_shutdown: 1,
            shutdown_reason: LifecycleReason::AddonDisable,
            policy: Policy::default(),
        }
    }
}

/// What a session left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub stylesheets_injected: usize,
    pub pending_before_shutdown: usize,
    pub outcome: ShutdownOutcome,
    pub leftover_nodes: usize,
    pub leftover_prefs: usize,
    pub leftover_manifests: usize,
    pub resource_mapped: bool,
    pub factories: usize,
    pub creation_listeners: usize,
    pub close_listeners: usize,
    pub reloads: u32,
    pub clicks: u32,
    pub journal: Vec<String>,
}

impl SessionReport {
    /// Whether shutdown removed everything startup created.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leftover_nodes == 0
            && self.leftover_prefs == 0
            && self.leftover_manifests == 0
            && !self.resource_mapped
            && self.factories == 0
            && self.creation_listeners == 0
            && self.close_listeners == 0
    }

    /// One JSON object summarizing the session.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let outcome = match self.outcome {
            ShutdownOutcome::Unwound(report) => {
                json!({"kind": "unwound", "ran": report.ran, "failed": report.failed})
            }
            ShutdownOutcome::Skipped => json!({"kind": "skipped"}),
            ShutdownOutcome::NotRunning => json!({"kind": "not_running"}),
        };
        json!({
            "stylesheets_injected": self.stylesheets_injected,
            "pending_before_shutdown": self.pending_before_shutdown,
            "outcome": outcome,
            "clean": self.is_clean(),
            "leftover": {
                "nodes": self.leftover_nodes,
                "prefs": self.leftover_prefs,
                "manifests": self.leftover_manifests,
                "resource_mapped": self.resource_mapped,
                "factories": self.factories,
                "creation_listeners": self.creation_listeners,
                "close_listeners": self.close_listeners,
            },
            "reloads": self.reloads,
            "clicks": self.clicks,
            "journal_len": self.journal.len(),
        })
    }
}

/// Run one scripted session.
pub fn run_session(config: &SessionConfig) -> tether::Result<SessionReport> {
    let host = HeadlessHost::new();
    let mut surfaces = Vec::new();
    for _ in 0..config.preexisting {
        surfaces.push(host.spawn_surface(Some(BROWSER)));
    }
    for _ in 0..config.unrelated {
        host.spawn_surface(Some("mail:3pane"));
    }

    let data = AddonData::new(
        "stylist@example.org",
        "1.0.0",
        "/profile/extensions/stylist",
        "jar:file:///profile/extensions/stylist.xpi!/",
    );
    let mut boot = Bootstrap::with_policy(
        Stylist::new(Rc::clone(&host)),
        data,
        host.services(),
        config.policy.clone(),
    );
    boot.install(LifecycleReason::AddonInstall);
    boot.startup(LifecycleReason::AddonEnable)?;

    for _ in 0..config.opened {
        let surface = host.open_surface(Some(BROWSER));
        surface.finish_load();
        surfaces.push(surface);
    }

    let stylesheets_injected = surfaces
        .iter()
        .filter(|s| s.nodes().iter().any(|n| n == SHEET))
        .count();

    host.notify_observers("stylist-reload", None);
    let pressed = boot.extension().press_buttons();
    tracing::debug!(target: "tether.harness", pressed, "toolbar buttons pressed");

    let closing = config.close_before_shutdown.min(surfaces.len());
    for surface in surfaces.drain(..closing) {
        host.close_surface(surface.id());
    }

    let pending_before_shutdown = boot.starter().registry().len();
    let outcome = boot.shutdown(config.shutdown_reason);

    let report = SessionReport {
        stylesheets_injected,
        pending_before_shutdown,
        outcome,
        leftover_nodes: surfaces
            .iter()
            .map(|s| s.nodes().iter().filter(|n| *n == SHEET).count())
            .sum(),
        leftover_prefs: host.prefs_under(PREF_PREFIX).len(),
        leftover_manifests: host.manifest_locations().len(),
        resource_mapped: host.substitution("stylist").is_some(),
        factories: host.factory_count(),
        creation_listeners: host.creation_listener_count(),
        close_listeners: surfaces
            .iter()
            .map(|s| s.listener_count(SurfaceSignal::Close))
            .sum(),
        reloads: boot.extension().reloads(),
        clicks: boot.extension().clicks(),
        journal: host.journal(),
    };
    tracing::info!(target: "tether.harness", clean = report.is_clean(), "session finished");
    Ok(report)
}
