//! The prelude is enough to write and drive an extension.

#![cfg(feature = "runtime")]

use std::cell::Cell;
use std::rc::Rc;

use tether::host::headless::HeadlessHost;
use tether::prelude::*;

struct Pinger {
    hits: Rc<Cell<u32>>,
}

impl Extension for Pinger {
    fn startup(
        &mut self,
        starter: &Starter,
        data: &AddonData,
        _reason: LifecycleReason,
    ) -> runtime::Result<()> {
        starter.register_resource_host("pinger", data)?;
        let hits = Rc::clone(&self.hits);
        starter.register_observer("pinger-ping", move |_: &str, _: Option<&str>| {
            hits.set(hits.get() + 1);
        })?;
        Ok(())
    }
}

fn run() -> Result<()> {
    let host = HeadlessHost::new();
    let hits = Rc::new(Cell::new(0));
    let data = AddonData::new("pinger@example.org", "0.1", "/ext/pinger", "file:///ext/pinger/");
    let mut boot = Bootstrap::new(
        Pinger {
            hits: Rc::clone(&hits),
        },
        data,
        host.services(),
    );

    boot.startup(LifecycleReason::AddonEnable)?;
    host.notify_observers("pinger-ping", None);
    boot.shutdown(LifecycleReason::AddonDisable);
    host.notify_observers("pinger-ping", None);

    assert_eq!(hits.get(), 1);
    assert_eq!(host.substitution("pinger"), None);
    Ok(())
}

#[test]
fn prelude_drives_an_extension() {
    run().unwrap();
}
