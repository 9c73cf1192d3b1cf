#![forbid(unsafe_code)]

//! `about:<name>` pages that redirect to a fixed target.

use tether_host::{AboutModule, RedirectChannel};
use uuid::Uuid;

/// Serves `about:<name>` by opening `target` while preserving the original
/// address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AboutRedirector {
    cid: Uuid,
    name: String,
    contract_id: String,
    target: String,
}

impl AboutRedirector {
    /// Build a redirector with a fresh class id.
    pub fn new(name: &str, target: &str, contract_prefix: &str) -> Self {
        Self::with_cid(Uuid::new_v4(), name, target, contract_prefix)
    }

    /// Build a redirector with an explicit class id.
    pub fn with_cid(cid: Uuid, name: &str, target: &str, contract_prefix: &str) -> Self {
        Self {
            cid,
            name: name.to_owned(),
            contract_id: format!("{contract_prefix}{name}"),
            target: target.to_owned(),
        }
    }

    pub fn cid(&self) -> Uuid {
        self.cid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl AboutModule for AboutRedirector {
    fn uri_flags(&self) -> u32 {
        0
    }

    fn resolve(&self, original: &str) -> RedirectChannel {
        RedirectChannel {
            target: self.target.clone(),
            original: original.to_owned(),
        }
    }
}

/// Whether `name` can be used as an `about:` page name.
pub(crate) fn is_valid_page_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
