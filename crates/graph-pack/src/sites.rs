//! Per-stream field-site state: the prediction tables and the one-entry
//! "last seen" descriptor cache.
//!
//! Both are keyed by the field descriptor's process-unique site id and
//! live in the stream, not in the descriptor: tables grow monotonically
//! while a stream is open and reset wholesale when it is reset, and the
//! process-wide descriptors stay immutable.

use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::MAX_PREDICTION;
use crate::meta::ClassDesc;

#[derive(Default)]
struct SiteState {
    possible: Vec<Arc<ClassDesc>>,
    last: Option<Arc<ClassDesc>>,
}

#[derive(Default)]
pub(crate) struct SiteTable {
    sites: HashMap<u32, SiteState>,
}

impl SiteTable {
    pub fn clear(&mut self) {
        self.sites.clear();
    }

    /// The prediction code for `class` at `site`, if the table has seen
    /// it. Codes start at 1; 0 is reserved.
    pub fn predict_code(&self, site: u32, class: &str) -> Option<usize> {
        let state = self.sites.get(&site)?;
        state
            .possible
            .iter()
            .position(|d| &*d.name == class)
            .map(|i| i + 1)
    }

    /// Resolves a previously observed prediction code back to its class.
    pub fn class_at(&self, site: u32, code: usize) -> Option<Arc<ClassDesc>> {
        let state = self.sites.get(&site)?;
        state.possible.get(code.checked_sub(1)?).cloned()
    }

    /// Records a class observed at `site` under a full OBJECT emission so
    /// the next occurrence can travel as a prediction code. Beyond the
    /// cap the table stays as it is.
    pub fn observe(&mut self, site: u32, desc: &Arc<ClassDesc>) {
        let state = self.sites.entry(site).or_default();
        if state.possible.len() >= MAX_PREDICTION {
            return;
        }
        if state.possible.iter().any(|d| d.name == desc.name) {
            return;
        }
        state.possible.push(desc.clone());
    }

    pub fn last(&self, site: u32, class: &str) -> Option<Arc<ClassDesc>> {
        let state = self.sites.get(&site)?;
        let last = state.last.as_ref()?;
        (&*last.name == class).then(|| last.clone())
    }

    pub fn set_last(&mut self, site: u32, desc: Arc<ClassDesc>) {
        self.sites.entry(site).or_default().last = Some(desc);
    }
}
