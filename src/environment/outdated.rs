//! Staleness: which documents have to be read again.

use super::BuildEnvironment;
use crate::{doctree::DoctreeCache, project::Project, utils::fs::mtime_micros};
use std::collections::BTreeSet;

/// Disjoint sets of docnames found by [`BuildEnvironment::get_outdated_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outdated {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl Outdated {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

impl BuildEnvironment {
    /// Compare the environment with the source tree.
    ///
    /// A known document is changed when the configuration changed, its cached
    /// tree is missing, it is marked reread-always, its source is newer than
    /// the time it was read, or one of its dependencies is missing or newer.
    pub fn get_outdated_files(
        &self,
        config_changed: bool,
        project: &Project,
        cache: &DoctreeCache,
    ) -> Outdated {
        let removed = self
            .all_docs
            .keys()
            .filter(|docname| !self.found_docs.contains(*docname))
            .cloned()
            .collect();

        let mut added = BTreeSet::new();
        let mut changed = BTreeSet::new();

        for docname in &self.found_docs {
            let Some(&read_at) = self.all_docs.get(docname) else {
                added.insert(docname.clone());
                continue;
            };
            if config_changed || self.is_stale(docname, read_at, project, cache) {
                changed.insert(docname.clone());
            }
        }

        Outdated {
            added,
            changed,
            removed,
        }
    }

    fn is_stale(&self, docname: &str, read_at: u64, project: &Project, cache: &DoctreeCache) -> bool {
        if !cache.contains(docname) || self.reread_always.contains(docname) {
            return true;
        }
        match mtime_micros(&project.doc2path(docname)) {
            Some(mtime) if mtime <= read_at => {}
            _ => return true,
        }
        self.dependencies.get(docname).is_some_and(|deps| {
            deps.iter().any(|dep| {
                let path = project.srcdir().join(dep);
                !path.is_file() || mtime_micros(&path).is_none_or(|mtime| mtime > read_at)
            })
        })
    }
}
