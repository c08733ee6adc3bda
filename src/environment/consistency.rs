//! Global consistency checks, run once per build after reading.

use super::BuildEnvironment;
use crate::{error::BuildError, logger::WarningSink, project::Project};
use std::collections::{BTreeMap, BTreeSet};

impl BuildEnvironment {
    /// Check the environment's structural invariant and warn about documents
    /// that are unreachable or ambiguous.
    ///
    /// A dangling docname in `all_docs` or `files_to_rebuild` is an internal
    /// error; everything else is a warning.
    pub fn check_consistency(
        &self,
        root_doc: &str,
        project: &Project,
        warnings: &WarningSink,
    ) -> Result<(), BuildError> {
        self.check_references()?;

        // documents pulled into others with `.. include::` need no toctree
        let included: BTreeSet<String> = self
            .dependencies
            .values()
            .flatten()
            .filter_map(|path| project.path2doc(path))
            .collect();

        for docname in self.all_docs.keys() {
            if self.files_to_rebuild.contains_key(docname)
                || docname == root_doc
                || included.contains(docname)
                || self.metadata.get(docname).is_some_and(|m| m.contains_key("orphan"))
            {
                continue;
            }
            warnings.warn_at(docname, None, "document isn't included in any toctree")?;
        }

        self.check_toc_parents(warnings)?;
        self.check_duplicate_labels(warnings)
    }

    fn check_references(&self) -> Result<(), BuildError> {
        let dangling = |docname: &String| !self.found_docs.contains(docname);

        if let Some(docname) = self.all_docs.keys().find(|d| dangling(d)) {
            return Err(BuildError::Inconsistent(format!(
                "`{docname}` was read but is not in the source tree"
            )));
        }
        for (child, parents) in &self.files_to_rebuild {
            if dangling(child) {
                return Err(BuildError::Inconsistent(format!(
                    "rebuild entry for `{child}`, which is not in the source tree"
                )));
            }
            if let Some(parent) = parents.iter().find(|p| dangling(p)) {
                return Err(BuildError::Inconsistent(format!(
                    "`{child}` is included by `{parent}`, which is not in the source tree"
                )));
            }
        }
        Ok(())
    }

    fn check_toc_parents(&self, warnings: &WarningSink) -> Result<(), BuildError> {
        let mut parents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (parent, children) in &self.toctree_includes {
            for child in children {
                parents.entry(child.as_str()).or_default().insert(parent.as_str());
            }
        }

        for (child, parents) in parents.into_iter().filter(|(_, p)| p.len() > 1) {
            let listed: Vec<&str> = parents.iter().copied().collect();
            let chosen = listed[0];
            warnings.warn_at(
                child,
                None,
                format!(
                    "document is referenced in multiple toctrees: {listed:?}, selecting: {chosen} <- {child}"
                ),
            )?;
        }
        Ok(())
    }

    fn check_duplicate_labels(&self, warnings: &WarningSink) -> Result<(), BuildError> {
        for (label, owners) in self.labels.iter().filter(|(_, o)| o.len() > 1) {
            let mut owners = owners.iter();
            let Some((first, _)) = owners.next() else {
                continue;
            };
            for (docname, line) in owners {
                warnings.warn_at(
                    docname,
                    Some(*line),
                    format!("duplicate label {label}, other instance in {first}"),
                )?;
            }
        }
        Ok(())
    }
}
