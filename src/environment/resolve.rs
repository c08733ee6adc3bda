//! Resolving cached trees against cross-document state.

use super::{BuildEnvironment, docname_join};
use crate::{
    doctree::{Doctree, DoctreeCache, Link, XrefKind},
    error::BuildError,
    logger::WarningSink,
    writer::Writer,
};

impl BuildEnvironment {
    /// Load `docname`'s tree from the cache and fill in every reference:
    /// `:doc:` and `:ref:` links, toctree entries.
    ///
    /// Unresolvable references are warned about and stay unresolved.
    pub fn get_and_resolve_doctree(
        &self,
        docname: &str,
        cache: &DoctreeCache,
        writer: &dyn Writer,
        warnings: &WarningSink,
    ) -> Result<Doctree, BuildError> {
        let mut tree = cache.load(docname)?;

        for xref in tree.xrefs_mut() {
            xref.resolved = match xref.kind {
                XrefKind::Doc => {
                    let target = docname_join(docname, &xref.target);
                    self.link_to(docname, &target, writer, None)
                }
                XrefKind::Ref => self
                    .labels
                    .get(&xref.target)
                    .and_then(|owners| owners.keys().next())
                    .and_then(|owner| self.link_to(docname, owner, writer, Some(&xref.target))),
            };
            if xref.resolved.is_none() {
                let message = match xref.kind {
                    XrefKind::Doc => format!("unknown document: {:?}", xref.target),
                    XrefKind::Ref => format!("undefined label: {:?}", xref.target),
                };
                warnings.warn_at(docname, Some(xref.line), message)?;
            }
        }

        for toctree in tree.toctrees_mut() {
            let line = toctree.line;
            for entry in &mut toctree.entries {
                entry.resolved = self.link_to(docname, &entry.docname, writer, None);
                if entry.resolved.is_none() {
                    warnings.warn_at(
                        docname,
                        Some(line),
                        format!(
                            "toctree contains reference to nonexisting document {:?}",
                            entry.docname
                        ),
                    )?;
                }
            }
        }

        Ok(tree)
    }

    fn link_to(
        &self,
        from: &str,
        to: &str,
        writer: &dyn Writer,
        anchor: Option<&str>,
    ) -> Option<Link> {
        if !self.all_docs.contains_key(to) {
            return None;
        }
        let text = self.titles.get(to).map_or(to, String::as_str).to_owned();
        let mut uri = writer.get_relative_uri(from, to);
        if let Some(anchor) = anchor {
            uri.push('#');
            uri.push_str(anchor);
        }
        Some(Link { text, uri })
    }
}
