//! Registering a freshly read document in the environment.

use super::{BuildEnvironment, ImageEntry};
use crate::{
    doctree::{Doctree, Node},
    error::BuildError,
    logger::WarningSink,
    project::Project,
};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

/// What a parser sees of the environment while reading one document, and
/// what it reports back besides the tree.
pub struct DocumentContext<'a> {
    pub docname: String,
    pub project: &'a Project,
    /// Documents in the source tree, for expanding `:glob:` toctrees.
    pub found_docs: &'a BTreeSet<String>,
    pub warnings: &'a WarningSink,
    dependencies: BTreeSet<PathBuf>,
    reread_always: bool,
}

impl<'a> DocumentContext<'a> {
    pub fn new(
        docname: impl Into<String>,
        project: &'a Project,
        found_docs: &'a BTreeSet<String>,
        warnings: &'a WarningSink,
    ) -> Self {
        Self {
            docname: docname.into(),
            project,
            found_docs,
            warnings,
            dependencies: BTreeSet::new(),
            reread_always: false,
        }
    }

    pub fn srcdir(&self) -> &Path {
        self.project.srcdir()
    }

    /// Reread this document whenever `path` changes.
    pub fn note_dependency(&mut self, path: impl Into<PathBuf>) {
        self.dependencies.insert(path.into());
    }

    /// Reread this document on every build.
    pub fn note_reread(&mut self) {
        self.reread_always = true;
    }

    pub fn warn(&self, line: Option<usize>, message: impl Into<String>) -> Result<(), BuildError> {
        self.warnings.warn_at(&self.docname, line, message)
    }
}

/// Output file name for an image, unique per source path.
pub fn image_filename(path: &str) -> String {
    path.replace('/', "-")
}

impl BuildEnvironment {
    /// Record everything `tree` declares: read time, dependencies, title,
    /// metadata, labels, toctree edges and images.
    pub fn process_doc(&mut self, tree: &Doctree, context: DocumentContext<'_>, read_at: u64) {
        let docname = tree.docname.clone();
        self.all_docs.insert(docname.clone(), read_at);

        let dependencies = context.dependencies;
        if context.reread_always {
            self.reread_always.insert(docname.clone());
        }
        if let Some(title) = tree.title() {
            self.titles.insert(docname.clone(), title.to_owned());
        }
        if !tree.metadata.is_empty() {
            self.metadata.insert(docname.clone(), tree.metadata.clone());
        }

        let mut includes = Vec::new();
        for node in &tree.nodes {
            match node {
                Node::Target { label, line } => {
                    self.labels
                        .entry(label.clone())
                        .or_default()
                        .insert(docname.clone(), *line);
                }
                Node::Toctree(toctree) => {
                    if toctree.glob {
                        self.glob_toctrees.insert(docname.clone());
                    }
                    for entry in &toctree.entries {
                        self.files_to_rebuild
                            .entry(entry.docname.clone())
                            .or_default()
                            .insert(docname.clone());
                        includes.push(entry.docname.clone());
                    }
                }
                Node::Image(image) => {
                    // remote images ("?") are linked, never copied
                    let local = image
                        .candidates
                        .iter()
                        .filter(|(mimetype, _)| *mimetype != "?")
                        .map(|(_, path)| path)
                        .filter(|path| context.project.srcdir().join(path).is_file());
                    for path in local {
                        self.images
                            .entry(path.clone())
                            .or_insert_with(|| ImageEntry {
                                docnames: BTreeSet::new(),
                                filename: image_filename(path),
                            })
                            .docnames
                            .insert(docname.clone());
                    }
                }
                _ => {}
            }
        }

        if !includes.is_empty() {
            self.toctree_includes.insert(docname.clone(), includes);
        }
        if !dependencies.is_empty() {
            self.dependencies.insert(docname, dependencies);
        }
    }
}
