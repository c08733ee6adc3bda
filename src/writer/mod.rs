//! Output writers.
//!
//! The orchestrator drives a [`Writer`] in this order:
//!
//! ```text
//! get_outdated_docs ──► prepare_writing ──► copy_assets
//!        ──► (resolve ──► write_doc_serialized ──► write_doc)* ──► finish
//! ```
//!
//! `write_doc_serialized` always runs on the coordinating thread, right after
//! the tree was resolved. `write_doc` may run on a worker, so everything it
//! touches must be `Sync`; writers keep per-build state behind a lock.

mod html;
mod images;

pub use html::HtmlWriter;
pub use images::post_process_images;

use crate::{
    build::BuildPhase,
    doctree::Doctree,
    environment::BuildEnvironment,
    error::BuildError,
    logger::WarningSink,
    project::Project,
    utils::uri::relative_uri,
};
use quire_core::SerialTasks;
use std::collections::BTreeSet;

/// Shared state a writer may read while handling one document.
pub struct WriteContext<'a> {
    pub env: &'a BuildEnvironment,
    pub warnings: &'a WarningSink,
    pub phase: BuildPhase,
}

pub trait Writer: Send + Sync {
    /// Builder name, as used in `build.builder`.
    fn name(&self) -> &'static str;

    /// Output format family, e.g. `html`.
    fn format(&self) -> &'static str;

    /// Whether `write_doc` may run on parallel workers.
    fn allow_parallel(&self) -> bool {
        false
    }

    /// Image mimetypes this writer can embed, in order of preference.
    fn supported_image_types(&self) -> &[&'static str] {
        &[]
    }

    /// Documents whose output is missing or older than their source.
    fn get_outdated_docs(&self, env: &BuildEnvironment, project: &Project) -> BTreeSet<String>;

    /// URI of `docname`'s output, relative to the output directory.
    fn get_target_uri(&self, docname: &str) -> String;

    /// URI of `to`'s output as seen from `from`'s output.
    fn get_relative_uri(&self, from: &str, to: &str) -> String {
        relative_uri(&self.get_target_uri(from), &self.get_target_uri(to))
    }

    fn prepare_writing(
        &mut self,
        _docnames: &BTreeSet<String>,
        _env: &BuildEnvironment,
    ) -> Result<(), BuildError> {
        Ok(())
    }

    fn copy_assets(&mut self) -> Result<(), BuildError> {
        Ok(())
    }

    /// Coordinator-side step for one resolved tree, before `write_doc`.
    fn write_doc_serialized(
        &self,
        _docname: &str,
        _tree: &mut Doctree,
        _ctx: &WriteContext<'_>,
    ) -> Result<(), BuildError> {
        Ok(())
    }

    fn write_doc(&self, docname: &str, tree: &Doctree) -> Result<(), BuildError>;

    /// Queue finish-up work; the orchestrator joins `tasks` before returning.
    fn finish(
        &mut self,
        _env: &BuildEnvironment,
        _tasks: &mut SerialTasks<BuildError>,
    ) -> Result<(), BuildError> {
        Ok(())
    }
}
