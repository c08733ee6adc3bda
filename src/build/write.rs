//! The resolving and writing phases.

use super::{BuildPhase, BuildTarget, Builder};
use crate::{
    doctree::{Doctree, DoctreeCache},
    environment::BuildEnvironment,
    error::BuildError,
    log,
    logger::{ProgressBars, WarningSink},
    writer::{WriteContext, Writer},
};
use quire_core::{ParallelTasks, make_chunks, parallel_available};
use std::{collections::BTreeSet, sync::Arc};

/// Coordinator-side half of writing one document: resolve the cached tree,
/// then let the writer do its serialized step.
fn resolve_doc(
    docname: &str,
    env: &BuildEnvironment,
    cache: &DoctreeCache,
    writer: &dyn Writer,
    warnings: &WarningSink,
    phase: BuildPhase,
) -> Result<Doctree, BuildError> {
    let mut tree = env.get_and_resolve_doctree(docname, cache, writer, warnings)?;
    let ctx = WriteContext {
        env,
        warnings,
        phase,
    };
    writer.write_doc_serialized(docname, &mut tree, &ctx)?;
    Ok(tree)
}

impl Builder {
    /// Resolve and write every document `target` covers plus `updated`
    /// and their toctree parents.
    pub(super) fn write(
        &mut self,
        target: BuildTarget,
        updated: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, BuildError> {
        let found = &self.env.found_docs;
        let mut docnames: BTreeSet<String> = match target {
            BuildTarget::All => found.clone(),
            BuildTarget::Specific(docs) => docs.intersection(found).cloned().collect(),
            BuildTarget::Update(docs) => docs
                .intersection(found)
                .chain(updated.iter().filter(|d| found.contains(*d)))
                .cloned()
                .collect(),
        };
        let parents = self.env.transitive_dependents(&docnames);
        docnames.extend(parents);

        let parallel = self.config.build.parallel;
        let parallel_ok = parallel_available()
            && parallel > 1
            && self.writer.allow_parallel()
            && self.hooks.parallel_write_safe;

        self.hooks.emit_write_started(self.phase);
        log!("write"; "preparing {} documents", docnames.len());
        self.writer.prepare_writing(&docnames, &self.env)?;
        self.writer.copy_assets()?;

        let warnings = Arc::clone(&self.warnings);
        let _pending = (!warnings.is_fatal()).then(|| warnings.pending());

        let ordered: Vec<String> = docnames.iter().cloned().collect();
        if parallel_ok && ordered.len() > 1 {
            self.write_parallel(ordered, parallel - 1)?;
        } else {
            self.write_serial(&ordered)?;
        }
        Ok(docnames)
    }

    fn write_serial(&mut self, docnames: &[String]) -> Result<(), BuildError> {
        let progress = ProgressBars::new_filtered(&[("write", docnames.len())]);

        for docname in docnames {
            self.phase = BuildPhase::Resolving;
            let tree = resolve_doc(
                docname,
                &self.env,
                &self.cache,
                self.writer.as_ref(),
                &self.warnings,
                BuildPhase::Writing,
            )?;
            self.phase = BuildPhase::Writing;
            self.writer.write_doc(docname, &tree)?;

            if let Some(progress) = &progress {
                progress.inc("write", 1);
            }
        }
        Ok(())
    }

    /// Write the first document here, the rest on `nproc` workers.
    ///
    /// Trees are resolved on this thread as each chunk is dispatched, so
    /// workers only ever see finished trees.
    fn write_parallel(&mut self, mut docnames: Vec<String>, nproc: usize) -> Result<(), BuildError> {
        let rest = docnames.split_off(1);
        self.write_serial(&docnames)?;

        self.phase = BuildPhase::Resolving;
        let env = &self.env;
        let cache = &self.cache;
        let writer = self.writer.as_ref();
        let warnings = self.warnings.as_ref();
        let progress = ProgressBars::new_filtered(&[("write", rest.len())]);

        let pool = ParallelTasks::new::<BuildError>(nproc)?;
        log!("write"; "writing {} documents on {} workers", rest.len(), pool.workers());

        pool.execute_chunks(
            make_chunks(rest, pool.workers()),
            |chunk: Vec<String>| -> Result<Vec<(String, Doctree)>, BuildError> {
                chunk
                    .into_iter()
                    .map(|docname| -> Result<(String, Doctree), BuildError> {
                        let phase = BuildPhase::Resolving;
                        let tree = resolve_doc(&docname, env, cache, writer, warnings, phase)?;
                        Ok((docname, tree))
                    })
                    .collect()
            },
            |docs: &[(String, Doctree)]| -> Result<(), BuildError> {
                docs.iter()
                    .try_for_each(|(docname, tree)| writer.write_doc(docname, tree))
            },
            |chunk: Vec<(String, Doctree)>, _: ()| -> Result<(), BuildError> {
                if let Some(progress) = &progress {
                    progress.inc("write", chunk.len());
                }
                Ok(())
            },
        )?;

        self.phase = BuildPhase::Writing;
        Ok(())
    }
}
