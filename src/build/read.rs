//! The reading phase.

use super::{BuildReport, Builder, PARALLEL_READ_THRESHOLD};
use crate::{
    doctree::{CacheMode, Doctree, DoctreeCache, ReadSettings},
    environment::{BuildEnvironment, ConfigStatus, DocumentContext},
    error::{BuildError, RootDocCause},
    log,
    logger::{ProgressBars, WarningSink},
    project::{EXCLUDE_PATHS, Matcher, Project},
    reader::{SourceParser, read_doc},
    utils::fs::now_micros,
};
use quire_core::{ParallelTasks, parallel_available};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};

/// What a read worker hands back for its chunk.
#[derive(Serialize, Deserialize)]
struct ReadUpdate {
    env: BuildEnvironment,
    /// docname → encoded document-tree artifact
    artifacts: Vec<(String, Vec<u8>)>,
}

/// Everything needed to read one document, borrowed from the builder.
struct Reader<'a> {
    parser: &'a dyn SourceParser,
    project: &'a Project,
    found_docs: &'a BTreeSet<String>,
    reporter: &'a Arc<WarningSink>,
    settings: &'a Arc<ReadSettings>,
}

impl Reader<'_> {
    /// Parse `docname` and register it in `env`.
    fn read(&self, env: &mut BuildEnvironment, docname: &str) -> Result<Doctree, BuildError> {
        let read_at = now_micros();
        let mut ctx = DocumentContext::new(docname, self.project, self.found_docs, self.reporter);
        let tree = read_doc(self.parser, &mut ctx, self.reporter, self.settings)?;
        env.process_doc(&tree, ctx, read_at);
        Ok(tree)
    }
}

impl Builder {
    /// Bring the environment up to date with the source tree.
    ///
    /// Returns the sorted docnames that were read plus any the
    /// `env-updated` hooks asked for.
    pub(super) fn read(&mut self, report: &mut BuildReport) -> Result<Vec<String>, BuildError> {
        let config_changed = self.env.config_status != ConfigStatus::Ok;
        let mut outdated = self
            .env
            .get_outdated_files(config_changed, &self.project, &self.cache);

        let extra = self
            .hooks
            .emit_get_outdated(self.phase, &self.env, &outdated);
        outdated.changed.extend(
            extra
                .into_iter()
                .filter(|d| self.env.found_docs.contains(d) && !outdated.added.contains(d)),
        );

        // wildcard toctrees may have gained or lost entries
        if !outdated.added.is_empty() || !outdated.removed.is_empty() {
            let globbed = self
                .env
                .glob_toctrees
                .iter()
                .filter(|d| self.env.found_docs.contains(*d) && !outdated.added.contains(*d))
                .cloned()
                .collect::<Vec<_>>();
            outdated.changed.extend(globbed);
        }

        let reason = match self.env.config_status {
            ConfigStatus::Ok => String::new(),
            status => format!("[{}{}] ", status.reason(), self.env.config_status_extra),
        };
        log!(
            "read";
            "updating environment: {reason}{} added, {} changed, {} removed",
            outdated.added.len(),
            outdated.changed.len(),
            outdated.removed.len()
        );

        for docname in &outdated.removed {
            self.hooks.emit_purge_doc(self.phase, &self.env, docname);
            self.env.clear_doc(docname);
            self.cache.discard(docname)?;
        }

        let mut docnames: Vec<String> = outdated.added.union(&outdated.changed).cloned().collect();
        self.hooks
            .emit_before_read_docs(self.phase, &self.env, &mut docnames);

        let workers = self.config.build.parallel;
        if parallel_available()
            && workers > 1
            && docnames.len() > PARALLEL_READ_THRESHOLD
            && self.hooks.parallel_read_safe
        {
            self.read_parallel(&docnames, workers)?;
        } else {
            self.read_serial(&docnames)?;
        }

        let root_doc = &self.config.project.root_doc;
        if !self.env.all_docs.contains_key(root_doc) {
            return Err(BuildError::RootDocument {
                path: self.project.doc2path(root_doc),
                cause: self.root_doc_cause()?,
            });
        }

        docnames.extend(self.hooks.emit_env_updated(self.phase, &self.env));
        docnames.sort();
        docnames.dedup();

        self.env.config_status = ConfigStatus::Ok;
        self.env.config_status_extra.clear();

        report.added = outdated.added;
        report.changed = outdated.changed;
        report.removed = outdated.removed;
        report.read = docnames.clone();
        Ok(docnames)
    }

    fn read_serial(&mut self, docnames: &[String]) -> Result<(), BuildError> {
        let found_docs = self.env.found_docs.clone();
        let reader = Reader {
            parser: self.parser.as_ref(),
            project: &self.project,
            found_docs: &found_docs,
            reporter: &self.warnings,
            settings: &self.settings,
        };
        let progress = ProgressBars::new_filtered(&[("read", docnames.len())]);

        for docname in docnames {
            self.hooks.emit_purge_doc(self.phase, &self.env, docname);
            self.env.clear_doc(docname);

            let tree = reader.read(&mut self.env, docname)?;
            self.cache.store(tree, CacheMode::Coordinator)?;

            if let Some(progress) = &progress {
                progress.inc("read", 1);
            }
        }
        Ok(())
    }

    /// Read `docnames` on `workers` threads.
    ///
    /// All documents are purged up front; each worker reads its chunk into a
    /// clone of the purged environment and sends back the clone and the
    /// encoded trees. Merging copies only what the chunk's documents own.
    fn read_parallel(&mut self, docnames: &[String], workers: usize) -> Result<(), BuildError> {
        for docname in docnames {
            self.hooks.emit_purge_doc(self.phase, &self.env, docname);
            self.env.clear_doc(docname);
        }

        let snapshot = self.env.clone();
        let reader = Reader {
            parser: self.parser.as_ref(),
            project: &self.project,
            found_docs: &snapshot.found_docs,
            reporter: &self.warnings,
            settings: &self.settings,
        };
        let cache_root = self.cache.root().to_path_buf();
        let progress = ProgressBars::new_filtered(&[("read", docnames.len())]);

        let env = &mut self.env;
        let cache = &mut self.cache;
        let pool = ParallelTasks::new::<BuildError>(workers)?;
        log!("read"; "reading {} documents on {} workers", docnames.len(), pool.workers());

        pool.execute(
            docnames.to_vec(),
            |chunk: &[String]| -> Result<Vec<u8>, BuildError> {
                let mut local = snapshot.clone();
                let mut local_cache = DoctreeCache::new(&cache_root);
                let mut artifacts = Vec::with_capacity(chunk.len());
                for docname in chunk {
                    let tree = reader.read(&mut local, docname)?;
                    if let Some(bytes) = local_cache.store(tree, CacheMode::Worker)? {
                        artifacts.push((docname.clone(), bytes));
                    }
                }
                encode_update(&ReadUpdate { env: local, artifacts })
            },
            |chunk: Vec<String>, update: Vec<u8>| -> Result<(), BuildError> {
                let update = decode_update(&update)?;
                env.merge_info_from(&chunk, &update.env);
                for (docname, bytes) in &update.artifacts {
                    cache.store_artifact(docname, bytes)?;
                }
                if let Some(progress) = &progress {
                    progress.inc("read", chunk.len());
                }
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Why the root document was not read.
    fn root_doc_cause(&self) -> Result<RootDocCause, BuildError> {
        let root = self.project.doc2relpath(&self.config.project.root_doc);

        if let Some(pattern) = Matcher::new(&EXCLUDE_PATHS)?.first_match(&root) {
            return Ok(RootDocCause::BuiltinExclude(pattern.to_owned()));
        }
        if let Some(pattern) = Matcher::new(&self.config.project.exclude_patterns)?.first_match(&root)
        {
            return Ok(RootDocCause::UserExclude(pattern.to_owned()));
        }
        let include = &self.config.project.include_patterns;
        if self.config.project.has_custom_includes() && !Matcher::new(include)?.is_match(&root) {
            return Ok(RootDocCause::NotIncluded(include.clone()));
        }
        Ok(RootDocCause::OutsideSource)
    }
}

fn encode_update(update: &ReadUpdate) -> Result<Vec<u8>, BuildError> {
    bincode::serde::encode_to_vec(update, bincode::config::standard())
        .map_err(|err| BuildError::Serialization(format!("encoding read update: {err}")))
}

fn decode_update(bytes: &[u8]) -> Result<ReadUpdate, BuildError> {
    bincode::serde::decode_from_slice::<ReadUpdate, _>(bytes, bincode::config::standard())
        .map(|(update, _)| update)
        .map_err(|err| BuildError::Serialization(format!("decoding read update: {err}")))
}
