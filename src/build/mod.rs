//! Build orchestration.
//!
//! Every entry point funnels into [`Builder::build`], which runs the phases
//! in order:
//!
//! ```text
//! Initialization   load environment, compile message catalogs, find files
//!       │
//! Reading          outdated sets → purge removed → read (serial/parallel)
//!       │          → root document check → env-updated
//!       │
//!       ├── nothing read? ──► (update build with nothing to write: done)
//!       │
//! ConsistencyCheck persist environment, then check it
//!       │
//! Resolving ◄─┐    resolve doctree against the environment (coordinator)
//! Writing ────┘    write_doc_serialized, write_doc (workers when parallel)
//!       │
//! finish           writer.finish, join finish tasks
//! ```

mod phase;
mod read;
mod write;

pub use phase::BuildPhase;

use crate::{
    config::{PARSER_CONFIG, ProjectConfig},
    doctree::{DoctreeCache, ReadSettings},
    environment::BuildEnvironment,
    error::BuildError,
    events::Hooks,
    i18n::{CatalogCompiler, CatalogInfo, CatalogRepository, docname_to_domain},
    log,
    logger::{ProgressBars, WarningSink},
    project::Project,
    reader::{MarkupParser, SourceParser},
    writer::Writer,
};
use quire_core::SerialTasks;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Reading runs in parallel only for more documents than this.
const PARALLEL_READ_THRESHOLD: usize = 5;

/// Which documents the write phase covers, besides the ones just read.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BuildTarget {
    /// Every document in the source tree.
    All,
    /// Only these documents.
    Specific(BTreeSet<String>),
    /// These documents plus whatever was read.
    Update(BTreeSet<String>),
}

/// What one build did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    /// Documents read, after hooks.
    pub read: Vec<String>,
    /// Documents found stale because something they include was read.
    pub dependents: BTreeSet<String>,
    pub written: BTreeSet<String>,
    pub warnings: usize,
}

pub struct Builder {
    config: ProjectConfig,
    project: Project,
    env: BuildEnvironment,
    cache: DoctreeCache,
    parser: Arc<dyn SourceParser>,
    writer: Box<dyn Writer>,
    hooks: Hooks,
    warnings: Arc<WarningSink>,
    settings: Arc<ReadSettings>,
    catalog_compiler: Option<Box<dyn CatalogCompiler>>,
    phase: BuildPhase,
    finish_tasks: SerialTasks<BuildError>,
}

impl Builder {
    /// Load the saved environment (unless `fresh_env` is set) and compare
    /// its configuration with `config`.
    pub fn new(config: ProjectConfig, writer: Box<dyn Writer>) -> Self {
        let env = if config.build.fresh_env {
            log!("env"; "fresh environment requested");
            BuildEnvironment::new()
        } else {
            match BuildEnvironment::load(&config.build.doctrees) {
                Ok(env) => env,
                Err(BuildError::Io { .. }) => {
                    log!("env"; "no saved environment, starting fresh");
                    BuildEnvironment::new()
                }
                Err(err) => {
                    log!("env"; "discarding saved environment: {err}");
                    BuildEnvironment::new()
                }
            }
        };

        let mut builder = Self {
            project: Project::new(&config.build.source, config.project.source_suffix.clone()),
            cache: DoctreeCache::new(&config.build.doctrees),
            warnings: Arc::new(WarningSink::new(config.build.warnings_fatal)),
            settings: Arc::new(ReadSettings {
                language: config.project.language.clone(),
                root_doc: config.project.root_doc.clone(),
                parser_config: config.root.join(PARSER_CONFIG),
            }),
            parser: Arc::new(MarkupParser),
            hooks: Hooks::new(),
            catalog_compiler: None,
            phase: BuildPhase::Initialization,
            finish_tasks: SerialTasks::new(),
            env,
            writer,
            config,
        };
        builder.env.setup_config(&builder.config);
        builder
    }

    pub fn with_parser(mut self, parser: Arc<dyn SourceParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_catalog_compiler(mut self, compiler: Box<dyn CatalogCompiler>) -> Self {
        self.catalog_compiler = Some(compiler);
        self
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub const fn env(&self) -> &BuildEnvironment {
        &self.env
    }

    pub const fn cache(&self) -> &DoctreeCache {
        &self.cache
    }

    pub const fn phase(&self) -> BuildPhase {
        self.phase
    }

    pub fn warnings(&self) -> &WarningSink {
        &self.warnings
    }

    // ========================================================================
    // Entry Points
    // ========================================================================

    /// Read what is outdated, write everything.
    pub fn build_all(&mut self) -> Result<BuildReport, BuildError> {
        self.phase = BuildPhase::Initialization;
        let catalogs = self.catalogs();
        let message = format!("all of {} po files", catalogs.len());
        self.compile_catalogs(catalogs, &message)?;
        self.find_files()?;

        self.build(BuildTarget::All, "all source files")
    }

    /// Read what is outdated, write only the documents for `filenames`.
    ///
    /// Files that don't exist, lie outside the source directory or aren't
    /// documents are warned about and skipped.
    pub fn build_specific(&mut self, filenames: &[PathBuf]) -> Result<BuildReport, BuildError> {
        self.phase = BuildPhase::Initialization;
        self.find_files()?;
        let mut docnames = BTreeSet::new();
        for filename in filenames {
            if let Some(docname) = self.docname_for_file(filename)? {
                docnames.insert(docname);
            }
        }

        let domains: BTreeSet<String> = docnames
            .iter()
            .map(|d| docname_to_domain(d, self.config.project.gettext_compact))
            .collect();
        let catalogs: Vec<CatalogInfo> = self
            .catalogs()
            .into_iter()
            .filter(|c| domains.contains(&c.domain))
            .collect();
        let message = format!("targets for {} po files that are specified", catalogs.len());
        self.compile_catalogs(catalogs, &message)?;

        let summary = format!("{} source files given on command line", docnames.len());
        self.build(BuildTarget::Specific(docnames), &summary)
    }

    /// Read what is outdated, write what the writer considers outdated plus
    /// whatever was read.
    pub fn build_update(&mut self) -> Result<BuildReport, BuildError> {
        self.phase = BuildPhase::Initialization;
        let catalogs: Vec<CatalogInfo> = self
            .catalogs()
            .into_iter()
            .filter(CatalogInfo::is_outdated)
            .collect();
        let message = format!("targets for {} po files that are out of date", catalogs.len());
        self.compile_catalogs(catalogs, &message)?;
        self.find_files()?;

        let to_build = self.writer.get_outdated_docs(&self.env, &self.project);
        let summary = format!("targets for {} source files that are out of date", to_build.len());
        self.build(BuildTarget::Update(to_build), &summary)
    }

    // ========================================================================
    // Main Procedure
    // ========================================================================

    fn build(&mut self, target: BuildTarget, summary: &str) -> Result<BuildReport, BuildError> {
        log!("build"; "{summary}");
        let mut report = BuildReport::default();

        self.phase = BuildPhase::Reading;
        let read = {
            let warnings = Arc::clone(&self.warnings);
            let _pending = (!warnings.is_fatal()).then(|| warnings.pending());
            self.read(&mut report)?
        };

        let mut updated: BTreeSet<String> = read.iter().cloned().collect();
        report.dependents = self.env.transitive_dependents(&read);
        updated.extend(report.dependents.iter().cloned());
        match report.dependents.len() {
            0 => log!("read"; "looking for now-outdated files... none found"),
            n => log!("read"; "looking for now-outdated files... {n} found"),
        }

        if !updated.is_empty() {
            self.env.persist(&self.config.build.doctrees)?;

            self.phase = BuildPhase::ConsistencyCheck;
            log!("build"; "checking consistency");
            self.env
                .check_consistency(&self.config.project.root_doc, &self.project, &self.warnings)?;
            self.hooks
                .emit_check_consistency(self.phase, &self.env, &self.warnings)?;
        } else if matches!(&target, BuildTarget::Update(docs) if docs.is_empty()) {
            log!("build"; "no targets are out of date.");
            report.warnings = self.warnings.count();
            return Ok(report);
        }

        self.phase = BuildPhase::Resolving;
        report.written = self.write(target, &updated)?;

        self.writer.finish(&self.env, &mut self.finish_tasks)?;
        self.finish_tasks.join()?;

        report.warnings = self.warnings.count();
        match report.warnings {
            0 => log!("build"; "build succeeded."),
            1 => log!("build"; "build succeeded, 1 warning."),
            n => log!("build"; "build succeeded, {n} warnings."),
        }
        Ok(report)
    }

    // ========================================================================
    // Catalogs
    // ========================================================================

    fn catalogs(&self) -> Vec<CatalogInfo> {
        CatalogRepository::new(
            self.project.srcdir(),
            &self.config.project.locale_dirs,
            &self.config.project.language,
        )
        .catalogs()
    }

    fn compile_catalogs(&self, catalogs: Vec<CatalogInfo>, message: &str) -> Result<(), BuildError> {
        let Some(compiler) = &self.catalog_compiler else {
            return Ok(());
        };
        if !self.config.project.gettext_auto_build || catalogs.is_empty() {
            return Ok(());
        }

        log!("i18n"; "building [mo]: {message}");
        let progress = ProgressBars::new_filtered(&[("i18n", catalogs.len())]);
        for catalog in &catalogs {
            compiler.compile(catalog, &self.config.project.language)?;
            if let Some(progress) = &progress {
                progress.inc("i18n", 1);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Rediscover the source tree, so writers see this build's documents.
    fn find_files(&mut self) -> Result<(), BuildError> {
        self.env
            .find_files(&self.config, &mut self.project, &self.warnings)
    }

    fn docname_for_file(&self, filename: &Path) -> Result<Option<String>, BuildError> {
        let path = std::path::absolute(filename).map_err(|err| BuildError::io(filename, err))?;
        let shown = filename.display();

        if !path.exists() {
            self.warnings
                .warn(None, format!("file {shown} given on command line does not exist, ignoring"))?;
            return Ok(None);
        }
        if !path.starts_with(self.project.srcdir()) {
            self.warnings.warn(
                None,
                format!("file {shown} given on command line is not under the source directory, ignoring"),
            )?;
            return Ok(None);
        }
        match self.project.path2doc(&path) {
            Some(docname) => Ok(Some(docname)),
            None => {
                self.warnings.warn(
                    None,
                    format!("file {shown} given on command line is not a valid document, ignoring"),
                )?;
                Ok(None)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        doctree::{Doctree, Node},
        environment::DocumentContext,
        error::RootDocCause,
        writer::HtmlWriter,
    };
    use std::{
        fs,
        sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::{Duration, SystemTime},
    };
    use tempfile::TempDir;

    /// Shared log of strings, cloned into writers and hooks.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Recorder {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        fn written(&self) -> BTreeSet<String> {
            self.entries().into_iter().collect()
        }
    }

    struct RecordingWriter {
        log: Recorder,
        fail_on: Option<&'static str>,
    }

    impl Writer for RecordingWriter {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn format(&self) -> &'static str {
            "test"
        }

        fn allow_parallel(&self) -> bool {
            true
        }

        fn get_outdated_docs(&self, _env: &BuildEnvironment, _project: &Project) -> BTreeSet<String> {
            BTreeSet::new()
        }

        fn get_target_uri(&self, docname: &str) -> String {
            format!("{docname}.out")
        }

        fn write_doc(&self, docname: &str, tree: &Doctree) -> Result<(), BuildError> {
            assert!(tree.is_detached());
            if self.fail_on == Some(docname) {
                return Err(BuildError::Worker(format!("cannot write {docname}")));
            }
            self.log.push(docname);
            Ok(())
        }
    }

    fn project(files: &[(&str, &[u8])]) -> (TempDir, ProjectConfig) {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::for_root(dir.path());
        for (path, content) in files {
            let path = config.build.source.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        (dir, config)
    }

    fn recording(config: &ProjectConfig, log: &Recorder) -> Builder {
        let writer = RecordingWriter {
            log: log.clone(),
            fail_on: None,
        };
        Builder::new(config.clone(), Box::new(writer))
    }

    fn set(docnames: &[&str]) -> BTreeSet<String> {
        docnames.iter().map(|d| (*d).to_owned()).collect()
    }

    fn touch(path: &Path) {
        let later = SystemTime::now() + Duration::from_secs(10);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(later)
            .unwrap();
    }

    const INDEX: &[u8] = b"# Home\n\n.. toctree::\n\n   a\n   b\n";

    /// Eight documents: enough to take the parallel read path.
    fn large_project() -> (TempDir, ProjectConfig) {
        let mut files: Vec<(String, Vec<u8>)> = vec![
            (
                "index.rst".into(),
                b"# Home\n\n.. toctree::\n   :glob:\n\n   api\n   guide/*\n".to_vec(),
            ),
            (
                "api.rst".into(),
                b".. _api-top:\n\n# API\n\nBack to :doc:`index`.\n".to_vec(),
            ),
        ];
        for n in 1..=6 {
            let body = format!(".. _guide-{n}:\n\n# Guide {n}\n\nSee :ref:`api-top`.\n");
            files.push((format!("guide/part{n}.rst"), body.into_bytes()));
        }
        let borrowed: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(path, body)| (path.as_str(), body.as_slice()))
            .collect();
        project(&borrowed)
    }

    #[test]
    fn test_full_build_reads_and_caches_everything() {
        let (_dir, config) = project(&[("index.rst", INDEX), ("a.rst", b"# A\n"), ("b.rst", b"# B\n")]);
        let log = Recorder::default();
        let mut builder = recording(&config, &log);

        let report = builder.build_all().unwrap();

        assert_eq!(report.added, set(&["a", "b", "index"]));
        assert_eq!(report.read, ["a", "b", "index"]);
        assert_eq!(report.written, set(&["a", "b", "index"]));
        assert_eq!(report.warnings, 0);
        assert_eq!(log.written(), report.written);
        assert_eq!(builder.env().found_docs.len(), 3);
        for docname in &builder.env().found_docs {
            let tree = builder.cache().load(docname).unwrap();
            assert!(tree.is_detached());
        }
        assert_eq!(builder.cache().load("b").unwrap().title(), Some("B"));
        assert_eq!(builder.phase(), BuildPhase::Writing);
    }

    #[test]
    fn test_touching_one_document_rebuilds_it_and_its_parents() {
        let (_dir, config) = project(&[
            ("index.rst", INDEX),
            ("a.rst", b"# A\n"),
            ("b.rst", b"# B\n"),
            ("notes.rst", b":orphan:\n\n# Notes\n"),
        ]);
        let first = {
            let mut builder = recording(&config, &Recorder::default());
            builder.build_all().unwrap();
            builder.env().all_docs.clone()
        };
        let artifact = |docname: &str| {
            let path = DoctreeCache::new(&config.build.doctrees).artifact_path(docname);
            fs::read(path).unwrap()
        };
        let before: Vec<Vec<u8>> = ["a", "notes"].iter().map(|d| artifact(d)).collect();

        touch(&config.build.source.join("b.rst"));
        let log = Recorder::default();
        let mut builder = recording(&config, &log);
        let report = builder.build_update().unwrap();

        assert_eq!(report.changed, set(&["b"]));
        assert_eq!(report.read, ["b"]);
        assert_eq!(report.dependents, set(&["index"]));
        assert_eq!(report.written, set(&["b", "index"]));
        assert_eq!(log.written(), report.written);

        let after: Vec<Vec<u8>> = ["a", "notes"].iter().map(|d| artifact(d)).collect();
        assert_eq!(before, after);
        let env = builder.env();
        for docname in ["a", "index", "notes"] {
            assert_eq!(env.all_docs[docname], first[docname]);
        }
        assert!(env.all_docs["b"] > first["b"]);
    }

    #[test]
    fn test_parallel_read_matches_serial() {
        let (_dir, mut config) = large_project();
        config.build.fresh_env = true;

        let mut results = Vec::new();
        for workers in [1, 2, 4] {
            config.build.parallel = workers;
            let log = Recorder::default();
            let mut builder = recording(&config, &log);
            let report = builder.build_all().unwrap();
            assert_eq!(report.read.len(), 8);
            assert_eq!(report.warnings, 0);
            results.push((builder.env().canonical(), log.written()));
        }

        assert_eq!(results[0].1.len(), 8);
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], results[2]);
        let env = &results[2].0;
        assert_eq!(env.labels["guide-3"].keys().collect::<Vec<_>>(), ["guide/part3"]);
        assert_eq!(env.files_to_rebuild["guide/part6"], set(&["index"]));
    }

    #[test]
    fn test_parallel_write_failure_aborts_build() {
        let (_dir, mut config) = large_project();
        config.build.parallel = 4;
        let log = Recorder::default();
        let writer = RecordingWriter {
            log: log.clone(),
            fail_on: Some("guide/part4"),
        };
        let mut builder = Builder::new(config, Box::new(writer));

        let err = builder.build_all().unwrap_err();
        assert!(matches!(&err, BuildError::Worker(message) if message.contains("guide/part4")));
        assert!(!log.written().contains("guide/part4"));
    }

    #[test]
    fn test_removed_glob_member_marks_parent_changed() {
        let (_dir, config) = project(&[
            ("index.rst", b"# Home\n\n.. toctree::\n   :glob:\n\n   guide/*\n"),
            ("guide/one.rst", b"# One\n"),
            ("guide/two.rst", b"# Two\n"),
        ]);
        recording(&config, &Recorder::default()).build_all().unwrap();

        fs::remove_file(config.build.source.join("guide/two.rst")).unwrap();
        let mut builder = recording(&config, &Recorder::default());
        let report = builder.build_update().unwrap();

        assert_eq!(report.removed, set(&["guide/two"]));
        assert_eq!(report.changed, set(&["index"]));
        assert_eq!(report.read, ["index"]);
        assert!(!builder.env().all_docs.contains_key("guide/two"));
        assert!(!builder.cache().contains("guide/two"));
        assert_eq!(builder.env().toctree_includes["index"], ["guide/one"]);
    }

    #[test]
    fn test_missing_root_document_aborts_before_writing() {
        let (_dir, config) = project(&[("a.rst", b":orphan:\n\n# A\n")]);
        let log = Recorder::default();
        let mut builder = recording(&config, &log);

        let err = builder.build_all().unwrap_err();
        match err {
            BuildError::RootDocument { path, cause } => {
                assert_eq!(path, config.build.source.join("index.rst"));
                assert_eq!(cause, RootDocCause::OutsideSource);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_excluded_root_document_names_the_pattern() {
        let (_dir, mut config) = project(&[("index.rst", INDEX), ("a.rst", b":orphan:\n")]);
        config.project.exclude_patterns = vec!["index.rst".into()];
        let mut builder = recording(&config, &Recorder::default());

        let err = builder.build_all().unwrap_err();
        assert!(matches!(
            err,
            BuildError::RootDocument {
                cause: RootDocCause::UserExclude(ref pattern),
                ..
            } if pattern == "index.rst"
        ));
    }

    #[test]
    fn test_undecodable_byte_warns_once() {
        let (_dir, config) = project(&[("index.rst", b"# Home\n\nfine\nbad \xff here\n")]);
        let mut builder = recording(&config, &Recorder::default());

        let report = builder.build_all().unwrap();

        assert_eq!(report.warnings, 1);
        let records = builder.warnings().records();
        assert_eq!(records.len(), 1);
        let message = records[0].to_string();
        assert!(message.starts_with("index:4: undecodable source characters"), "{message}");
        assert_eq!(report.written, set(&["index"]));
        assert_eq!(builder.cache().load("index").unwrap().title(), Some("Home"));
    }

    #[test]
    fn test_fatal_warning_keeps_persisted_environment() {
        let (_dir, mut config) = project(&[("index.rst", b"# Home\n"), ("stray.rst", b"# Stray\n")]);
        config.build.warnings_fatal = true;
        let log = Recorder::default();
        let mut builder = recording(&config, &log);

        let err = builder.build_all().unwrap_err();
        assert!(matches!(err, BuildError::Warning { .. }));
        assert!(log.entries().is_empty());

        let saved = BuildEnvironment::load(&config.build.doctrees).unwrap();
        assert!(saved.all_docs.contains_key("stray"));
    }

    #[test]
    fn test_build_specific_writes_requested_documents() {
        let (_dir, config) = project(&[("index.rst", INDEX), ("a.rst", b"# A\n"), ("b.rst", b"# B\n")]);
        recording(&config, &Recorder::default()).build_all().unwrap();

        let log = Recorder::default();
        let mut builder = recording(&config, &log);
        let files = [
            config.build.source.join("a.rst"),
            config.build.source.join("missing.rst"),
        ];
        let report = builder.build_specific(&files).unwrap();

        assert!(report.read.is_empty());
        assert_eq!(report.written, set(&["a", "index"]));
        assert_eq!(log.written(), report.written);
        let records = builder.warnings().records();
        assert_eq!(records.len(), 1);
        assert!(records[0].message.contains("does not exist"));
    }

    #[test]
    fn test_update_with_nothing_outdated_writes_nothing() {
        let (_dir, config) = project(&[("index.rst", INDEX), ("a.rst", b"# A\n"), ("b.rst", b"# B\n")]);
        let html = |config: &ProjectConfig| {
            Builder::new(config.clone(), Box::new(HtmlWriter::new(config)))
        };
        html(&config).build_all().unwrap();
        assert!(config.build.output.join("index.html").is_file());

        let report = html(&config).build_update().unwrap();
        assert!(report.read.is_empty());
        assert!(report.written.is_empty());
    }

    #[test]
    fn test_html_build_copies_images() {
        let (_dir, config) = project(&[
            ("index.rst", b"# Home\n\n.. image:: img/logo.png\n"),
            ("img/logo.png", b"not really a png"),
        ]);
        let mut builder = Builder::new(config.clone(), Box::new(HtmlWriter::new(&config)));
        builder.build_all().unwrap();

        let copied = config.build.output.join("_images/img-logo.png");
        assert_eq!(fs::read(copied).unwrap(), b"not really a png");
        let html = fs::read_to_string(config.build.output.join("index.html")).unwrap();
        assert!(html.contains("_images/img-logo.png"));
    }

    #[test]
    fn test_hooks_run_at_their_phases() {
        let (_dir, config) = project(&[("index.rst", INDEX), ("a.rst", b"# A\n"), ("b.rst", b"# B\n")]);
        recording(&config, &Recorder::default()).build_all().unwrap();

        let calls = Recorder::default();
        let log = Recorder::default();
        let mut builder = recording(&config, &log);
        let hooks = builder.hooks_mut();
        let c = calls.clone();
        hooks.on_before_read_docs(move |phase, _, docnames| {
            c.push(format!("before-read-docs:{phase}:{}", docnames.join(",")));
        });
        let c = calls.clone();
        hooks.on_env_updated(move |phase, _| {
            c.push(format!("env-updated:{phase}"));
            vec!["b".into()]
        });
        let c = calls.clone();
        hooks.on_check_consistency(move |phase, _, _| {
            c.push(format!("check-consistency:{phase}"));
            Ok(())
        });
        let c = calls.clone();
        hooks.on_write_started(move |phase| c.push(format!("write-started:{phase}")));

        let report = builder.build_update().unwrap();

        assert_eq!(
            calls.entries(),
            [
                "before-read-docs:reading:",
                "env-updated:reading",
                "check-consistency:consistency check",
                "write-started:resolving",
            ]
        );
        assert_eq!(report.read, ["b"]);
        assert_eq!(report.written, set(&["b", "index"]));
    }

    #[test]
    fn test_unsafe_hooks_force_serial_read() {
        let (_dir, mut config) = large_project();
        config.build.parallel = 4;
        let mut builder = recording(&config, &Recorder::default());
        builder.hooks_mut().parallel_read_safe = false;
        builder.hooks_mut().parallel_write_safe = false;

        let report = builder.build_all().unwrap();
        assert_eq!(report.read.len(), 8);
        assert_eq!(report.written.len(), 8);
    }

    #[test]
    fn test_unreadable_include_is_reread_every_build() {
        let (_dir, config) = project(&[("index.rst", b"# Home\n\n.. include:: later.inc\n")]);
        let first = recording(&config, &Recorder::default()).build_all().unwrap();
        assert_eq!(first.warnings, 1);

        let report = recording(&config, &Recorder::default()).build_update().unwrap();
        assert_eq!(report.changed, set(&["index"]));
        assert_eq!(report.read, ["index"]);
    }

    #[test]
    fn test_custom_parser() {
        struct Shouting;

        impl SourceParser for Shouting {
            fn parse(&self, source: &str, ctx: &mut DocumentContext<'_>) -> Result<Doctree, BuildError> {
                let mut tree = Doctree::new(ctx.docname.clone(), ctx.project.doc2path(&ctx.docname));
                tree.nodes.push(Node::Title {
                    text: source.trim().to_uppercase(),
                    line: 1,
                });
                Ok(tree)
            }
        }

        let (_dir, config) = project(&[("index.rst", b"quiet\n")]);
        let mut builder = recording(&config, &Recorder::default()).with_parser(Arc::new(Shouting));
        builder.build_all().unwrap();

        assert_eq!(builder.env().titles["index"], "QUIET");
        assert_eq!(builder.cache().load("index").unwrap().title(), Some("QUIET"));
    }

    #[test]
    fn test_catalogs_compiled_before_reading() {
        struct Compiler(Recorder);

        impl CatalogCompiler for Compiler {
            fn compile(&self, catalog: &CatalogInfo, language: &str) -> Result<(), BuildError> {
                self.0.push(format!("{language}:{}", catalog.domain));
                Ok(())
            }
        }

        let (_dir, mut config) = project(&[
            ("index.rst", b"# Home\n"),
            ("locales/de/LC_MESSAGES/index.po", b""),
        ]);
        config.project.language = "de".into();
        let compiled = Recorder::default();
        let mut builder = recording(&config, &Recorder::default())
            .with_catalog_compiler(Box::new(Compiler(compiled.clone())));

        builder.build_all().unwrap();
        assert_eq!(compiled.entries(), ["de:index"]);
    }

    #[test]
    fn test_untouched_root_document_is_not_rewritten() {
        let (_dir, config) = project(&[
            ("index.rst", INDEX),
            ("a.rst", b"# A\n"),
            ("b.rst", b"# B\n"),
            ("notes.rst", b":orphan:\n\n# Notes\n"),
        ]);
        recording(&config, &Recorder::default()).build_all().unwrap();

        touch(&config.build.source.join("notes.rst"));
        let log = Recorder::default();
        let report = recording(&config, &log).build_update().unwrap();

        assert_eq!(report.read, ["notes"]);
        assert!(report.dependents.is_empty());
        assert_eq!(report.written, set(&["notes"]));
        assert_eq!(log.written(), set(&["notes"]));
    }

    #[test]
    fn test_parser_config_is_a_dependency_of_every_document() {
        let (_dir, config) = project(&[("index.rst", INDEX), ("a.rst", b"# A\n"), ("b.rst", b"# B\n")]);
        let shared = config.root.join(PARSER_CONFIG);
        fs::write(&shared, "").unwrap();
        let first = recording(&config, &Recorder::default()).build_all().unwrap();
        assert_eq!(first.read, ["a", "b", "index"]);

        let unchanged = recording(&config, &Recorder::default()).build_update().unwrap();
        assert!(unchanged.read.is_empty());

        touch(&shared);
        let report = recording(&config, &Recorder::default()).build_update().unwrap();
        assert_eq!(report.changed, set(&["a", "b", "index"]));
        assert_eq!(report.read, ["a", "b", "index"]);
    }

    #[test]
    fn test_parallel_read_failure_aborts_build() {
        struct FailOn(&'static str);

        impl SourceParser for FailOn {
            fn parse(&self, source: &str, ctx: &mut DocumentContext<'_>) -> Result<Doctree, BuildError> {
                if ctx.docname == self.0 {
                    return Err(BuildError::Parse {
                        docname: ctx.docname.clone(),
                        message: "unterminated literal block".into(),
                    });
                }
                MarkupParser.parse(source, ctx)
            }
        }

        let (_dir, mut config) = large_project();
        config.build.parallel = 4;
        let log = Recorder::default();
        let mut builder = recording(&config, &log).with_parser(Arc::new(FailOn("guide/part3")));

        let err = builder.build_all().unwrap_err();
        assert!(matches!(
            &err,
            BuildError::Parse { docname, message }
                if docname == "guide/part3" && message == "unterminated literal block"
        ));
        assert!(log.entries().is_empty());
        assert!(!builder.cache().contains("guide/part3"));
        assert!(BuildEnvironment::load(&config.build.doctrees).is_err());
        assert!(!config.build.doctrees.join("environment.json").exists());
    }

    #[test]
    fn test_each_build_starts_in_initialization() {
        struct FailAfterFirst(AtomicBool);

        impl CatalogCompiler for FailAfterFirst {
            fn compile(&self, _catalog: &CatalogInfo, _language: &str) -> Result<(), BuildError> {
                if self.0.swap(true, Ordering::SeqCst) {
                    return Err(BuildError::Worker("msgfmt failed".into()));
                }
                Ok(())
            }
        }

        let (_dir, mut config) = project(&[
            ("index.rst", b"# Home\n"),
            ("locales/de/LC_MESSAGES/index.po", b""),
        ]);
        config.project.language = "de".into();
        let mut builder = recording(&config, &Recorder::default())
            .with_catalog_compiler(Box::new(FailAfterFirst(AtomicBool::new(false))));

        builder.build_all().unwrap();
        assert_eq!(builder.phase(), BuildPhase::Writing);

        assert!(builder.build_update().is_err());
        assert_eq!(builder.phase(), BuildPhase::Initialization);
    }

    #[test]
    fn test_update_notices_outdated_output_for_secondary_suffix() {
        let (_dir, mut config) = project(&[
            ("index.rst", b"# Home\n\n.. toctree::\n\n   notes\n"),
            ("notes.txt", b"# Notes\n"),
        ]);
        config.project.source_suffix = vec![".rst".into(), ".txt".into()];
        let html = |config: &ProjectConfig| {
            Builder::new(config.clone(), Box::new(HtmlWriter::new(config)))
        };
        html(&config).build_all().unwrap();

        let output = config.build.output.join("notes.html");
        let earlier = SystemTime::now() - Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&output)
            .unwrap()
            .set_modified(earlier)
            .unwrap();

        let report = html(&config).build_update().unwrap();
        assert!(report.read.is_empty());
        assert_eq!(report.written, set(&["index", "notes"]));
    }
}
