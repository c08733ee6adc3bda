//! Extensions built against the public library API.
//!
//! A plain-text writer and a couple of hooks, registered the way a
//! downstream crate would.

use quire::{
    BuildError, BuildPhase, Builder, ProjectConfig, Writer,
    doctree::Doctree,
    environment::BuildEnvironment,
    project::Project,
    writer::WriteContext,
};
use std::{
    collections::BTreeSet,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tempfile::TempDir;

struct TextWriter {
    outdir: PathBuf,
    phases: Arc<Mutex<Vec<BuildPhase>>>,
}

impl Writer for TextWriter {
    fn name(&self) -> &'static str {
        "text"
    }

    fn format(&self) -> &'static str {
        "text"
    }

    fn get_outdated_docs(&self, env: &BuildEnvironment, _project: &Project) -> BTreeSet<String> {
        env.found_docs
            .iter()
            .filter(|docname| !self.outdir.join(self.get_target_uri(docname)).is_file())
            .cloned()
            .collect()
    }

    fn get_target_uri(&self, docname: &str) -> String {
        format!("{docname}.txt")
    }

    fn write_doc_serialized(
        &self,
        _docname: &str,
        _tree: &mut Doctree,
        ctx: &WriteContext<'_>,
    ) -> Result<(), BuildError> {
        self.phases.lock().unwrap().push(ctx.phase);
        Ok(())
    }

    fn write_doc(&self, docname: &str, tree: &Doctree) -> Result<(), BuildError> {
        let path = self.outdir.join(self.get_target_uri(docname));
        fs::create_dir_all(&self.outdir).map_err(|err| BuildError::io(&self.outdir, err))?;
        fs::write(&path, tree.title().unwrap_or_default()).map_err(|err| BuildError::io(&path, err))
    }
}

fn project() -> (TempDir, ProjectConfig) {
    let dir = TempDir::new().unwrap();
    let config = ProjectConfig::for_root(dir.path());
    fs::create_dir_all(&config.build.source).unwrap();
    fs::write(
        config.build.source.join("index.rst"),
        "# Home\n\n.. toctree::\n\n   a\n",
    )
    .unwrap();
    fs::write(config.build.source.join("a.rst"), "# Chapter A\n").unwrap();
    (dir, config)
}

fn text_builder(config: &ProjectConfig, phases: &Arc<Mutex<Vec<BuildPhase>>>) -> Builder {
    let writer = TextWriter {
        outdir: config.build.output.clone(),
        phases: Arc::clone(phases),
    };
    Builder::new(config.clone(), Box::new(writer))
}

#[test]
fn test_custom_writer_writes_every_document() {
    let (_dir, config) = project();
    let phases = Arc::new(Mutex::new(Vec::new()));

    let report = text_builder(&config, &phases).build_all().unwrap();

    assert_eq!(report.written.len(), 2);
    let chapter = fs::read_to_string(config.build.output.join("a.txt")).unwrap();
    assert_eq!(chapter, "Chapter A");
    assert!(phases.lock().unwrap().iter().all(|phase| *phase == BuildPhase::Writing));
}

#[test]
fn test_hooks_registered_from_outside_the_crate() {
    let (_dir, config) = project();
    let phases = Arc::new(Mutex::new(Vec::new()));
    text_builder(&config, &phases).build_all().unwrap();

    let purged = Arc::new(Mutex::new(Vec::new()));
    let mut builder = text_builder(&config, &phases);
    let seen = Arc::clone(&purged);
    builder
        .hooks_mut()
        .on_get_outdated(|_, _, outdated| {
            assert!(outdated.is_empty());
            vec!["a".to_owned()]
        })
        .on_purge_doc(move |phase, _, docname| {
            seen.lock().unwrap().push(format!("{phase}:{docname}"));
        });

    let report = builder.build_update().unwrap();

    assert_eq!(report.read, ["a"]);
    assert_eq!(*purged.lock().unwrap(), ["reading:a"]);
    assert!(report.written.contains("a"));
}
