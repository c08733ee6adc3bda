//! The build environment: cross-document state that survives between builds.
//!
//! # Lifecycle
//!
//! ```text
//! load / new ──► setup_config ──► find_files ──► (read: clear_doc + process_doc)*
//!                                                        │
//!      next build ◄── persist ◄── check_consistency ◄────┘
//! ```
//!
//! The environment is owned by the build orchestrator and only ever mutated
//! on its thread. Parallel readers work on clones and hand back their clone;
//! [`BuildEnvironment::merge_info_from`] copies over exactly the entries owned
//! by the documents a worker read.
//!
//! Every map is a `BTreeMap`/`BTreeSet`, so two environments holding the same
//! facts serialize identically regardless of insertion order.

mod collect;
mod consistency;
mod outdated;
mod resolve;

pub use collect::{DocumentContext, image_filename};
pub use outdated::Outdated;

use crate::{
    config::ProjectConfig,
    error::BuildError,
    i18n::{CatalogRepository, docname_to_domain},
    logger::WarningSink,
    project::{Project, canon_path},
    utils::fs::atomic_write,
};
use quire_core::Fingerprint;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

/// Bump when the persisted layout changes; older files are discarded.
pub const ENV_VERSION: u32 = 1;

pub const ENV_FILENAME: &str = "environment.json";

/// How the current configuration relates to the one the environment was
/// built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigStatus {
    #[default]
    New,
    Changed,
    Ok,
}

impl ConfigStatus {
    pub const fn reason(self) -> &'static str {
        match self {
            Self::New => "new config",
            Self::Changed => "config changed",
            Self::Ok => "",
        }
    }
}

/// A copied image: the documents referring to it and its output file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub docnames: BTreeSet<String>,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEnvironment {
    pub version: u32,
    pub config_fingerprint: Option<Fingerprint>,
    pub config_values: BTreeMap<String, String>,
    pub config_status: ConfigStatus,
    /// Detail appended to the status reason, e.g. `" ('root_doc')"`.
    pub config_status_extra: String,

    /// docname → time it was last read (µs since epoch).
    pub all_docs: BTreeMap<String, u64>,
    /// Documents currently present in the source tree.
    pub found_docs: BTreeSet<String>,
    /// docname → documents that must be rewritten when it changes
    /// (the documents whose toctrees include it).
    pub files_to_rebuild: BTreeMap<String, BTreeSet<String>>,
    /// Documents with a `:glob:` toctree.
    pub glob_toctrees: BTreeSet<String>,
    /// docname → files whose modification invalidates it.
    pub dependencies: BTreeMap<String, BTreeSet<PathBuf>>,
    pub reread_always: BTreeSet<String>,

    /// docname → toctree children, in document order.
    pub toctree_includes: BTreeMap<String, Vec<String>>,
    pub titles: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, BTreeMap<String, String>>,
    /// label → docname → line of the target.
    pub labels: BTreeMap<String, BTreeMap<String, usize>>,
    /// image path (relative to the source directory) → entry.
    pub images: BTreeMap<String, ImageEntry>,
}

impl Default for BuildEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// Timestamp-free view of an environment for comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEnv {
    pub all_docs: BTreeSet<String>,
    pub found_docs: BTreeSet<String>,
    pub files_to_rebuild: BTreeMap<String, BTreeSet<String>>,
    pub glob_toctrees: BTreeSet<String>,
    pub dependencies: BTreeMap<String, BTreeSet<PathBuf>>,
    pub reread_always: BTreeSet<String>,
    pub toctree_includes: BTreeMap<String, Vec<String>>,
    pub titles: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, BTreeMap<String, String>>,
    pub labels: BTreeMap<String, BTreeMap<String, usize>>,
    pub images: BTreeMap<String, ImageEntry>,
}

impl BuildEnvironment {
    pub fn new() -> Self {
        Self {
            version: ENV_VERSION,
            config_fingerprint: None,
            config_values: BTreeMap::new(),
            config_status: ConfigStatus::New,
            config_status_extra: String::new(),
            all_docs: BTreeMap::new(),
            found_docs: BTreeSet::new(),
            files_to_rebuild: BTreeMap::new(),
            glob_toctrees: BTreeSet::new(),
            dependencies: BTreeMap::new(),
            reread_always: BTreeSet::new(),
            toctree_includes: BTreeMap::new(),
            titles: BTreeMap::new(),
            metadata: BTreeMap::new(),
            labels: BTreeMap::new(),
            images: BTreeMap::new(),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Load the environment saved in `doctreedir`.
    ///
    /// Any failure (missing file, unreadable JSON, other version) is reported
    /// as an error; callers start from a fresh environment in that case.
    pub fn load(doctreedir: &Path) -> Result<Self, BuildError> {
        let path = doctreedir.join(ENV_FILENAME);
        let raw = fs::read(&path).map_err(|err| BuildError::io(&path, err))?;
        let env: Self = serde_json::from_slice(&raw)
            .map_err(|err| BuildError::Serialization(format!("{}: {err}", path.display())))?;
        if env.version != ENV_VERSION {
            return Err(BuildError::Serialization(format!(
                "environment version {} (expected {ENV_VERSION})",
                env.version
            )));
        }
        Ok(env)
    }

    /// Atomically write the environment to `doctreedir`.
    pub fn persist(&self, doctreedir: &Path) -> Result<(), BuildError> {
        let path = doctreedir.join(ENV_FILENAME);
        let data =
            serde_json::to_vec(self).map_err(|err| BuildError::Serialization(err.to_string()))?;
        atomic_write(&path, &data).map_err(|err| BuildError::io(&path, err))
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Compare `config` with the one this environment was built with and
    /// record the result in `config_status`.
    pub fn setup_config(&mut self, config: &ProjectConfig) {
        let fingerprint = config.fingerprint();
        let values = config.env_values();

        match self.config_fingerprint {
            None => {
                self.config_status = ConfigStatus::New;
                self.config_status_extra.clear();
            }
            Some(old) if old != fingerprint => {
                let mut changed: Vec<String> = values
                    .iter()
                    .filter(|(key, value)| self.config_values.get(*key) != Some(*value))
                    .map(|(key, _)| key.clone())
                    .collect();
                changed.extend(
                    self.config_values
                        .keys()
                        .filter(|key| !values.contains_key(*key))
                        .cloned(),
                );

                self.config_status = ConfigStatus::Changed;
                self.config_status_extra = match changed.as_slice() {
                    [one] => format!(" ({one:?})"),
                    many => format!(" ({} options changed: {})", many.len(), many.join(", ")),
                };
            }
            Some(_) => {
                self.config_status = ConfigStatus::Ok;
                self.config_status_extra.clear();
            }
        }

        self.config_fingerprint = Some(fingerprint);
        self.config_values = values;
    }

    // ========================================================================
    // Source Tree
    // ========================================================================

    /// Refresh `found_docs` from the source tree.
    ///
    /// The output and doctree directories are skipped when they live inside
    /// the source directory. With a language configured, every document also
    /// depends on its compiled message catalog.
    pub fn find_files(
        &mut self,
        config: &ProjectConfig,
        project: &mut Project,
        warnings: &WarningSink,
    ) -> Result<(), BuildError> {
        let mut exclude = config.project.exclude_patterns.clone();
        for dir in [&config.build.output, &config.build.doctrees] {
            if let Ok(rel) = dir.strip_prefix(project.srcdir()) {
                let rel = canon_path(rel);
                if !rel.is_empty() {
                    exclude.push(rel);
                }
            }
        }

        self.found_docs = project
            .discover(&exclude, &config.project.include_patterns, warnings)?
            .clone();

        if !config.project.language.is_empty() {
            let repo = CatalogRepository::new(
                project.srcdir(),
                &config.project.locale_dirs,
                &config.project.language,
            );
            let mo_paths: BTreeMap<String, PathBuf> = repo
                .catalogs()
                .into_iter()
                .map(|catalog| (catalog.domain, catalog.mo_path))
                .collect();
            for docname in &self.found_docs {
                let domain = docname_to_domain(docname, config.project.gettext_compact);
                if let Some(mo_path) = mo_paths.get(&domain) {
                    self.dependencies
                        .entry(docname.clone())
                        .or_default()
                        .insert(mo_path.clone());
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Per-Document State
    // ========================================================================

    /// Remove everything `docname` registered.
    pub fn clear_doc(&mut self, docname: &str) {
        self.all_docs.remove(docname);
        self.dependencies.remove(docname);
        self.reread_always.remove(docname);
        self.toctree_includes.remove(docname);
        self.titles.remove(docname);
        self.metadata.remove(docname);
        self.glob_toctrees.remove(docname);

        self.files_to_rebuild.retain(|_, parents| {
            parents.remove(docname);
            !parents.is_empty()
        });
        if !self.found_docs.contains(docname) {
            self.files_to_rebuild.remove(docname);
        }

        self.labels.retain(|_, owners| {
            owners.remove(docname);
            !owners.is_empty()
        });
        self.images.retain(|_, entry| {
            entry.docnames.remove(docname);
            !entry.docnames.is_empty()
        });
    }

    /// Copy the entries owned by `docnames` from `other` (a worker's clone).
    ///
    /// Only entries keyed by, or registered by, one of `docnames` are
    /// touched, so merging several workers' results gives the same
    /// environment in any order, and merging one twice changes nothing.
    pub fn merge_info_from(&mut self, docnames: &[String], other: &Self) {
        let owned: BTreeSet<&str> = docnames.iter().map(String::as_str).collect();

        for &docname in &owned {
            copy_entry(&mut self.all_docs, &other.all_docs, docname);
            copy_entry(&mut self.dependencies, &other.dependencies, docname);
            copy_entry(&mut self.toctree_includes, &other.toctree_includes, docname);
            copy_entry(&mut self.titles, &other.titles, docname);
            copy_entry(&mut self.metadata, &other.metadata, docname);
            copy_member(&mut self.reread_always, &other.reread_always, docname);
            copy_member(&mut self.glob_toctrees, &other.glob_toctrees, docname);
        }

        for (child, parents) in &other.files_to_rebuild {
            for parent in parents.iter().filter(|p| owned.contains(p.as_str())) {
                self.files_to_rebuild
                    .entry(child.clone())
                    .or_default()
                    .insert(parent.clone());
            }
        }

        for (label, owners) in &other.labels {
            for (docname, line) in owners.iter().filter(|(d, _)| owned.contains(d.as_str())) {
                self.labels
                    .entry(label.clone())
                    .or_default()
                    .insert(docname.clone(), *line);
            }
        }

        for (uri, entry) in &other.images {
            for docname in entry.docnames.iter().filter(|d| owned.contains(d.as_str())) {
                let target = self.images.entry(uri.clone()).or_insert_with(|| ImageEntry {
                    docnames: BTreeSet::new(),
                    filename: entry.filename.clone(),
                });
                target.docnames.insert(docname.clone());
            }
        }
    }

    /// Documents that must be rewritten because one of `docnames` changed,
    /// following `files_to_rebuild` transitively. The result excludes
    /// `docnames` themselves and anything no longer in the source tree.
    pub fn transitive_dependents<'a, I>(&self, docnames: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let start: BTreeSet<&str> = docnames.into_iter().map(String::as_str).collect();
        let mut seen: BTreeSet<&str> = start.clone();
        let mut queue: Vec<&str> = start.iter().copied().collect();
        let mut result = BTreeSet::new();

        while let Some(docname) = queue.pop() {
            let Some(parents) = self.files_to_rebuild.get(docname) else {
                continue;
            };
            for parent in parents {
                if self.found_docs.contains(parent) && seen.insert(parent.as_str()) {
                    result.insert(parent.clone());
                    queue.push(parent.as_str());
                }
            }
        }
        result
    }

    /// Order-independent, timestamp-free copy for comparing environments.
    pub fn canonical(&self) -> CanonicalEnv {
        CanonicalEnv {
            all_docs: self.all_docs.keys().cloned().collect(),
            found_docs: self.found_docs.clone(),
            files_to_rebuild: self.files_to_rebuild.clone(),
            glob_toctrees: self.glob_toctrees.clone(),
            dependencies: self.dependencies.clone(),
            reread_always: self.reread_always.clone(),
            toctree_includes: self.toctree_includes.clone(),
            titles: self.titles.clone(),
            metadata: self.metadata.clone(),
            labels: self.labels.clone(),
            images: self.images.clone(),
        }
    }
}

fn copy_entry<V: Clone>(dst: &mut BTreeMap<String, V>, src: &BTreeMap<String, V>, key: &str) {
    match src.get(key) {
        Some(value) => {
            dst.insert(key.to_owned(), value.clone());
        }
        None => {
            dst.remove(key);
        }
    }
}

fn copy_member(dst: &mut BTreeSet<String>, src: &BTreeSet<String>, key: &str) {
    if src.contains(key) {
        dst.insert(key.to_owned());
    } else {
        dst.remove(key);
    }
}

/// Join a docname written in `base` with `base`'s directory.
///
/// A leading `/` makes `target` relative to the source root instead.
///
/// ```ignore
/// docname_join("guide/intro", "setup")   // "guide/setup"
/// docname_join("guide/intro", "../api")  // "api"
/// docname_join("guide/intro", "/index")  // "index"
/// ```
pub fn docname_join(base: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return normalize_docname(absolute);
    }
    match base.rsplit_once('/') {
        Some((dir, _)) => normalize_docname(&format!("{dir}/{target}")),
        None => normalize_docname(target),
    }
}

fn normalize_docname(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    parts.join("/")
}
