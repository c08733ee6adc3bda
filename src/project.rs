//! Source tree discovery.
//!
//! Maps source files to docnames and back:
//!
//! ```text
//! source/
//! ├── index.rst          → "index"
//! ├── guide/intro.rst    → "guide/intro"
//! └── _sources/x.rst     → (excluded: built-in pattern)
//! ```
//!
//! Patterns are globs (see [`glob`]) matched against `/`-separated paths
//! relative to the source directory.

use crate::{config::ConfigError, error::BuildError, logger::WarningSink};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use rustc_hash::FxHashMap;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Component, Path, PathBuf},
};
use walkdir::WalkDir;

/// Paths that are never documents.
pub const EXCLUDE_PATHS: [&str; 4] = ["**/_sources", ".#*", "**/.#*", "*.lproj/**"];

// ============================================================================
// Pattern Matching
// ============================================================================

/// Compile a path pattern.
///
/// `*` and `?` stay within one path segment, `**` spans segments and
/// `[abc]` / `[!abc]` are character classes.
pub fn glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// A compiled list of patterns.
#[derive(Debug, Clone)]
pub struct Matcher {
    patterns: Vec<String>,
    set: GlobSet,
}

impl Matcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let invalid = |pattern: &str| {
            let pattern = pattern.to_owned();
            move |source| ConfigError::Pattern { pattern, source }
        };

        let mut builder = GlobSetBuilder::new();
        let mut names = Vec::with_capacity(patterns.len());
        for pattern in patterns.iter().map(AsRef::as_ref) {
            builder.add(glob(pattern).map_err(invalid(pattern))?);
            names.push(pattern.to_owned());
        }
        let set = builder.build().map_err(invalid(names.join(", ").as_str()))?;

        Ok(Self {
            patterns: names,
            set,
        })
    }

    /// The first pattern matching `path`, if any.
    pub fn first_match(&self, path: &str) -> Option<&str> {
        self.set
            .matches(path)
            .into_iter()
            .min()
            .map(|index| self.patterns[index].as_str())
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.set.is_match(path)
    }
}

/// `/`-separated rendering of a relative path.
pub fn canon_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Project
// ============================================================================

/// The set of documents in a source tree.
#[derive(Debug, Clone)]
pub struct Project {
    srcdir: PathBuf,
    source_suffix: Vec<String>,
    docnames: BTreeSet<String>,
    docname_to_path: BTreeMap<String, PathBuf>,
    path_to_docname: FxHashMap<PathBuf, String>,
}

impl Project {
    pub fn new(srcdir: impl Into<PathBuf>, source_suffix: Vec<String>) -> Self {
        Self {
            srcdir: srcdir.into(),
            source_suffix,
            docnames: BTreeSet::new(),
            docname_to_path: BTreeMap::new(),
            path_to_docname: FxHashMap::default(),
        }
    }

    pub fn srcdir(&self) -> &Path {
        &self.srcdir
    }

    pub fn docnames(&self) -> &BTreeSet<String> {
        &self.docnames
    }

    /// Walk the source directory and rebuild the docname mapping.
    ///
    /// `exclude` is combined with [`EXCLUDE_PATHS`]. Excluded directories are
    /// not descended into.
    pub fn discover(
        &mut self,
        exclude: &[String],
        include: &[String],
        warnings: &WarningSink,
    ) -> Result<&BTreeSet<String>, BuildError> {
        self.docnames.clear();
        self.docname_to_path.clear();
        self.path_to_docname.clear();

        let exclude: Vec<&str> = exclude
            .iter()
            .map(String::as_str)
            .chain(EXCLUDE_PATHS)
            .collect();
        let exclude = Matcher::new(&exclude)?;
        let include = Matcher::new(include)?;

        let srcdir = self.srcdir.clone();
        let walker = WalkDir::new(&srcdir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !exclude.is_match(&relative(&srcdir, e.path()))
            });

        for entry in walker.filter_map(Result::ok).filter(|e| e.file_type().is_file()) {
            let rel = relative(&srcdir, entry.path());
            if !include.is_match(&rel) || exclude.is_match(&rel) {
                continue;
            }
            let Some(docname) = self.path2doc(entry.path()) else {
                continue;
            };

            match self.docname_to_path.get(&docname).cloned() {
                Some(existing) => {
                    let keep_new = self.suffix_rank(entry.path()) < self.suffix_rank(&existing);
                    let (kept, other) = if keep_new {
                        (entry.path().to_path_buf(), existing.clone())
                    } else {
                        (existing.clone(), entry.path().to_path_buf())
                    };
                    warnings.warn(
                        None,
                        format!(
                            "multiple files found for the document \"{docname}\": {}, {}\nUse {:?} for the build.",
                            relative(&srcdir, &kept),
                            relative(&srcdir, &other),
                            kept,
                        ),
                    )?;
                    if keep_new {
                        self.path_to_docname.remove(&existing);
                        self.insert(docname, kept);
                    }
                }
                None => self.insert(docname, entry.into_path()),
            }
        }

        Ok(&self.docnames)
    }

    fn insert(&mut self, docname: String, path: PathBuf) {
        self.path_to_docname.insert(path.clone(), docname.clone());
        self.docname_to_path.insert(docname.clone(), path);
        self.docnames.insert(docname);
    }

    fn suffix_rank(&self, path: &Path) -> usize {
        let name = path.to_string_lossy();
        self.source_suffix
            .iter()
            .position(|suffix| name.ends_with(suffix.as_str()))
            .unwrap_or(usize::MAX)
    }

    /// Docname for a source path (absolute, or relative to the source
    /// directory). `None` if the path has no source suffix or lies outside.
    pub fn path2doc(&self, path: &Path) -> Option<String> {
        if let Some(docname) = self.path_to_docname.get(path) {
            return Some(docname.clone());
        }
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.srcdir).ok()?
        } else {
            path
        };
        let rel = canon_path(rel);
        self.source_suffix
            .iter()
            .find_map(|suffix| rel.strip_suffix(suffix.as_str()))
            .filter(|docname| !docname.is_empty())
            .map(str::to_owned)
    }

    /// Absolute source path of `docname`. Unknown docnames get the first
    /// configured suffix.
    pub fn doc2path(&self, docname: &str) -> PathBuf {
        if let Some(path) = self.docname_to_path.get(docname) {
            return path.clone();
        }
        let suffix = self.source_suffix.first().map_or("", String::as_str);
        self.srcdir.join(format!("{docname}{suffix}"))
    }

    /// Like [`doc2path`](Self::doc2path), relative to the source directory.
    pub fn doc2relpath(&self, docname: &str) -> String {
        let path = self.doc2path(docname);
        path.strip_prefix(&self.srcdir)
            .map(canon_path)
            .unwrap_or_else(|_| path.to_string_lossy().into_owned())
    }
}

fn relative(root: &Path, path: &Path) -> String {
    canon_path(path.strip_prefix(root).unwrap_or(path))
}

// ============================================================================
// Tests
// ============================================================================
