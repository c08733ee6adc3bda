//! Translation catalogs.
//!
//! Catalogs live at `<source>/<locale_dir>/<language>/LC_MESSAGES/<domain>.po`
//! and compile to a `.mo` next to the `.po`. Compiling is left to a
//! [`CatalogCompiler`]; this module only finds catalogs and decides which
//! are out of date.

use crate::{error::BuildError, project::canon_path, utils::fs::mtime_micros};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One `.po`/`.mo` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CatalogInfo {
    /// `<locale_dir>/<language>/LC_MESSAGES`
    pub base_dir: PathBuf,
    /// Path below `base_dir` without extension, `/`-separated.
    pub domain: String,
    pub po_path: PathBuf,
    pub mo_path: PathBuf,
}

impl CatalogInfo {
    /// The `.mo` file is missing or older than its `.po`.
    pub fn is_outdated(&self) -> bool {
        match (mtime_micros(&self.mo_path), mtime_micros(&self.po_path)) {
            (Some(mo), Some(po)) => mo < po,
            _ => true,
        }
    }
}

/// Compiles `.po` catalogs into `.mo` files.
pub trait CatalogCompiler: Send + Sync {
    fn compile(&self, catalog: &CatalogInfo, language: &str) -> Result<(), BuildError>;
}

/// Catalogs for one language across the configured locale directories.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    basedir: PathBuf,
    locale_dirs: Vec<String>,
    language: String,
}

impl CatalogRepository {
    pub fn new(basedir: &Path, locale_dirs: &[String], language: &str) -> Self {
        Self {
            basedir: basedir.to_path_buf(),
            locale_dirs: locale_dirs.to_vec(),
            language: language.to_owned(),
        }
    }

    /// Existing `LC_MESSAGES` directories for the language.
    pub fn message_dirs(&self) -> Vec<PathBuf> {
        if self.language.is_empty() {
            return Vec::new();
        }
        self.locale_dirs
            .iter()
            .map(|dir| self.basedir.join(dir).join(&self.language).join("LC_MESSAGES"))
            .filter(|dir| dir.is_dir())
            .collect()
    }

    /// Every `.po` file, sorted by path.
    pub fn catalogs(&self) -> Vec<CatalogInfo> {
        let mut catalogs = Vec::new();
        for base_dir in self.message_dirs() {
            let found = WalkDir::new(&base_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "po"))
                .filter_map(|e| {
                    let rel = canon_path(e.path().strip_prefix(&base_dir).ok()?);
                    let domain = rel.strip_suffix(".po")?.to_owned();
                    let po_path = e.into_path();
                    Some(CatalogInfo {
                        base_dir: base_dir.clone(),
                        domain,
                        mo_path: po_path.with_extension("mo"),
                        po_path,
                    })
                });
            catalogs.extend(found);
        }
        catalogs
    }
}

/// Catalog domain a document's messages belong to.
///
/// With `compact`, all documents under one top-level directory share a
/// domain.
pub fn docname_to_domain(docname: &str, compact: bool) -> String {
    if compact {
        docname.split('/').next().unwrap_or(docname).to_owned()
    } else {
        docname.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, time::Duration};
    use tempfile::TempDir;

    #[test]
    fn test_docname_to_domain() {
        assert_eq!(docname_to_domain("guide/intro", true), "guide");
        assert_eq!(docname_to_domain("guide/intro", false), "guide/intro");
        assert_eq!(docname_to_domain("index", true), "index");
    }

    #[test]
    fn test_catalogs_and_outdated() {
        let dir = TempDir::new().unwrap();
        let messages = dir.path().join("locales/de/LC_MESSAGES");
        fs::create_dir_all(messages.join("guide")).unwrap();
        fs::write(messages.join("index.po"), "msgid \"\"").unwrap();
        fs::write(messages.join("guide/intro.po"), "msgid \"\"").unwrap();
        fs::write(messages.join("notes.txt"), "").unwrap();

        let repo = CatalogRepository::new(dir.path(), &["locales".into(), "missing".into()], "de");
        let catalogs = repo.catalogs();
        let domains: Vec<_> = catalogs.iter().map(|c| c.domain.as_str()).collect();
        assert_eq!(domains, ["guide/intro", "index"]);
        assert!(catalogs.iter().all(CatalogInfo::is_outdated));

        let index = &catalogs[1];
        fs::write(&index.mo_path, b"").unwrap();
        let later = std::time::SystemTime::now() + Duration::from_secs(10);
        fs::File::options()
            .write(true)
            .open(&index.mo_path)
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert!(!index.is_outdated());
    }

    #[test]
    fn test_no_language_no_catalogs() {
        let dir = TempDir::new().unwrap();
        let repo = CatalogRepository::new(dir.path(), &["locales".into()], "");
        assert!(repo.catalogs().is_empty());
    }
}
