//! `[project]` section configuration.
//!
//! Everything in this section affects how sources are read, so a change to
//! any of it invalidates the saved environment.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};

/// `[project]` section in quire.toml.
///
/// # Example
/// ```toml
/// [project]
/// name = "Widgets"
/// root_doc = "contents"
/// exclude_patterns = ["drafts/**"]
/// language = "de"
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectSection {
    /// Project name, used as the HTML title suffix.
    #[serde(default = "defaults::project::name")]
    #[educe(Default = defaults::project::name())]
    pub name: String,

    /// Docname of the document at the top of the toctree hierarchy.
    #[serde(default = "defaults::project::root_doc")]
    #[educe(Default = defaults::project::root_doc())]
    pub root_doc: String,

    /// Recognized source file suffixes, in priority order.
    #[serde(default = "defaults::project::source_suffix")]
    #[educe(Default = defaults::project::source_suffix())]
    pub source_suffix: Vec<String>,

    /// Glob-style patterns of source paths to skip.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Glob-style patterns a source path must match to be considered.
    #[serde(default = "defaults::project::include_patterns")]
    #[educe(Default = defaults::project::include_patterns())]
    pub include_patterns: Vec<String>,

    /// Target language for translated output. Empty disables translation.
    #[serde(default)]
    pub language: String,

    /// Message catalog directories, relative to the source directory.
    #[serde(default = "defaults::project::locale_dirs")]
    #[educe(Default = defaults::project::locale_dirs())]
    pub locale_dirs: Vec<String>,

    /// Put every top-level directory's messages into one catalog.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub gettext_compact: bool,

    /// Compile outdated catalogs at the start of every build.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub gettext_auto_build: bool,
}

impl ProjectSection {
    /// Whether custom include patterns narrow the default "everything".
    pub fn has_custom_includes(&self) -> bool {
        self.include_patterns != defaults::project::include_patterns()
    }
}
