//! `[build]` section configuration.
//!
//! Directory layout and build behavior. None of these settings invalidate
//! the saved environment on their own.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[build]` section in quire.toml.
///
/// # Example
/// ```toml
/// [build]
/// source = "docs"
/// output = "_build/html"
/// doctrees = "_build/doctrees"
/// parallel = 4
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    /// Source directory, relative to the project root.
    #[serde(default = "defaults::build::source")]
    #[educe(Default = defaults::build::source())]
    pub source: PathBuf,

    /// Output directory for the writer.
    #[serde(default = "defaults::build::output")]
    #[educe(Default = defaults::build::output())]
    pub output: PathBuf,

    /// Directory holding the saved environment and document-tree artifacts.
    #[serde(default = "defaults::build::doctrees")]
    #[educe(Default = defaults::build::doctrees())]
    pub doctrees: PathBuf,

    /// Writer name.
    #[serde(default = "defaults::build::builder")]
    #[educe(Default = defaults::build::builder())]
    pub builder: String,

    /// Worker count; 1 reads and writes serially.
    #[serde(default = "defaults::build::parallel")]
    #[educe(Default = defaults::build::parallel())]
    pub parallel: usize,

    /// Abort on the first warning.
    #[serde(default = "defaults::r#false")]
    pub warnings_fatal: bool,

    /// Ignore the saved environment and read everything.
    #[serde(default = "defaults::r#false")]
    pub fresh_env: bool,
}
