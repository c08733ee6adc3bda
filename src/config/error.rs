//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read `{}`", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("invalid quire.toml: {0}")]
    Toml(#[from] toml::de::Error),

    /// An `exclude_patterns` / `include_patterns` entry that doesn't compile.
    #[error("invalid pattern `{pattern}`")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("{0}")]
    Validation(String),
}
