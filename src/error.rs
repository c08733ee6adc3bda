//! Build error types.
//!
//! Everything that aborts a build is a [`BuildError`]. Recoverable problems
//! are warnings (see [`crate::logger::WarningSink`]) and only become a
//! [`BuildError::Warning`] when warnings are configured to be fatal.

use crate::{config::ConfigError, doctree::CacheError, logger::Location};
use quire_core::TaskError;
use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Why the root document could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootDocCause {
    /// The root document path matches one of the built-in exclude patterns.
    BuiltinExclude(String),
    /// The root document path matches a user `exclude_patterns` entry.
    UserExclude(String),
    /// Custom `include_patterns` are set and none of them matches.
    NotIncluded(Vec<String>),
    /// The file is missing from the source tree.
    OutsideSource,
}

impl fmt::Display for RootDocCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltinExclude(pattern) => write!(
                f,
                "it matches the built-in exclude pattern `{pattern}`; \
                 move the root document to a different location"
            ),
            Self::UserExclude(pattern) => write!(
                f,
                "it matches the exclude pattern `{pattern}` from the project config; \
                 remove this pattern"
            ),
            Self::NotIncluded(patterns) => write!(
                f,
                "it is not matched by include_patterns = {patterns:?}; \
                 add a pattern that matches the root document"
            ),
            Self::OutsideSource => f.write_str(
                "the root document must exist within the source directory or a subdirectory of it",
            ),
        }
    }
}

/// Fatal build failures.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unable to load the root document ({}): {cause}", .path.display())]
    RootDocument { path: PathBuf, cause: RootDocCause },

    #[error("warning treated as error: {}", warning_text(.location, .message))]
    Warning {
        location: Option<Location>,
        message: String,
    },

    #[error("IO error at `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to parse `{docname}`: {message}")]
    Parse { docname: String, message: String },

    #[error("environment is inconsistent: {0}")]
    Inconsistent(String),

    #[error("parallel worker failed: {0}")]
    Worker(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Worker failures carry the worker's own error through unchanged.
impl From<TaskError<BuildError>> for BuildError {
    fn from(err: TaskError<BuildError>) -> Self {
        match err {
            TaskError::Failed { source, .. } => source,
            TaskError::Panicked { chunk, message } => {
                Self::Worker(format!("chunk {chunk} panicked: {message}"))
            }
            TaskError::Pool(message) => Self::Worker(message),
        }
    }
}

fn warning_text(location: &Option<Location>, message: &str) -> String {
    match location {
        Some(location) => format!("{location}: {message}"),
        None => message.to_owned(),
    }
}
