//! Project configuration management for `quire.toml`.
//!
//! # Sections
//!
//! | Section     | Purpose                                           |
//! |-------------|---------------------------------------------------|
//! | `[project]` | How sources are found and read (invalidates env)  |
//! | `[build]`   | Directories, writer, workers, warning policy      |
//!
//! # Example
//!
//! ```toml
//! [project]
//! name = "Widgets"
//! root_doc = "index"
//! exclude_patterns = ["drafts/**"]
//!
//! [build]
//! source = "docs"
//! parallel = 4
//! ```

mod build;
pub mod defaults;
mod error;
mod project;

pub use build::BuildSection;
pub use error::ConfigError;
pub use project::ProjectSection;

/// Parser settings shared by every document, next to quire.toml.
pub const PARSER_CONFIG: &str = "quire-parser.toml";

use crate::cli::{Cli, Commands};
use educe::Educe;
use quire_core::Fingerprint;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing quire.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Absolute project root (set after loading)
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub project: ProjectSection,

    #[serde(default)]
    pub build: BuildSection,
}

impl ProjectConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content)
    }

    /// Load `cli.config` under the chosen root, falling back to defaults when
    /// the file does not exist, then apply CLI overrides.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let root = cli.root.clone().unwrap_or_else(|| PathBuf::from("./"));
        let config_path = root.join(&cli.config);

        let mut config = if config_path.exists() {
            Self::from_path(&config_path)?
        } else {
            Self::default()
        };
        config.config_path = Self::normalize_path(&config_path);
        config.resolve_paths(&root);
        config.update_with_cli(cli);
        Ok(config)
    }

    /// Make every directory absolute, relative to `root`.
    pub fn resolve_paths(&mut self, root: &Path) {
        let root = Self::normalize_path(root);
        self.build.source = Self::normalize_path(&root.join(&self.build.source));
        self.build.output = Self::normalize_path(&root.join(&self.build.output));
        self.build.doctrees = Self::normalize_path(&root.join(&self.build.doctrees));
        self.root = root;
    }

    /// Update configuration with CLI arguments
    pub fn update_with_cli(&mut self, cli: &Cli) {
        if let Commands::Build { build_args } = &cli.command {
            Self::update_option(&mut self.build.parallel, build_args.jobs.as_ref());
            self.build.warnings_fatal |= build_args.warnings_fatal;
            self.build.fresh_env |= build_args.fresh_env;
        }
    }

    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Normalize a path to absolute, using canonicalize if the path exists
    fn normalize_path(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let project = &self.project;

        if project.root_doc.trim().is_empty() {
            return Err(ConfigError::Validation("[project.root_doc] must not be empty".into()));
        }
        if project.source_suffix.is_empty() {
            return Err(ConfigError::Validation(
                "[project.source_suffix] must have at least one element".into(),
            ));
        }
        if let Some(suffix) = project.source_suffix.iter().find(|s| !s.starts_with('.')) {
            return Err(ConfigError::Validation(format!(
                "[project.source_suffix] entry `{suffix}` must start with a dot"
            )));
        }
        if self.build.parallel == 0 {
            return Err(ConfigError::Validation("[build.parallel] must be at least 1".into()));
        }
        if !self.build.source.is_dir() {
            return Err(ConfigError::Validation(format!(
                "[build.source] `{}` is not a directory",
                self.build.source.display()
            )));
        }
        Ok(())
    }

    /// The settings that affect how sources are read, rendered as strings.
    ///
    /// The saved environment stores this map; comparing it with the current
    /// one tells which options changed between builds.
    pub fn env_values(&self) -> BTreeMap<String, String> {
        let p = &self.project;
        [
            ("root_doc", format!("{:?}", p.root_doc)),
            ("source_suffix", format!("{:?}", p.source_suffix)),
            ("exclude_patterns", format!("{:?}", p.exclude_patterns)),
            ("include_patterns", format!("{:?}", p.include_patterns)),
            ("language", format!("{:?}", p.language)),
            ("locale_dirs", format!("{:?}", p.locale_dirs)),
            ("gettext_compact", p.gettext_compact.to_string()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_parts(
            self.env_values()
                .iter()
                .flat_map(|(key, value)| [key.as_bytes(), value.as_bytes()]),
        )
    }

    /// Config for a project rooted at `root` with default settings.
    pub fn for_root(root: &Path) -> Self {
        let mut config = Self::default();
        config.resolve_paths(root);
        config
    }
}

// ============================================================================
// Tests
// ============================================================================
