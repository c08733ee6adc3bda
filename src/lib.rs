//! quire library - incremental documentation builds
//!
//! Exposes the [`Builder`] and the seams extensions plug into:
//! [`SourceParser`] for new source formats, [`Writer`] for new output
//! formats and [`Hooks`] for callbacks at each build phase.

pub mod build;
pub mod cli;
pub mod config;
pub mod doctree;
pub mod environment;
pub mod error;
pub mod events;
pub mod i18n;
pub mod logger;
pub mod project;
pub mod reader;
pub mod utils;
pub mod writer;

pub use build::{BuildPhase, BuildReport, Builder};
pub use config::ProjectConfig;
pub use error::BuildError;
pub use events::Hooks;
pub use reader::{MarkupParser, SourceParser};
pub use writer::{HtmlWriter, Writer};
