//! Reading sources into document trees.
//!
//! [`read_doc`] does the parts every format shares (loading the file,
//! decoding it, attaching the transient reporter and settings) and hands the
//! text to a [`SourceParser`].

mod decode;
mod markup;

pub use decode::{decode_included, decode_source};
pub use markup::MarkupParser;

use crate::{
    doctree::{Doctree, ReadSettings},
    environment::DocumentContext,
    error::BuildError,
    logger::WarningSink,
};
use std::{fs, sync::Arc};

/// Turns decoded source text into a [`Doctree`].
///
/// Parsers report file dependencies and warnings through the context. They
/// run on worker threads when reading in parallel.
pub trait SourceParser: Send + Sync {
    fn parse(&self, source: &str, ctx: &mut DocumentContext<'_>) -> Result<Doctree, BuildError>;
}

/// Read `ctx.docname` from disk and parse it.
pub fn read_doc(
    parser: &dyn SourceParser,
    ctx: &mut DocumentContext<'_>,
    reporter: &Arc<WarningSink>,
    settings: &Arc<ReadSettings>,
) -> Result<Doctree, BuildError> {
    let path = ctx.project.doc2path(&ctx.docname);
    let raw = fs::read(&path).map_err(|err| BuildError::io(&path, err))?;
    let source = decode_source(&raw, &ctx.docname, ctx.warnings)?;
    if settings.parser_config.is_file() {
        ctx.note_dependency(settings.parser_config.clone());
    }

    let mut tree = parser.parse(&source, ctx)?;
    tree.reporter = Some(Arc::clone(reporter));
    tree.settings = Some(Arc::clone(settings));
    Ok(tree)
}
