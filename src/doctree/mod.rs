//! Parsed document trees.
//!
//! A [`Doctree`] is what the reader produces for one docname and what the
//! writer consumes after resolution. Two fields are process-local and never
//! leave the process that created them:
//!
//! - `reporter`: the warning sink the tree was read with
//! - `settings`: the reader settings in effect
//!
//! Both are dropped by [`Doctree::strip_transient`] before a tree is cached,
//! and a tree loaded from the cache never has them.

mod cache;

pub use cache::{CacheError, CacheMode, DoctreeCache};

use crate::logger::WarningSink;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

/// Reader settings attached to a freshly parsed tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSettings {
    pub language: String,
    pub root_doc: String,
    /// Shared parser settings file; every document read depends on it
    /// when it exists.
    pub parser_config: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctree {
    pub docname: String,
    pub source: PathBuf,
    pub nodes: Vec<Node>,
    /// Field list from the top of the document (`:orphan:`, `:author: ...`).
    pub metadata: BTreeMap<String, String>,
    #[serde(skip)]
    pub reporter: Option<Arc<WarningSink>>,
    #[serde(skip)]
    pub settings: Option<Arc<ReadSettings>>,
}

/// Equality over addressable content only.
impl PartialEq for Doctree {
    fn eq(&self, other: &Self) -> bool {
        self.docname == other.docname
            && self.source == other.source
            && self.nodes == other.nodes
            && self.metadata == other.metadata
    }
}

impl Eq for Doctree {}

impl Doctree {
    pub fn new(docname: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            docname: docname.into(),
            source: source.into(),
            nodes: Vec::new(),
            metadata: BTreeMap::new(),
            reporter: None,
            settings: None,
        }
    }

    pub fn strip_transient(&mut self) {
        self.reporter = None;
        self.settings = None;
    }

    pub const fn is_detached(&self) -> bool {
        self.reporter.is_none() && self.settings.is_none()
    }

    /// Text of the first title node.
    pub fn title(&self) -> Option<&str> {
        self.nodes.iter().find_map(|node| match node {
            Node::Title { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn images_mut(&mut self) -> impl Iterator<Item = &mut Image> {
        self.nodes.iter_mut().filter_map(|node| match node {
            Node::Image(image) => Some(image),
            _ => None,
        })
    }

    pub fn toctrees_mut(&mut self) -> impl Iterator<Item = &mut Toctree> {
        self.nodes.iter_mut().filter_map(|node| match node {
            Node::Toctree(toctree) => Some(toctree),
            _ => None,
        })
    }

    pub fn xrefs_mut(&mut self) -> impl Iterator<Item = &mut Xref> {
        self.nodes
            .iter_mut()
            .filter_map(|node| match node {
                Node::Paragraph { inlines, .. } => Some(inlines),
                _ => None,
            })
            .flatten()
            .filter_map(|inline| match inline {
                Inline::Xref(xref) => Some(xref),
                Inline::Text(_) => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Title { text: String, line: usize },
    Paragraph { inlines: Vec<Inline>, line: usize },
    Literal { text: String, line: usize },
    Toctree(Toctree),
    Image(Image),
    /// Label target (`.. _label:`) pointing at the following node.
    Target { label: String, line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inline {
    Text(String),
    Xref(Xref),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XrefKind {
    /// `:doc:` reference to a docname.
    Doc,
    /// `:ref:` reference to a label.
    Ref,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xref {
    pub kind: XrefKind,
    pub target: String,
    pub line: usize,
    /// Filled in during resolution.
    pub resolved: Option<Link>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toctree {
    pub line: usize,
    pub glob: bool,
    pub entries: Vec<TocEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub docname: String,
    /// Filled in during resolution.
    pub resolved: Option<Link>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub line: usize,
    /// URI as written, relative to the source directory.
    pub uri: String,
    /// Mimetype → candidate path. A `*` key means the URI is used as is.
    pub candidates: BTreeMap<String, String>,
    /// Output URI chosen for the current writer.
    pub resolved: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Doctree {
        let mut tree = Doctree::new("guide/intro", "/docs/source/guide/intro.rst");
        tree.nodes = vec![
            Node::Title { text: "Intro".into(), line: 1 },
            Node::Paragraph {
                inlines: vec![
                    Inline::Text("see ".into()),
                    Inline::Xref(Xref {
                        kind: XrefKind::Doc,
                        target: "api".into(),
                        line: 3,
                        resolved: None,
                    }),
                ],
                line: 3,
            },
        ];
        tree
    }

    #[test]
    fn test_equality_ignores_transient_fields() {
        let plain = sample();
        let mut attached = sample();
        attached.reporter = Some(Arc::new(WarningSink::new(false)));
        attached.settings = Some(Arc::new(ReadSettings::default()));

        assert_eq!(plain, attached);
        assert!(!attached.is_detached());
        attached.strip_transient();
        assert!(attached.is_detached());
    }

    #[test]
    fn test_title_and_xrefs() {
        let mut tree = sample();
        assert_eq!(tree.title(), Some("Intro"));
        let targets: Vec<_> = tree.xrefs_mut().map(|x| x.target.clone()).collect();
        assert_eq!(targets, ["api"]);
    }
}
