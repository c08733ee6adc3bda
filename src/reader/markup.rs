//! The built-in line-oriented markup.
//!
//! ```text
//! :orphan:                       field list at the top → metadata
//! # Title                        title
//! .. _label:                     target for :ref:`label`
//! .. toctree::                   toctree; entries relative to this document
//!    :glob:
//!    guide/*
//! .. include:: shared/notice.txt inlined, tracked as a dependency
//! .. image:: img/logo.*          image; `*` picks candidates by extension
//! Text with :doc:`api` links::   paragraph, ending `::` starts a literal block
//!
//!     indented literal
//! ```

use super::{SourceParser, decode_included};
use crate::{
    doctree::{Doctree, Image, Inline, Node, TocEntry, Toctree, Xref, XrefKind},
    environment::{DocumentContext, docname_join},
    error::BuildError,
    project::glob,
};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::PathBuf,
    sync::LazyLock,
};

const MAX_INCLUDE_DEPTH: usize = 8;

static RE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:([A-Za-z][A-Za-z0-9_.-]*):(?:[ \t]+(.*))?$").unwrap());

static RE_TARGET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\.\. _([^:]+):[ \t]*$").unwrap());

static RE_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.\. ([A-Za-z][A-Za-z0-9_-]*)::(?:[ \t]+(.*))?$").unwrap());

static RE_ROLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":(doc|ref):`([^`]+)`").unwrap());

static RE_EXPLICIT_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*?[ \t]*<([^<>]+)>$").unwrap());

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupParser;

/// A source line with the line number warnings should point at.
#[derive(Debug, Clone)]
struct Line {
    number: usize,
    text: String,
}

impl Line {
    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn is_indented(&self) -> bool {
        self.text.starts_with([' ', '\t'])
    }
}

impl SourceParser for MarkupParser {
    fn parse(&self, source: &str, ctx: &mut DocumentContext<'_>) -> Result<Doctree, BuildError> {
        let mut tree = Doctree::new(ctx.docname.clone(), ctx.project.doc2path(&ctx.docname));
        let lines = expand_includes(source, ctx, 0)?;

        let mut pos = lines.iter().position(|l| !l.is_blank()).unwrap_or(lines.len());
        while let Some(caps) = lines.get(pos).and_then(|l| RE_FIELD.captures(l.text.trim_end())) {
            let value = caps.get(2).map_or("", |m| m.as_str().trim());
            tree.metadata.insert(caps[1].to_owned(), value.to_owned());
            pos += 1;
        }

        while pos < lines.len() {
            let line = &lines[pos];
            let text = line.text.trim_end();

            if line.is_blank() {
                pos += 1;
            } else if let Some(title) = text.strip_prefix("# ") {
                tree.nodes.push(Node::Title {
                    text: title.trim().to_owned(),
                    line: line.number,
                });
                pos += 1;
            } else if let Some(caps) = RE_TARGET.captures(text) {
                tree.nodes.push(Node::Target {
                    label: caps[1].trim().to_lowercase(),
                    line: line.number,
                });
                pos += 1;
            } else if let Some(caps) = RE_DIRECTIVE.captures(text) {
                let argument = caps.get(2).map_or("", |m| m.as_str().trim());
                let (block, next) = indented_block(&lines, pos + 1);
                match &caps[1] {
                    "toctree" => {
                        let toctree = toctree(ctx, line.number, &block)?;
                        tree.nodes.push(Node::Toctree(toctree));
                    }
                    "image" => {
                        let image = image(ctx, line.number, argument)?;
                        tree.nodes.push(Node::Image(image));
                    }
                    other => {
                        ctx.warn(Some(line.number), format!("unknown directive type \"{other}\""))?;
                    }
                }
                pos = next;
            } else if text.starts_with("..") {
                // comment
                pos = indented_block(&lines, pos + 1).1;
            } else {
                pos = paragraph(&lines, pos, &mut tree.nodes);
            }
        }

        Ok(tree)
    }
}

/// Split `source` into lines, inlining `.. include::` files.
///
/// Included lines report the line number of the include directive.
fn expand_includes(
    source: &str,
    ctx: &mut DocumentContext<'_>,
    depth: usize,
) -> Result<Vec<Line>, BuildError> {
    let mut lines = Vec::new();

    for (index, text) in source.lines().enumerate() {
        let number = index + 1;
        let Some(target) = text.strip_prefix(".. include::").map(str::trim) else {
            lines.push(Line {
                number,
                text: text.to_owned(),
            });
            continue;
        };

        if depth >= MAX_INCLUDE_DEPTH {
            ctx.warn(Some(number), format!("include of {target:?} nested too deeply"))?;
            continue;
        }

        let path = include_path(ctx, target);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(_) => {
                ctx.warn(Some(number), format!("include file not readable: {target}"))?;
                // retried on every build until the file shows up
                ctx.note_reread();
                continue;
            }
        };
        ctx.note_dependency(path);

        let docname = ctx.docname.clone();
        let included = decode_included(&raw, &docname, number, ctx.warnings)?;
        lines.extend(
            expand_includes(&included, ctx, depth + 1)?
                .into_iter()
                .map(|line| Line { number, ..line }),
        );
    }

    Ok(lines)
}

/// `/`-prefixed paths are relative to the source directory, others to the
/// including document's directory.
fn include_path(ctx: &DocumentContext<'_>, target: &str) -> PathBuf {
    ctx.srcdir().join(docname_join(&ctx.docname, target))
}

/// The indented lines after `start` (blank lines included, trailing blanks
/// dropped) and the index of the first line after them.
fn indented_block(lines: &[Line], start: usize) -> (Vec<&Line>, usize) {
    let mut end = start;
    while end < lines.len() && (lines[end].is_blank() || lines[end].is_indented()) {
        end += 1;
    }
    let mut block: Vec<&Line> = lines[start..end].iter().collect();
    while block.last().is_some_and(|l| l.is_blank()) {
        block.pop();
    }
    (block, end)
}

fn paragraph(lines: &[Line], start: usize, nodes: &mut Vec<Node>) -> usize {
    let mut end = start;
    while end < lines.len() && !lines[end].is_blank() {
        end += 1;
    }
    let number = lines[start].number;
    let joined = lines[start..end]
        .iter()
        .map(|l| l.text.trim())
        .collect::<Vec<_>>()
        .join(" ");

    let (text, literal) = match joined.strip_suffix("::") {
        Some(head) if head.trim().is_empty() => (String::new(), true),
        Some(head) if head.ends_with(char::is_whitespace) => (head.trim_end().to_owned(), true),
        Some(head) => (format!("{head}:"), true),
        None => (joined, false),
    };

    if !text.is_empty() {
        nodes.push(Node::Paragraph {
            inlines: inlines(&text, number),
            line: number,
        });
    }
    if !literal {
        return end;
    }

    let mut body = end;
    while body < lines.len() && lines[body].is_blank() {
        body += 1;
    }
    let (block, next) = indented_block(lines, body);
    if block.is_empty() {
        return end;
    }

    let indent = block
        .iter()
        .filter(|l| !l.is_blank())
        .map(|l| l.text.len() - l.text.trim_start().len())
        .min()
        .unwrap_or(0);
    let text = block
        .iter()
        .map(|l| l.text.get(indent..).unwrap_or("").trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    nodes.push(Node::Literal {
        text,
        line: block[0].number,
    });
    next
}

fn inlines(text: &str, line: usize) -> Vec<Inline> {
    let mut inlines = Vec::new();
    let mut last = 0;

    for caps in RE_ROLE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            inlines.push(Inline::Text(text[last..whole.start()].to_owned()));
        }
        let (kind, target) = match &caps[1] {
            "doc" => (XrefKind::Doc, explicit_target(&caps[2]).to_owned()),
            _ => (XrefKind::Ref, explicit_target(&caps[2]).to_lowercase()),
        };
        inlines.push(Inline::Xref(Xref {
            kind,
            target,
            line,
            resolved: None,
        }));
        last = whole.end();
    }

    if last < text.len() {
        inlines.push(Inline::Text(text[last..].to_owned()));
    }
    inlines
}

/// `Title <target>` → `target`.
fn explicit_target(content: &str) -> &str {
    RE_EXPLICIT_TARGET
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map_or(content, |m| m.as_str())
        .trim()
}

fn toctree(
    ctx: &DocumentContext<'_>,
    line: usize,
    block: &[&Line],
) -> Result<Toctree, BuildError> {
    let mut glob = false;
    let mut entries = Vec::new();
    let mut seen = BTreeSet::new();

    for text in block.iter().map(|l| l.text.trim()).filter(|t| !t.is_empty()) {
        if text.starts_with(':') {
            glob |= text == ":glob:";
            continue;
        }
        let entry = explicit_target(text);

        if glob && entry.contains(['*', '?', '[']) {
            let pattern = docname_join(&ctx.docname, entry);
            let matcher = crate::project::glob(&pattern)
                .map_err(|err| BuildError::Parse {
                    docname: ctx.docname.clone(),
                    message: format!("invalid toctree glob {entry:?}: {err}"),
                })?
                .compile_matcher();
            let matched: Vec<&String> = ctx
                .found_docs
                .iter()
                .filter(|docname| **docname != ctx.docname && matcher.is_match(docname))
                .collect();
            if matched.is_empty() {
                ctx.warn(
                    Some(line),
                    format!("toctree glob pattern {entry:?} didn't match any documents"),
                )?;
            }
            for docname in matched {
                if seen.insert(docname.clone()) {
                    entries.push(toc_entry(docname));
                }
            }
            continue;
        }

        let docname = docname_join(&ctx.docname, entry);
        if docname == ctx.docname {
            ctx.warn(Some(line), "self referenced toctree found. Ignored.")?;
        } else if !ctx.found_docs.contains(&docname) {
            ctx.warn(
                Some(line),
                format!("toctree contains reference to nonexisting document {entry:?}"),
            )?;
        } else if seen.insert(docname.clone()) {
            entries.push(toc_entry(&docname));
        }
    }

    Ok(Toctree {
        line,
        glob,
        entries,
    })
}

fn toc_entry(docname: &str) -> TocEntry {
    TocEntry {
        docname: docname.to_owned(),
        resolved: None,
    }
}

fn image(ctx: &mut DocumentContext<'_>, line: usize, uri: &str) -> Result<Image, BuildError> {
    let mut candidates = BTreeMap::new();

    if uri.contains("://") {
        candidates.insert("?".to_owned(), uri.to_owned());
    } else {
        let path = docname_join(&ctx.docname, uri);
        if path.contains('*') {
            candidates = collect_candidates(ctx, &path);
        } else {
            candidates.insert("*".to_owned(), path);
        }

        for path in candidates.values() {
            let full = ctx.srcdir().join(path);
            if !full.is_file() {
                ctx.warn(Some(line), format!("image file not readable: {path}"))?;
            }
            ctx.note_dependency(full);
        }
    }

    Ok(Image {
        line,
        uri: uri.to_owned(),
        candidates,
        resolved: None,
    })
}

/// Files matching a `*` image path, keyed by mimetype.
fn collect_candidates(ctx: &DocumentContext<'_>, pattern: &str) -> BTreeMap<String, String> {
    let (dir, name) = pattern.rsplit_once('/').unwrap_or(("", pattern));
    let Ok(matcher) = glob(name).map(|g| g.compile_matcher()) else {
        return BTreeMap::new();
    };
    let Ok(entries) = fs::read_dir(ctx.srcdir().join(dir)) else {
        return BTreeMap::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|file| matcher.is_match(file))
        .collect();
    names.sort();

    names
        .into_iter()
        .filter_map(|file| {
            let mimetype = guess_mimetype(&file)?;
            let path = if dir.is_empty() { file } else { format!("{dir}/{file}") };
            Some((mimetype.to_owned(), path))
        })
        .collect()
}

fn guess_mimetype(file: &str) -> Option<&'static str> {
    let (_, ext) = file.rsplit_once('.')?;
    let mimetype = match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mimetype)
}
