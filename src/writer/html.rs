//! One HTML page per document.

use super::{WriteContext, Writer, post_process_images};
use crate::{
    config::ProjectConfig,
    doctree::{Doctree, Inline, Node},
    environment::BuildEnvironment,
    error::BuildError,
    log,
    project::Project,
    utils::{
        fs::{ensure_parent, mtime_micros},
        uri::relative_uri,
    },
};
use parking_lot::Mutex;
use quire_core::SerialTasks;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::PathBuf,
};

/// Image directory below the output directory.
const IMAGE_DIR: &str = "_images";

pub struct HtmlWriter {
    project_name: String,
    srcdir: PathBuf,
    outdir: PathBuf,
    /// Source path → file name under `_images`, collected while writing.
    images: Mutex<BTreeMap<String, String>>,
}

impl HtmlWriter {
    pub fn new(config: &ProjectConfig) -> Self {
        Self {
            project_name: config.project.name.clone(),
            srcdir: config.build.source.clone(),
            outdir: config.build.output.clone(),
            images: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn outfile(&self, docname: &str) -> PathBuf {
        self.outdir.join(self.get_target_uri(docname))
    }

    fn render(&self, tree: &Doctree) -> String {
        let mut body = String::new();
        for node in &tree.nodes {
            render_node(&mut body, node);
        }
        let title = tree.title().unwrap_or(&tree.docname);
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <title>{} - {}</title>\n</head>\n<body>\n{body}</body>\n</html>\n",
            escape(title),
            escape(&self.project_name),
        )
    }
}

impl Writer for HtmlWriter {
    fn name(&self) -> &'static str {
        "html"
    }

    fn format(&self) -> &'static str {
        "html"
    }

    fn allow_parallel(&self) -> bool {
        true
    }

    fn supported_image_types(&self) -> &[&'static str] {
        &["image/svg+xml", "image/png", "image/gif", "image/jpeg"]
    }

    fn get_outdated_docs(&self, env: &BuildEnvironment, project: &Project) -> BTreeSet<String> {
        env.found_docs
            .iter()
            .filter(|docname| {
                if !env.all_docs.contains_key(*docname) {
                    return true;
                }
                let written = mtime_micros(&self.outfile(docname)).unwrap_or(0);
                mtime_micros(&project.doc2path(docname)).is_some_and(|source| source > written)
            })
            .cloned()
            .collect()
    }

    fn get_target_uri(&self, docname: &str) -> String {
        format!("{docname}.html")
    }

    fn prepare_writing(
        &mut self,
        _docnames: &BTreeSet<String>,
        _env: &BuildEnvironment,
    ) -> Result<(), BuildError> {
        self.images.get_mut().clear();
        Ok(())
    }

    fn copy_assets(&mut self) -> Result<(), BuildError> {
        fs::create_dir_all(&self.outdir).map_err(|err| BuildError::io(&self.outdir, err))
    }

    fn write_doc_serialized(
        &self,
        docname: &str,
        tree: &mut Doctree,
        ctx: &WriteContext<'_>,
    ) -> Result<(), BuildError> {
        let imgpath = relative_uri(&self.get_target_uri(docname), IMAGE_DIR);
        let selected = post_process_images(
            tree,
            self.name(),
            self.supported_image_types(),
            &imgpath,
            ctx.env,
            ctx.warnings,
        )?;
        self.images.lock().extend(selected);
        Ok(())
    }

    fn write_doc(&self, docname: &str, tree: &Doctree) -> Result<(), BuildError> {
        let path = self.outfile(docname);
        ensure_parent(&path).map_err(|err| BuildError::io(&path, err))?;
        fs::write(&path, self.render(tree)).map_err(|err| BuildError::io(&path, err))
    }

    fn finish(
        &mut self,
        _env: &BuildEnvironment,
        tasks: &mut SerialTasks<BuildError>,
    ) -> Result<(), BuildError> {
        let images = std::mem::take(self.images.get_mut());
        if images.is_empty() {
            return Ok(());
        }

        let srcdir = self.srcdir.clone();
        let imagedir = self.outdir.join(IMAGE_DIR);
        tasks.add_task("copying images", move || {
            fs::create_dir_all(&imagedir).map_err(|err| BuildError::io(&imagedir, err))?;
            for (source, filename) in &images {
                let from = srcdir.join(source);
                let to = imagedir.join(filename);
                fs::copy(&from, &to).map_err(|err| BuildError::io(&from, err))?;
            }
            log!("write"; "copied {} images", images.len());
            Ok(())
        });
        Ok(())
    }
}

fn render_node(out: &mut String, node: &Node) {
    match node {
        Node::Title { text, .. } => {
            out.push_str(&format!("<h1>{}</h1>\n", escape(text)));
        }
        Node::Paragraph { inlines, .. } => {
            out.push_str("<p>");
            for inline in inlines {
                match inline {
                    Inline::Text(text) => out.push_str(&escape(text)),
                    Inline::Xref(xref) => match &xref.resolved {
                        Some(link) => out.push_str(&format!(
                            "<a class=\"reference internal\" href=\"{}\">{}</a>",
                            escape(&link.uri),
                            escape(&link.text)
                        )),
                        None => out.push_str(&format!(
                            "<span class=\"xref\">{}</span>",
                            escape(&xref.target)
                        )),
                    },
                }
            }
            out.push_str("</p>\n");
        }
        Node::Literal { text, .. } => {
            out.push_str(&format!("<pre>{}</pre>\n", escape(text)));
        }
        Node::Toctree(toctree) => {
            out.push_str("<ul class=\"toctree\">\n");
            for link in toctree.entries.iter().filter_map(|e| e.resolved.as_ref()) {
                out.push_str(&format!(
                    "<li><a href=\"{}\">{}</a></li>\n",
                    escape(&link.uri),
                    escape(&link.text)
                ));
            }
            out.push_str("</ul>\n");
        }
        Node::Image(image) => {
            if let Some(src) = &image.resolved {
                out.push_str(&format!(
                    "<img src=\"{}\" alt=\"{}\" />\n",
                    escape(src),
                    escape(&image.uri)
                ));
            }
        }
        Node::Target { label, .. } => {
            out.push_str(&format!("<span id=\"{}\"></span>\n", escape(label)));
        }
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            ch => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        doctree::{Link, TocEntry, Toctree, Xref, XrefKind},
        logger::WarningSink,
    };
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> HtmlWriter {
        HtmlWriter::new(&ProjectConfig::for_root(dir.path()))
    }

    #[test]
    fn test_write_doc_renders_resolved_links() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);

        let mut tree = Doctree::new("guide/intro", "guide/intro.rst");
        tree.nodes = vec![
            Node::Title { text: "Intro & Setup".into(), line: 1 },
            Node::Paragraph {
                inlines: vec![
                    Inline::Text("see ".into()),
                    Inline::Xref(Xref {
                        kind: XrefKind::Doc,
                        target: "api".into(),
                        line: 3,
                        resolved: Some(Link { text: "API".into(), uri: "../api.html".into() }),
                    }),
                ],
                line: 3,
            },
            Node::Toctree(Toctree {
                line: 5,
                glob: false,
                entries: vec![TocEntry {
                    docname: "guide/setup".into(),
                    resolved: Some(Link { text: "Setup".into(), uri: "setup.html".into() }),
                }],
            }),
        ];

        writer.write_doc("guide/intro", &tree).unwrap();
        let html = fs::read_to_string(writer.outfile("guide/intro")).unwrap();
        assert!(html.contains("<title>Intro &amp; Setup - Documentation</title>"));
        assert!(html.contains("<a class=\"reference internal\" href=\"../api.html\">API</a>"));
        assert!(html.contains("<li><a href=\"setup.html\">Setup</a></li>"));
    }

    #[test]
    fn test_relative_uri_between_documents() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        assert_eq!(writer.get_relative_uri("guide/intro", "api"), "../api.html");
        assert_eq!(writer.get_relative_uri("index", "guide/intro"), "guide/intro.html");
    }

    #[test]
    fn test_outdated_docs() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::for_root(dir.path());
        fs::create_dir_all(&config.build.source).unwrap();
        fs::write(config.build.source.join("index.rst"), "# Home\n").unwrap();
        fs::write(config.build.source.join("new.rst"), "# New\n").unwrap();

        let warnings = WarningSink::default();
        let mut project = Project::new(&config.build.source, vec![".rst".into()]);
        project.discover(&[], &["**".into()], &warnings).unwrap();

        let mut env = BuildEnvironment::new();
        env.found_docs = project.docnames().clone();
        env.all_docs.insert("index".into(), 0);

        let writer = HtmlWriter::new(&config);
        let outdated = writer.get_outdated_docs(&env, &project);
        assert_eq!(outdated, BTreeSet::from(["index".to_owned(), "new".to_owned()]));

        writer.write_doc("index", &Doctree::new("index", "index.rst")).unwrap();
        let outdated = writer.get_outdated_docs(&env, &project);
        assert_eq!(outdated, BTreeSet::from(["new".to_owned()]));
    }

    #[test]
    fn test_finish_copies_images() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::for_root(dir.path());
        fs::create_dir_all(config.build.source.join("img")).unwrap();
        fs::write(config.build.source.join("img/logo.png"), b"png").unwrap();

        let mut writer = HtmlWriter::new(&config);
        writer
            .images
            .lock()
            .insert("img/logo.png".into(), "img-logo.png".into());

        let mut tasks = SerialTasks::new();
        writer.finish(&BuildEnvironment::new(), &mut tasks).unwrap();
        assert_eq!(tasks.len(), 1);
        tasks.join().unwrap();

        let copied = config.build.output.join("_images/img-logo.png");
        assert_eq!(fs::read(copied).unwrap(), b"png");
    }
}
