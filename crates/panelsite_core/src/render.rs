//! Turns a chapter manifest into panels.

use pulldown_cmark::{Options, Parser, html};
use tracing::{debug, warn};

use crate::model::{ChapterId, Manifest, ManifestEntry, PageDescriptor};
use crate::url::encode_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed(String),
}

pub trait ImageLoader {
    fn load(&self, page: &PageDescriptor) -> LoadOutcome;
}

/// Accepts every page; the browser does the loading and the theme script
/// swaps in the error text of pages that fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredLoader;

impl ImageLoader for DeferredLoader {
    fn load(&self, _page: &PageDescriptor) -> LoadOutcome {
        LoadOutcome::Loaded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Panel {
    Image {
        src: String,
        alt: String,
        page_number: u32,
        error_text: String,
    },
    Placeholder {
        slot: usize,
    },
    Failed {
        page_number: u32,
        message: String,
    },
}

/// Where rendered panels go. `clear` drops whatever a previous render left.
pub trait PanelSink {
    fn clear(&mut self);
    fn append(&mut self, panel: Panel);
}

impl PanelSink for Vec<Panel> {
    fn clear(&mut self) {
        Vec::clear(self);
    }

    fn append(&mut self, panel: Panel) {
        self.push(panel);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub loaded: usize,
    pub failed: usize,
    pub placeholders: usize,
}

pub struct PageRenderer<'a> {
    loader: &'a dyn ImageLoader,
}

impl<'a> PageRenderer<'a> {
    pub fn new(loader: &'a dyn ImageLoader) -> Self {
        Self { loader }
    }

    pub fn render(&self, manifest: &Manifest, sink: &mut dyn PanelSink) -> RenderSummary {
        sink.clear();
        let mut summary = RenderSummary::default();
        for entry in &manifest.entries {
            match entry {
                ManifestEntry::Placeholder { slot } => {
                    summary.placeholders += 1;
                    sink.append(Panel::Placeholder { slot: *slot });
                }
                ManifestEntry::Page(page) => match self.loader.load(page) {
                    LoadOutcome::Loaded => {
                        debug!(chapter = %page.chapter, page = page.page_number, "image loaded");
                        summary.loaded += 1;
                        sink.append(Panel::Image {
                            src: page.file_path.clone(),
                            alt: page.alt_text.clone(),
                            page_number: page.page_number,
                            error_text: format!(
                                "{} ({})",
                                failure_text(&page.chapter, page.page_number),
                                page.file_path
                            ),
                        });
                    }
                    LoadOutcome::Failed(reason) => {
                        warn!(
                            chapter = %page.chapter,
                            page = page.page_number,
                            path = %page.file_path,
                            %reason,
                            "failed to load image"
                        );
                        summary.failed += 1;
                        sink.append(Panel::Failed {
                            page_number: page.page_number,
                            message: format!(
                                "{} ({}): {reason}",
                                failure_text(&page.chapter, page.page_number),
                                page.file_path
                            ),
                        });
                    }
                },
            }
        }
        summary
    }
}

pub fn failure_text(chapter: &ChapterId, page_number: u32) -> String {
    format!("Failed to load Chapter {chapter} image {page_number}")
}

/// Collects panel markup for the chapter template. Image paths are
/// href-encoded and prefixed with `rel_root`.
#[derive(Debug, Clone, Default)]
pub struct HtmlPanelSink {
    rel_root: String,
    fragments: Vec<String>,
}

impl HtmlPanelSink {
    pub fn new(rel_root: impl Into<String>) -> Self {
        Self {
            rel_root: rel_root.into(),
            fragments: Vec::new(),
        }
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn into_fragments(self) -> Vec<String> {
        self.fragments
    }
}

impl PanelSink for HtmlPanelSink {
    fn clear(&mut self) {
        self.fragments.clear();
    }

    fn append(&mut self, panel: Panel) {
        let html = match panel {
            Panel::Image {
                src,
                alt,
                page_number,
                error_text,
            } => format!(
                "<div class=\"panel\" data-page=\"{page_number}\"><img src=\"{}{}\" alt=\"{}\" loading=\"lazy\" data-error=\"{}\"></div>",
                self.rel_root,
                escape_attr(&encode_path(&src)),
                escape_attr(&alt),
                escape_attr(&error_text)
            ),
            Panel::Placeholder { slot } => {
                format!("<div class=\"panel panel-placeholder\" data-slot=\"{slot}\"></div>")
            }
            Panel::Failed {
                page_number,
                message,
            } => format!(
                "<div class=\"panel panel-error\" data-page=\"{page_number}\"><p>{}</p></div>",
                escape_html_text(&message)
            ),
        };
        self.fragments.push(html);
    }
}

pub fn render_markdown_to_html(md: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    let parser = Parser::new_ext(md, options);
    let mut html_out = String::new();
    html::push_html(&mut html_out, parser);
    html_out
}

fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_html_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::manifest::ManifestResolver;
    use crate::rule_table::load_builtin_edition;

    /// Fails the listed page numbers.
    struct FailingLoader(BTreeSet<u32>);

    impl ImageLoader for FailingLoader {
        fn load(&self, page: &PageDescriptor) -> LoadOutcome {
            if self.0.contains(&page.page_number) {
                LoadOutcome::Failed("not found".to_string())
            } else {
                LoadOutcome::Loaded
            }
        }
    }

    fn archive_manifest(id: ChapterId) -> Manifest {
        let edition = load_builtin_edition("archive").expect("archive");
        ManifestResolver::new(&edition).resolve(&id)
    }

    #[test]
    fn one_panel_per_entry_in_order() {
        let manifest = archive_manifest(ChapterId::Number(0));
        let mut panels: Vec<Panel> = vec![Panel::Placeholder { slot: 99 }];
        let summary = PageRenderer::new(&DeferredLoader).render(&manifest, &mut panels);
        assert_eq!(summary.loaded, 8);
        assert_eq!(panels.len(), 8);
        let numbers: Vec<u32> = panels
            .iter()
            .map(|panel| match panel {
                Panel::Image { page_number, .. } => *page_number,
                other => panic!("unexpected panel {other:?}"),
            })
            .collect();
        assert_eq!(numbers, (2..=9).collect::<Vec<_>>());
    }

    #[test]
    fn failed_images_are_isolated() {
        let manifest = archive_manifest(ChapterId::Number(12));
        let loader = FailingLoader(BTreeSet::from([4]));
        let mut panels: Vec<Panel> = Vec::new();
        let summary = PageRenderer::new(&loader).render(&manifest, &mut panels);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.loaded, manifest.pages().count() - 1);
        let Panel::Failed { message, .. } = &panels[1] else {
            panic!("second panel should have failed: {:?}", panels[1]);
        };
        assert!(message.contains("Chapter 12 image 4"));
        assert!(message.contains("images/chapter 12/04.jpg"));
        assert!(matches!(panels[2], Panel::Image { page_number: 5, .. }));
    }

    #[test]
    fn placeholders_render_as_empty_panels() {
        let manifest = archive_manifest(ChapterId::Number(150));
        let mut sink = HtmlPanelSink::new("../");
        let summary = PageRenderer::new(&DeferredLoader).render(&manifest, &mut sink);
        assert_eq!(summary.placeholders, 6);
        assert_eq!(sink.fragments().len(), 6);
        assert!(sink.fragments()[0].contains("panel-placeholder"));
    }

    #[test]
    fn html_sink_encodes_paths_and_carries_error_text() {
        let manifest = archive_manifest(ChapterId::Special("90.2".to_string()));
        let mut sink = HtmlPanelSink::new("../");
        PageRenderer::new(&DeferredLoader).render(&manifest, &mut sink);
        let first = &sink.fragments()[0];
        assert!(first.contains("src=\"../images/chapter%2090.2/01.png\""), "{first}");
        assert!(first.contains("alt=\"Chapter 90.2 - Page 1\""));
        assert!(first.contains(
            "data-error=\"Failed to load Chapter 90.2 image 1 (images/chapter 90.2/01.png)\""
        ));
    }

    #[test]
    fn rendering_twice_replaces_content() {
        let manifest = archive_manifest(ChapterId::Number(1));
        let mut sink = HtmlPanelSink::default();
        let renderer = PageRenderer::new(&DeferredLoader);
        renderer.render(&manifest, &mut sink);
        renderer.render(&manifest, &mut sink);
        assert_eq!(sink.into_fragments().len(), 26);
    }

    #[test]
    fn failure_markup_is_escaped() {
        let mut sink = HtmlPanelSink::default();
        sink.append(Panel::Failed {
            page_number: 1,
            message: "<bad> & worse".to_string(),
        });
        assert!(sink.fragments()[0].contains("&lt;bad&gt; &amp; worse"));
    }
}
