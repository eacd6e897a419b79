use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{Datelike, NaiveDate};
use minijinja::{AutoEscape, Environment, Value};
use panelsite_embedded_assets as embedded;
use serde::Serialize;

use crate::assets::{AssetManifest, TEMPLATE_PREFIX};
use crate::catalog::{CatalogEntry, build_catalog, full_label};
use crate::manifest::ManifestResolver;
use crate::model::{ChapterId, NavItem, Project};
use crate::navigator::{ChapterNavigator, chapter_from_param};
use crate::render::{
    HtmlPanelSink, ImageLoader, PageRenderer, RenderSummary, render_markdown_to_html,
};
use crate::url::{
    CATALOG_KEY, ChapterHref, HOME_KEY, LEGACY_READER_OUTPUT, SiteHref, UrlMapper,
    rel_root_for_output,
};

const DEFAULT_THEME: &str = "default";
const REQUIRED_TEMPLATES: &[&str] = &[
    "base.html",
    "chapter.html",
    "catalog.html",
    "index.html",
    "redirect.html",
    "moved.html",
    "partials/header.html",
    "partials/footer.html",
    "partials/chapter_nav.html",
];

/// HTML templates keyed by their name inside `templates/`.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    sources: BTreeMap<String, String>,
}

impl TemplateSet {
    pub fn embedded() -> Result<Self> {
        let theme = embedded::template(DEFAULT_THEME)
            .ok_or_else(|| anyhow!("embedded theme '{DEFAULT_THEME}' not found"))?;
        let mut set = Self::default();
        for entry in theme.assets {
            if !entry.path.starts_with(TEMPLATE_PREFIX) {
                continue;
            }
            let bytes = embedded::decompress_to_vec(&entry.hash)
                .with_context(|| format!("failed to decompress embedded template {}", entry.path))?;
            let contents = String::from_utf8(bytes)
                .with_context(|| format!("embedded template {} is not utf-8", entry.path))?;
            set.insert_asset(entry.path, contents);
        }
        Ok(set)
    }

    /// Adds or replaces a template given its theme path (`templates/chapter.html`).
    pub fn insert_asset(&mut self, rel: &str, contents: String) {
        let name = rel.strip_prefix(TEMPLATE_PREFIX).unwrap_or(rel);
        self.sources.insert(name.to_string(), contents);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"panelsite.templates.v1");
        for (name, contents) in &self.sources {
            add_str(&mut hasher, name);
            add_str(&mut hasher, contents);
        }
        *hasher.finalize().as_bytes()
    }

    fn environment(&self) -> Result<Environment<'_>> {
        for name in REQUIRED_TEMPLATES {
            if !self.sources.contains_key(*name) {
                return Err(anyhow!("missing template {TEMPLATE_PREFIX}{name}"));
            }
        }
        let mut env = Environment::new();
        env.set_auto_escape_callback(|name| {
            if name.ends_with(".html") {
                AutoEscape::Html
            } else {
                AutoEscape::None
            }
        });
        for (name, contents) in &self.sources {
            env.add_template(name.as_str(), contents.as_str())
                .with_context(|| format!("failed to parse template {name}"))?;
        }
        Ok(env)
    }
}

type Vars = BTreeMap<&'static str, Value>;

fn var(value: impl Serialize) -> Value {
    Value::from_serialize(value)
}

fn add_str(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

#[derive(Debug, Clone, Serialize)]
struct NavItemView {
    label: String,
    href: String,
    active: bool,
}

#[derive(Debug, Clone, Serialize)]
struct FeaturedView {
    href: String,
    label: String,
}

#[derive(Debug, Clone)]
pub struct RenderedChapter {
    pub html: String,
    pub summary: RenderSummary,
}

/// Renders the site's pages for one project.
pub struct SiteRenderer<'a> {
    project: &'a Project,
    templates: &'a TemplateSet,
    asset_manifest: &'a AssetManifest,
    build_date_ymd: String,
    mapper: UrlMapper,
}

impl<'a> SiteRenderer<'a> {
    pub fn new(
        project: &'a Project,
        templates: &'a TemplateSet,
        asset_manifest: &'a AssetManifest,
        build_date_ymd: impl Into<String>,
    ) -> Self {
        Self {
            project,
            templates,
            asset_manifest,
            build_date_ymd: build_date_ymd.into(),
            mapper: UrlMapper::new(&project.config),
        }
    }

    pub fn render_chapter_page(
        &self,
        chapter: &ChapterId,
        output: &Path,
        loader: &dyn ImageLoader,
    ) -> Result<RenderedChapter> {
        let edition = &self.project.edition;
        let rel = rel_root_for_output(output);
        let manifest = ManifestResolver::new(edition)
            .with_placeholder_pages(self.project.config.reader.placeholder_pages)
            .resolve(chapter);
        let mut sink = HtmlPanelSink::new(rel.clone());
        let summary = PageRenderer::new(loader).render(&manifest, &mut sink);

        let navigator = ChapterNavigator::starting_at(edition, chapter)
            .with_hrefs(SiteHref::new(self.mapper, rel.clone()));
        let chapter_label = full_label(chapter);
        let mut vars = Vars::new();
        vars.insert("page_title", var(&chapter_label));
        vars.insert("chapter_label", var(&chapter_label));
        vars.insert("chapter_id", var(chapter.to_string()));
        vars.insert("panels", var(sink.into_fragments()));
        vars.insert("prev_href", var(navigator.previous_href()));
        vars.insert("next_href", var(navigator.next_href()));
        vars.insert("selector", var(navigator.build_selector()));
        let html = self.render_template("chapter.html", &rel, output, vars)?;
        Ok(RenderedChapter { html, summary })
    }

    pub fn render_catalog_page(&self) -> Result<String> {
        let output = self.mapper.map(CATALOG_KEY).primary_output;
        let rel = rel_root_for_output(&output);
        let hrefs = SiteHref::new(self.mapper, rel.clone());
        let entries: Vec<CatalogEntry> = build_catalog(&self.project.edition, &hrefs);
        let mut vars = Vars::new();
        vars.insert("page_title", var("Chapters"));
        vars.insert("entries", var(entries));
        self.render_template("catalog.html", &rel, &output, vars)
    }

    pub fn render_home_page(&self) -> Result<String> {
        let output = self.mapper.map(HOME_KEY).primary_output;
        let rel = rel_root_for_output(&output);
        let edition = &self.project.edition;
        let hrefs = SiteHref::new(self.mapper, rel.clone());
        let first = chapter_from_param(edition, None);
        let about_html = self
            .project
            .config
            .site
            .about
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .map(render_markdown_to_html);
        let featured: Vec<FeaturedView> = edition
            .chapter_order()
            .into_iter()
            .filter(|id| edition.rule(id).is_some())
            .rev()
            .take(self.project.config.reader.featured_chapters)
            .map(|id| FeaturedView {
                href: hrefs.href(&id),
                label: full_label(&id),
            })
            .collect();
        let catalog_href = format!("{rel}{}", self.mapper.map(CATALOG_KEY).href);
        let mut vars = Vars::new();
        vars.insert("page_title", var(""));
        vars.insert("first_href", var(hrefs.href(&first)));
        vars.insert("catalog_href", var(catalog_href));
        vars.insert("about_html", var(about_html));
        vars.insert("featured", var(featured));
        self.render_template("index.html", &rel, &output, vars)
    }

    /// The legacy `chapter.html?id=N` entry point, resolved in the browser.
    pub fn render_redirect_page(&self) -> Result<String> {
        let output = Path::new(LEGACY_READER_OUTPUT);
        let rel = rel_root_for_output(output);
        let edition = &self.project.edition;
        let hrefs = SiteHref::new(self.mapper, rel.clone());
        let targets: BTreeMap<String, String> = edition
            .chapter_order()
            .iter()
            .map(|id| (id.to_string(), hrefs.href(id)))
            .collect();
        let targets_json =
            serde_json::to_string(&targets).context("failed to encode redirect targets")?;
        let default_href = hrefs.href(&chapter_from_param(edition, None));
        let mut vars = Vars::new();
        vars.insert("page_title", var("Opening chapter"));
        vars.insert("targets_json", var(targets_json));
        vars.insert("min_chapter", var(edition.range.min));
        vars.insert("max_chapter", var(edition.range.max));
        vars.insert("default_href", var(default_href));
        self.render_template("redirect.html", &rel, output, vars)
    }

    /// Page left at `from` pointing at the pretty URL `to_href` (root-relative).
    pub fn render_moved_page(&self, from: &Path, to_href: &str) -> Result<String> {
        let rel = rel_root_for_output(from);
        let target_href = format!("{rel}{to_href}");
        let mut vars = Vars::new();
        vars.insert("page_title", var("Moved"));
        vars.insert("target_href", var(target_href));
        self.render_template("moved.html", &rel, from, vars)
    }

    fn render_template(
        &self,
        name: &str,
        rel: &str,
        output: &Path,
        mut vars: Vars,
    ) -> Result<String> {
        let env = self
            .templates
            .environment()
            .context("failed to initialize templates")?;
        let template = env
            .get_template(name)
            .with_context(|| format!("missing template {name}"))?;
        let site = &self.project.config.site;
        let current_href = output.to_string_lossy().replace('\\', "/");
        vars.insert("site_title", var(&site.title));
        vars.insert("site_tagline", var(&site.tagline));
        vars.insert("site_language", var(&site.language));
        vars.insert("rel", var(rel));
        vars.insert("asset_manifest", var(&self.asset_manifest.entries));
        vars.insert(
            "compact_max_width",
            var(self.project.config.reader.compact_label_max_width),
        );
        vars.insert(
            "home_href",
            var(format!("{rel}{}", self.mapper.map(HOME_KEY).href)),
        );
        vars.insert(
            "nav_items",
            var(build_nav_view(
                &self.project.config.nav,
                &self.mapper,
                &current_href,
                rel,
            )),
        );
        vars.insert(
            "footer_text",
            var(footer_copyright_text(site, &self.build_date_ymd)),
        );
        vars.insert("show_generator", var(self.project.config.footer.show_generator));
        template
            .render(&vars)
            .with_context(|| format!("failed to render template {name}"))
    }
}

fn build_nav_view(
    nav: &[NavItem],
    mapper: &UrlMapper,
    current_href: &str,
    rel: &str,
) -> Vec<NavItemView> {
    let items = resolved_nav_items(nav);
    let mut active_taken = false;
    items
        .iter()
        .map(|item| {
            let (href, target) = if is_external_href(&item.href) || is_absolute_href(&item.href) {
                (item.href.clone(), item.href.clone())
            } else {
                let target = mapper.map(&item.href).href;
                (format!("{rel}{target}"), target)
            };
            let active = !active_taken && normalize_href(&target) == normalize_href(current_href);
            if active {
                active_taken = true;
            }
            NavItemView {
                label: item.label.clone(),
                href,
                active,
            }
        })
        .collect()
}

fn resolved_nav_items(nav: &[NavItem]) -> Vec<NavItem> {
    if !nav.is_empty() {
        return nav.to_vec();
    }
    vec![
        NavItem {
            label: "Home".to_string(),
            href: HOME_KEY.to_string(),
        },
        NavItem {
            label: "Chapters".to_string(),
            href: CATALOG_KEY.to_string(),
        },
    ]
}

fn is_external_href(href: &str) -> bool {
    let href = href.trim();
    href.starts_with("http://")
        || href.starts_with("https://")
        || href.starts_with("mailto:")
}

fn is_absolute_href(href: &str) -> bool {
    let href = href.trim();
    href.starts_with('/') || href.starts_with('#') || href.starts_with('?')
}

fn normalize_href(value: &str) -> String {
    let trimmed = value.trim();
    let without_prefix = trimmed.strip_prefix("./").unwrap_or(trimmed);
    let without_prefix = without_prefix.strip_prefix('/').unwrap_or(without_prefix);
    let without_index = without_prefix
        .strip_suffix("index.html")
        .unwrap_or(without_prefix);
    without_index.strip_suffix('/').unwrap_or(without_index).to_string()
}

fn footer_copyright_text(site: &crate::model::SiteMeta, build_date_ymd: &str) -> String {
    if let Some(text) = site
        .copyright
        .as_ref()
        .filter(|value| !value.trim().is_empty())
    {
        return text.to_string();
    }
    let year = NaiveDate::parse_from_str(build_date_ymd, "%Y-%m-%d")
        .map(|date| date.year().to_string())
        .unwrap_or_else(|_| "0000".to_string());
    format!("Copyright {year} by {}", site.title)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::model::{
        AssetsConfig, EditionSource, FooterConfig, ReaderConfig, SiteConfig, SiteMeta, UrlStyle,
    };
    use crate::render::DeferredLoader;
    use crate::rule_table::load_builtin_edition;

    fn project(style: UrlStyle) -> Project {
        Project {
            root: PathBuf::from("."),
            config: SiteConfig {
                site: SiteMeta {
                    id: "archive".to_string(),
                    title: "Archive".to_string(),
                    tagline: Some("Every chapter".to_string()),
                    about: Some("Read **all** of it.".to_string()),
                    copyright: None,
                    base_url: "https://example.com/".to_string(),
                    language: "en".to_string(),
                    url_style: style,
                },
                edition: EditionSource::Builtin("archive".to_string()),
                reader: ReaderConfig {
                    placeholder_pages: 6,
                    compact_label_max_width: 768,
                    images_dir: "images".to_string(),
                    check_images: false,
                    featured_chapters: 3,
                },
                assets: AssetsConfig {
                    cache_busting: false,
                },
                footer: FooterConfig {
                    show_generator: true,
                },
                nav: Vec::new(),
            },
            edition: load_builtin_edition("archive").expect("archive"),
        }
    }

    /// Attribute values come out of minijinja with `/` escaped.
    fn unescape(html: &str) -> String {
        html.replace("&#x2f;", "/")
    }

    fn manifest() -> AssetManifest {
        let mut entries = BTreeMap::new();
        entries.insert("css/reader.css".to_string(), "artifacts/css/reader.css".to_string());
        entries.insert("js/reader.js".to_string(), "artifacts/js/reader.js".to_string());
        AssetManifest { entries }
    }

    #[test]
    fn chapter_page_links_neighbours_and_panels() {
        let project = project(UrlStyle::Html);
        let templates = TemplateSet::embedded().expect("templates");
        let assets = manifest();
        let renderer = SiteRenderer::new(&project, &templates, &assets, "2026-03-01");
        let rendered = renderer
            .render_chapter_page(
                &ChapterId::Number(90),
                Path::new("chapter/90.html"),
                &DeferredLoader,
            )
            .expect("render");
        let html = unescape(&rendered.html);
        assert!(html.contains("href=\"../chapter/90.2.html\""), "next link missing");
        assert!(html.contains("href=\"../chapter/89.html\""));
        assert!(html.contains("../images/chapter%2090/"));
        assert!(html.contains("../artifacts/css/reader.css"));
        assert!(html.contains("Copyright 2026 by Archive"));
        assert!(html.contains("<option value=\"../chapter/90.html\" selected>"));
        assert_eq!(rendered.summary.failed, 0);
        assert!(rendered.summary.loaded > 0);
    }

    #[test]
    fn last_chapter_disables_next() {
        let project = project(UrlStyle::Html);
        let templates = TemplateSet::embedded().expect("templates");
        let assets = manifest();
        let renderer = SiteRenderer::new(&project, &templates, &assets, "2026-03-01");
        let rendered = renderer
            .render_chapter_page(
                &ChapterId::Number(204),
                Path::new("chapter/204.html"),
                &DeferredLoader,
            )
            .expect("render");
        assert!(rendered.html.contains("next-chapter disabled"));
        assert_eq!(rendered.summary.placeholders, 6);
    }

    #[test]
    fn catalog_carries_both_labels() {
        let project = project(UrlStyle::Pretty);
        let templates = TemplateSet::embedded().expect("templates");
        let assets = manifest();
        let renderer = SiteRenderer::new(&project, &templates, &assets, "2026-03-01");
        let html = unescape(&renderer.render_catalog_page().expect("render"));
        assert!(html.contains("Chapter 90.2"));
        assert!(html.contains("<span class=\"label-compact\">90.2</span>"));
        assert!(html.contains("href=\"../chapter/90.2/\""));
        assert!(html.contains("max-width: 768px"));
    }

    #[test]
    fn home_page_renders_about_markdown() {
        let project = project(UrlStyle::Html);
        let templates = TemplateSet::embedded().expect("templates");
        let assets = manifest();
        let renderer = SiteRenderer::new(&project, &templates, &assets, "2026-03-01");
        let html = unescape(&renderer.render_home_page().expect("render"));
        assert!(html.contains("<strong>all</strong>"));
        assert!(html.contains("href=\"chapter/1.html\""));
        assert!(html.contains("href=\"chapter/102.html\""));
        assert!(html.contains("href=\"chapters.html\""));
    }

    #[test]
    fn redirect_page_lists_targets() {
        let project = project(UrlStyle::Html);
        let templates = TemplateSet::embedded().expect("templates");
        let assets = manifest();
        let renderer = SiteRenderer::new(&project, &templates, &assets, "2026-03-01");
        let html = unescape(&renderer.render_redirect_page().expect("render"));
        assert!(html.contains("data-min=\"0\""));
        assert!(html.contains("data-max=\"204\""));
        assert!(html.contains("chapter/90.2.html"));
        assert!(html.contains("data-default=\"chapter/1.html\""));
    }

    #[test]
    fn site_templates_override_embedded_ones() {
        let project = project(UrlStyle::Html);
        let mut templates = TemplateSet::embedded().expect("templates");
        templates.insert_asset(
            "templates/catalog.html",
            "{% extends \"base.html\" %}{% block content %}custom catalog{% endblock %}".to_string(),
        );
        let assets = manifest();
        let renderer = SiteRenderer::new(&project, &templates, &assets, "2026-03-01");
        let html = renderer.render_catalog_page().expect("render");
        assert!(html.contains("custom catalog"));
    }

    #[test]
    fn template_hash_tracks_overrides() {
        let embedded = TemplateSet::embedded().expect("templates");
        let mut changed = embedded.clone();
        changed.insert_asset("templates/index.html", "changed".to_string());
        assert_ne!(embedded.hash(), changed.hash());
    }
}
