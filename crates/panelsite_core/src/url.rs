use std::path::{Component, Path, PathBuf};

use crate::model::{ChapterId, SiteConfig, UrlStyle};

pub const HOME_KEY: &str = "index";
pub const CATALOG_KEY: &str = "chapters";
/// Output file of the legacy `chapter.html?id=N` entry point.
pub const LEGACY_READER_OUTPUT: &str = "chapter.html";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMapping {
    pub href: String,
    pub primary_output: PathBuf,
    pub fallback: Option<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub from: PathBuf,
    pub to_href: String,
}

#[derive(Debug, Clone, Copy)]
pub struct UrlMapper {
    style: UrlStyle,
}

impl UrlMapper {
    pub fn new(cfg: &SiteConfig) -> Self {
        Self::with_style(cfg.site.url_style)
    }

    pub fn with_style(style: UrlStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> UrlStyle {
        self.style
    }

    pub fn map(&self, logical_key: &str) -> UrlMapping {
        let trimmed = logical_key.trim_matches('/');
        let logical = trimmed.strip_suffix(".html").unwrap_or(trimmed);
        if logical.is_empty() || logical == "." || logical == HOME_KEY {
            return UrlMapping {
                href: "index.html".to_string(),
                primary_output: PathBuf::from("index.html"),
                fallback: None,
            };
        }
        match self.style {
            UrlStyle::Html => UrlMapping {
                href: format!("{logical}.html"),
                primary_output: PathBuf::from(format!("{logical}.html")),
                fallback: None,
            },
            UrlStyle::Pretty => UrlMapping {
                href: format!("{logical}/"),
                primary_output: PathBuf::from(format!("{logical}/index.html")),
                fallback: None,
            },
            UrlStyle::PrettyWithFallback => UrlMapping {
                href: format!("{logical}/"),
                primary_output: PathBuf::from(format!("{logical}/index.html")),
                fallback: Some(Redirect {
                    from: PathBuf::from(format!("{logical}.html")),
                    to_href: format!("{logical}/"),
                }),
            },
        }
    }

    pub fn chapter(&self, id: &ChapterId) -> UrlMapping {
        self.map(&chapter_logical_key(id))
    }
}

pub fn chapter_logical_key(id: &ChapterId) -> String {
    format!("chapter/{id}")
}

/// Prefix leading from an output file back to the site root.
pub fn rel_root_for_output(output: &Path) -> String {
    let depth = output
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter(|component| matches!(component, Component::Normal(_)))
                .count()
        })
        .unwrap_or(0);
    "../".repeat(depth)
}

/// Percent-encodes each segment of a relative path for use in an href.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment {
            "." | ".." => segment.to_string(),
            _ => urlencoding::encode(segment).into_owned(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// How a chapter link is spelled in generated markup.
pub trait ChapterHref {
    fn href(&self, id: &ChapterId) -> String;
}

/// The legacy single-page reader form, `chapter.html?id=12`.
#[derive(Debug, Clone, Default)]
pub struct QueryHref {
    prefix: String,
}

impl QueryHref {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ChapterHref for QueryHref {
    fn href(&self, id: &ChapterId) -> String {
        format!(
            "{}{LEGACY_READER_OUTPUT}?id={}",
            self.prefix,
            urlencoding::encode(&id.to_string())
        )
    }
}

/// Links to the generated per-chapter pages, relative to the page that
/// contains them.
#[derive(Debug, Clone)]
pub struct SiteHref {
    mapper: UrlMapper,
    rel_root: String,
}

impl SiteHref {
    pub fn new(mapper: UrlMapper, rel_root: impl Into<String>) -> Self {
        Self {
            mapper,
            rel_root: rel_root.into(),
        }
    }
}

impl ChapterHref for SiteHref {
    fn href(&self, id: &ChapterId) -> String {
        let href = self.mapper.chapter(id).href;
        format!("{}{}", self.rel_root, encode_path(&href))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_pages_follow_the_url_style() {
        let id = ChapterId::Number(12);
        let html = UrlMapper::with_style(UrlStyle::Html).chapter(&id);
        assert_eq!(html.href, "chapter/12.html");
        assert_eq!(html.primary_output, PathBuf::from("chapter/12.html"));

        let pretty = UrlMapper::with_style(UrlStyle::PrettyWithFallback).chapter(&id);
        assert_eq!(pretty.href, "chapter/12/");
        assert_eq!(pretty.primary_output, PathBuf::from("chapter/12/index.html"));
        assert_eq!(
            pretty.fallback,
            Some(Redirect {
                from: PathBuf::from("chapter/12.html"),
                to_href: "chapter/12/".to_string(),
            })
        );
    }

    #[test]
    fn home_is_always_index_html() {
        for style in [UrlStyle::Html, UrlStyle::Pretty, UrlStyle::PrettyWithFallback] {
            let mapping = UrlMapper::with_style(style).map(HOME_KEY);
            assert_eq!(mapping.href, "index.html");
            assert_eq!(mapping.fallback, None);
        }
    }

    #[test]
    fn rel_root_counts_directories() {
        assert_eq!(rel_root_for_output(Path::new("index.html")), "");
        assert_eq!(rel_root_for_output(Path::new("chapter/12.html")), "../");
        assert_eq!(rel_root_for_output(Path::new("chapter/12/index.html")), "../../");
    }

    #[test]
    fn encodes_spaces_per_segment() {
        assert_eq!(
            encode_path("../images/chapter 90.2/01.png"),
            "../images/chapter%2090.2/01.png"
        );
    }

    #[test]
    fn query_href_encodes_special_tokens() {
        let hrefs = QueryHref::default();
        assert_eq!(hrefs.href(&ChapterId::Number(3)), "chapter.html?id=3");
        assert_eq!(
            hrefs.href(&ChapterId::Special("90.2".to_string())),
            "chapter.html?id=90.2"
        );
        let nested = QueryHref::with_prefix("../");
        assert_eq!(nested.href(&ChapterId::Number(3)), "../chapter.html?id=3");
    }

    #[test]
    fn site_href_is_relative_to_the_page() {
        let hrefs = SiteHref::new(UrlMapper::with_style(UrlStyle::Html), "../");
        assert_eq!(hrefs.href(&ChapterId::Number(7)), "../chapter/7.html");
    }
}
