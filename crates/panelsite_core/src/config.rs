use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::catalog::DEFAULT_COMPACT_LABEL_MAX_WIDTH;
use crate::manifest::DEFAULT_PLACEHOLDER_PAGES;
use crate::model::{
    AssetsConfig, EditionSource, FooterConfig, NavItem, ReaderConfig, SiteConfig, SiteMeta,
    UrlStyle,
};

pub const CONFIG_FILE_NAME: &str = "panelsite.yaml";

#[derive(Debug, Deserialize)]
struct SiteConfigRaw {
    site: SiteMetaRaw,
    edition: Option<String>,
    rules_file: Option<String>,
    reader: Option<ReaderConfigRaw>,
    assets: Option<AssetsConfigRaw>,
    footer: Option<FooterConfigRaw>,
    nav: Option<Vec<NavItemRaw>>,
}

#[derive(Debug, Deserialize)]
struct SiteMetaRaw {
    id: Option<String>,
    title: Option<String>,
    tagline: Option<String>,
    about: Option<String>,
    copyright: Option<String>,
    base_url: Option<String>,
    language: Option<String>,
    url_style: Option<UrlStyle>,
}

#[derive(Debug, Deserialize)]
struct ReaderConfigRaw {
    placeholder_pages: Option<usize>,
    compact_label_max_width: Option<u32>,
    images_dir: Option<String>,
    check_images: Option<bool>,
    featured_chapters: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AssetsConfigRaw {
    cache_busting: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FooterConfigRaw {
    show_generator: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct NavItemRaw {
    label: Option<String>,
    href: Option<String>,
}

pub fn load_site_config(path: &Path) -> Result<SiteConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_site_config(&raw).with_context(|| format!("invalid config {}", path.display()))
}

pub fn parse_site_config(text: &str) -> Result<SiteConfig> {
    let parsed: SiteConfigRaw = serde_yaml::from_str(text).context("failed to parse YAML config")?;

    let site = SiteMeta {
        id: required_string(parsed.site.id, "site.id")?,
        title: required_string(parsed.site.title, "site.title")?,
        tagline: parsed.site.tagline,
        about: parsed.site.about,
        copyright: parsed.site.copyright,
        base_url: required_string(parsed.site.base_url, "site.base_url")?,
        language: required_string(parsed.site.language, "site.language")?,
        url_style: parsed.site.url_style.unwrap_or_default(),
    };

    let edition = match (parsed.edition, parsed.rules_file) {
        (Some(_), Some(_)) => bail!("edition and rules_file are mutually exclusive"),
        (Some(name), None) => EditionSource::Builtin(required_string(Some(name), "edition")?),
        (None, Some(path)) => {
            EditionSource::File(PathBuf::from(required_string(Some(path), "rules_file")?))
        }
        (None, None) => bail!("missing required field: edition or rules_file"),
    };

    let reader_raw = parsed.reader;
    let placeholder_pages = reader_raw
        .as_ref()
        .and_then(|reader| reader.placeholder_pages)
        .unwrap_or(DEFAULT_PLACEHOLDER_PAGES);
    let compact_label_max_width = reader_raw
        .as_ref()
        .and_then(|reader| reader.compact_label_max_width)
        .unwrap_or(DEFAULT_COMPACT_LABEL_MAX_WIDTH);
    if compact_label_max_width == 0 {
        bail!("reader.compact_label_max_width must be > 0");
    }
    let images_dir = non_empty_or_default(
        reader_raw.as_ref().and_then(|reader| reader.images_dir.clone()),
        "images",
        "reader.images_dir",
    )?;
    let images_dir = images_dir.trim().trim_matches('/').to_string();
    if Path::new(&images_dir).is_absolute() || images_dir.split('/').any(|part| part == "..") {
        bail!("reader.images_dir must be a relative path inside the site");
    }
    let reader = ReaderConfig {
        placeholder_pages,
        compact_label_max_width,
        images_dir,
        check_images: reader_raw
            .as_ref()
            .and_then(|reader| reader.check_images)
            .unwrap_or(true),
        featured_chapters: reader_raw
            .as_ref()
            .and_then(|reader| reader.featured_chapters)
            .unwrap_or(4),
    };

    let nav = match parsed.nav {
        Some(items) => parse_nav_items(items)?,
        None => Vec::new(),
    };

    Ok(SiteConfig {
        site,
        edition,
        reader,
        assets: AssetsConfig {
            cache_busting: parsed
                .assets
                .and_then(|assets| assets.cache_busting)
                .unwrap_or(false),
        },
        footer: FooterConfig {
            show_generator: parsed
                .footer
                .and_then(|footer| footer.show_generator)
                .unwrap_or(true),
        },
        nav,
    })
}

fn required_string(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => bail!("missing required field: {}", field),
    }
}

fn parse_nav_items(items: Vec<NavItemRaw>) -> Result<Vec<NavItem>> {
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let label = required_string(item.label, &format!("nav[{idx}].label"))?;
        let href = required_string(item.href, &format!("nav[{idx}].href"))?;
        out.push(NavItem { label, href });
    }
    Ok(out)
}

fn non_empty_or_default(value: Option<String>, default: &str, field: &str) -> Result<String> {
    match value {
        Some(text) => {
            if text.trim().is_empty() {
                bail!("{field} must not be empty");
            }
            Ok(text)
        }
        None => Ok(default.to_string()),
    }
}
