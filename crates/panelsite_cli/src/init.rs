use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use panelsite_core::config::CONFIG_FILE_NAME;
use panelsite_embedded_assets as embedded;
use tracing::info;

const CONFIG_TEMPLATE: &str = include_str!("../assets/panelsite.template.yaml");
pub const DEFAULT_EDITION: &str = "archive";

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub title: String,
    pub base_url: String,
    pub language: String,
    pub edition: String,
    /// Copy the embedded stylesheet and script into `assets/` for editing.
    pub copy_theme: bool,
    pub target_dir: PathBuf,
}

pub fn init_site(options: InitOptions) -> Result<()> {
    let target_dir = options.target_dir;
    if !target_dir.exists() {
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("failed to create {}", target_dir.display()))?;
    }

    if let Some(blocking) = first_blocking_path(&target_dir) {
        bail!("init aborted: {} already exists", blocking.display());
    }

    let edition = options.edition.trim();
    if !embedded::edition_names().iter().any(|name| *name == edition) {
        bail!(
            "unknown edition '{}' (builtin: {})",
            edition,
            embedded::edition_names().join(", ")
        );
    }

    for dir in [target_dir.join("images"), target_dir.join("assets")] {
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let config = render_config(
        &slugify_title(&options.title),
        &options.title,
        &normalize_base_url(&options.base_url),
        &options.language,
        edition,
    );
    let config_path = target_dir.join(CONFIG_FILE_NAME);
    fs::write(&config_path, config)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    write_assets_readme(&target_dir.join("assets/README.md"))?;
    if options.copy_theme {
        copy_embedded_theme(&target_dir.join("assets"))?;
    }

    info!(site = %target_dir.display(), edition, "initialized site");
    Ok(())
}

fn first_blocking_path(target_dir: &Path) -> Option<PathBuf> {
    let checks = [
        target_dir.join(CONFIG_FILE_NAME),
        target_dir.join("images"),
        target_dir.join("assets"),
    ];
    checks.into_iter().find(|path| path.exists())
}

fn render_config(site_id: &str, title: &str, base_url: &str, language: &str, edition: &str) -> String {
    CONFIG_TEMPLATE
        .replace("{{SITE_ID}}", &yaml_string(site_id))
        .replace("{{TITLE}}", &yaml_string(title))
        .replace("{{BASE_URL}}", &yaml_string(base_url))
        .replace("{{LANG}}", &yaml_string(language))
        .replace("{{EDITION}}", &yaml_string(edition))
}

fn write_assets_readme(path: &Path) -> Result<()> {
    let contents = "\
# Assets\n\
\n\
Files placed here override the reader theme built into panelsite. Use the same\n\
relative path as the embedded file, for example `css/reader.css` or\n\
`templates/chapter.html`. Anything else is copied to `artifacts/` as is.\n";
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn copy_embedded_theme(assets_root: &Path) -> Result<()> {
    let theme = embedded::template("default")
        .ok_or_else(|| anyhow!("embedded theme 'default' not found"))?;
    for asset in theme.assets {
        if !(asset.path.starts_with("css/") || asset.path.starts_with("js/")) {
            continue;
        }
        let bytes = embedded::decompress_to_vec(&asset.hash)
            .ok_or_else(|| anyhow!("failed to decompress embedded asset {}", asset.path))?;
        let out_path = assets_root.join(asset.path);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&out_path, bytes)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
    }
    Ok(())
}

fn normalize_base_url(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "http://localhost:8080/".to_string();
    }
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn slugify_title(value: &str) -> String {
    let mut out = String::new();
    let mut prev_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "reader".to_string()
    } else {
        trimmed.to_string()
    }
}

fn yaml_string(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', " ")
}
