use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use panelsite_core::assets::{AssetIndex, AssetRelPath, AssetSourceId, ResolvedAsset};
use panelsite_core::templates::TemplateSet;
use panelsite_embedded_assets as embedded;
use tracing::debug;
use walkdir::WalkDir;

/// Site directory whose files replace or extend the embedded theme.
pub const SITE_ASSETS_DIR: &str = "assets";
const DEFAULT_THEME: &str = "default";

#[derive(Debug, Default, Clone)]
pub struct AssetSourceLookup {
    sources: BTreeMap<AssetSourceId, AssetSource>,
}

impl AssetSourceLookup {
    pub fn resolve(&self, source: &AssetSourceId) -> Option<&AssetSource> {
        self.sources.get(source)
    }

    pub fn read(&self, source: &AssetSourceId) -> Result<Vec<u8>> {
        match self
            .resolve(source)
            .ok_or_else(|| anyhow!("unknown asset source {}", source.0))?
        {
            AssetSource::File(path) => {
                std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
            }
            AssetSource::Embedded(bytes) => Ok(bytes.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AssetSource {
    File(PathBuf),
    Embedded(Vec<u8>),
}

fn embedded_theme_assets() -> Result<Vec<(String, Vec<u8>)>> {
    let theme = embedded::template(DEFAULT_THEME)
        .ok_or_else(|| anyhow!("embedded theme '{DEFAULT_THEME}' not found"))?;
    let mut assets = Vec::new();
    for entry in theme.assets {
        let bytes = embedded::decompress_to_vec(&entry.hash)
            .ok_or_else(|| anyhow!("failed to decompress embedded asset {}", entry.path))?;
        assets.push((entry.path.to_string(), bytes));
    }
    Ok(assets)
}

/// Embedded theme files overlaid with the site's `assets/` directory.
pub fn discover_assets(site_root: &Path) -> Result<(AssetIndex, AssetSourceLookup)> {
    let mut resolved: BTreeMap<AssetRelPath, (AssetSourceId, AssetSource, String)> =
        BTreeMap::new();
    for (rel_path, bytes) in embedded_theme_assets()? {
        let rel = normalize_rel_path(Path::new(&rel_path))?;
        let content_hash = blake3::hash(&bytes).to_hex().to_string();
        let source_id = AssetSourceId(format!("embedded:{content_hash}"));
        resolved.insert(rel, (source_id, AssetSource::Embedded(bytes), content_hash));
    }

    let overlay = site_root.join(SITE_ASSETS_DIR);
    if overlay.is_dir() {
        collect_site_assets(&overlay, &mut resolved)?;
    }

    let mut sources = BTreeMap::new();
    let assets = resolved
        .into_iter()
        .map(|(rel, (source, asset_source, content_hash))| {
            sources.insert(source.clone(), asset_source);
            ResolvedAsset {
                rel,
                source,
                content_hash,
            }
        })
        .collect::<Vec<_>>();

    Ok((AssetIndex { assets }, AssetSourceLookup { sources }))
}

/// Templates from the resolved asset index, site overrides included.
pub fn load_templates(index: &AssetIndex, lookup: &AssetSourceLookup) -> Result<TemplateSet> {
    let mut templates = TemplateSet::default();
    for asset in index.assets.iter().filter(|asset| asset.is_template()) {
        let bytes = lookup.read(&asset.source)?;
        let contents = String::from_utf8(bytes)
            .with_context(|| format!("template {} is not utf-8", asset.rel.0))?;
        templates.insert_asset(&asset.rel.0, contents);
    }
    Ok(templates)
}

pub fn copy_asset_to_out(
    out_dir: &Path,
    out_rel: &str,
    source: &AssetSourceId,
    lookup: &AssetSourceLookup,
) -> Result<()> {
    let out_path = out_dir.join(out_rel);
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match lookup
        .resolve(source)
        .ok_or_else(|| anyhow!("unknown asset source {}", source.0))?
    {
        AssetSource::File(src_path) => {
            std::fs::copy(src_path, &out_path).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    src_path.display(),
                    out_path.display()
                )
            })?;
        }
        AssetSource::Embedded(bytes) => {
            std::fs::write(&out_path, bytes)
                .with_context(|| format!("failed to write {}", out_path.display()))?;
        }
    }
    Ok(())
}

fn collect_site_assets(
    root: &Path,
    out: &mut BTreeMap<AssetRelPath, (AssetSourceId, AssetSource, String)>,
) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).with_context(|| {
            format!(
                "failed to read asset relative path for {}",
                entry.path().display()
            )
        })?;
        let rel = normalize_rel_path(rel)?;
        if rel.0 == "README.md" {
            continue;
        }
        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        let content_hash = blake3::hash(&bytes).to_hex().to_string();
        debug!(asset = %rel.0, "site asset overrides theme");
        out.insert(
            rel,
            (
                AssetSourceId(entry.path().to_string_lossy().to_string()),
                AssetSource::File(entry.path().to_path_buf()),
                content_hash,
            ),
        );
    }
    Ok(())
}

fn normalize_rel_path(path: &Path) -> Result<AssetRelPath> {
    let raw = path.to_string_lossy().replace('\\', "/");
    if raw.is_empty() {
        bail!("asset rel path must not be empty");
    }
    let rel = Path::new(&raw);
    if rel.is_absolute() {
        bail!("asset rel path must be relative: {}", raw);
    }
    if rel.components().any(|comp| {
        matches!(
            comp,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    }) {
        bail!("asset rel path must not contain parent/root: {}", raw);
    }
    Ok(AssetRelPath(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_theme_is_indexed_with_templates() {
        let temp = tempfile::TempDir::new().unwrap();
        let (index, lookup) = discover_assets(temp.path()).expect("assets");
        let rels: Vec<&str> = index.assets.iter().map(|asset| asset.rel.0.as_str()).collect();
        assert!(rels.contains(&"css/reader.css"));
        assert!(rels.contains(&"js/reader.js"));
        assert!(rels.contains(&"templates/chapter.html"));
        let templates = load_templates(&index, &lookup).expect("templates");
        assert!(templates.names().any(|name| name == "chapter.html"));
    }

    #[test]
    fn rejects_parent_components() {
        assert!(normalize_rel_path(Path::new("../escape.css")).is_err());
        assert_eq!(
            normalize_rel_path(Path::new("css/reader.css")).unwrap().0,
            "css/reader.css"
        );
    }
}
