use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use blake3::{Hasher, hash};

use crate::model::{BuildTask, InputFingerprint, OutputArtifact, TaskId, TaskKind};

/// Theme files under this prefix feed the template engine and are not copied.
pub const TEMPLATE_PREFIX: &str = "templates/";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetRelPath(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetSourceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub rel: AssetRelPath,
    pub source: AssetSourceId,
    pub content_hash: String,
}

impl ResolvedAsset {
    pub fn is_template(&self) -> bool {
        self.rel.0.starts_with(TEMPLATE_PREFIX)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetIndex {
    pub assets: Vec<ResolvedAsset>,
}

/// Maps theme-relative asset paths (`css/reader.css`) to output paths.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetManifest {
    pub entries: BTreeMap<String, String>,
}

impl AssetManifest {
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Hasher::new();
        hasher.update(b"panelsite.assets.v1");
        for (rel, out_rel) in &self.entries {
            add_str(&mut hasher, rel);
            add_str(&mut hasher, out_rel);
        }
        *hasher.finalize().as_bytes()
    }
}

pub fn build_asset_manifest(asset_index: &AssetIndex, cache_busting: bool) -> AssetManifest {
    let entries = asset_index
        .assets
        .iter()
        .filter(|asset| !asset.is_template())
        .map(|asset| {
            (
                asset.rel.0.clone(),
                out_rel_for_asset(&asset.rel, &asset.content_hash, cache_busting),
            )
        })
        .collect();
    AssetManifest { entries }
}

pub fn plan_assets(
    asset_index: &AssetIndex,
    cache_busting: bool,
    render_config_hash: [u8; 32],
) -> Result<(Vec<BuildTask>, AssetManifest)> {
    let mut items = asset_index
        .assets
        .iter()
        .filter(|asset| !asset.is_template())
        .cloned()
        .collect::<Vec<_>>();
    items.sort_by(|a, b| a.rel.cmp(&b.rel));

    for window in items.windows(2) {
        if window[0].rel == window[1].rel {
            bail!("duplicate asset rel path: {}", window[0].rel.0);
        }
    }

    let manifest = build_asset_manifest(asset_index, cache_busting);
    let tasks = items
        .into_iter()
        .map(|asset| {
            let out_rel = out_rel_for_asset(&asset.rel, &asset.content_hash, cache_busting);
            let id = TaskId::new("copy_asset", &[asset.rel.0.as_str()]);
            let inputs_fingerprint =
                fingerprint_copy_asset(&id, render_config_hash, &asset.content_hash);
            BuildTask {
                id,
                kind: TaskKind::CopyAsset {
                    rel: asset.rel.0,
                    source: asset.source.0,
                    out_rel: out_rel.clone(),
                },
                inputs_fingerprint,
                outputs: vec![OutputArtifact {
                    path: PathBuf::from(out_rel),
                }],
            }
        })
        .collect();

    Ok((tasks, manifest))
}

fn fingerprint_copy_asset(
    task_id: &TaskId,
    render_config_hash: [u8; 32],
    content_hash: &str,
) -> InputFingerprint {
    let mut hasher = Hasher::new();
    hasher.update(b"panelsite.task.v1");
    add_str(&mut hasher, &task_id.0);
    add_str(&mut hasher, "CopyAsset");
    hasher.update(&render_config_hash);
    hasher.update(hash(content_hash.as_bytes()).as_bytes());
    InputFingerprint(*hasher.finalize().as_bytes())
}

fn add_str(hasher: &mut Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn out_rel_for_asset(rel: &AssetRelPath, content_hash: &str, cache_busting: bool) -> String {
    let rel_path = Path::new(&rel.0);
    let file_name = rel_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (file_name, None),
    };
    let hashed_name = if cache_busting {
        let short = content_hash.get(0..8).unwrap_or(content_hash);
        match ext {
            Some(ext) => format!("{stem}.{short}.{ext}"),
            None => format!("{stem}.{short}"),
        }
    } else {
        file_name.to_string()
    };
    let parent = rel_path.parent().and_then(|parent| {
        let text = parent.to_string_lossy();
        if text.is_empty() {
            None
        } else {
            Some(text.replace('\\', "/"))
        }
    });
    match parent {
        Some(parent) => format!("artifacts/{parent}/{hashed_name}"),
        None => format!("artifacts/{hashed_name}"),
    }
}
