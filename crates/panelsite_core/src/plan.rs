//! Deterministic build plan construction (no execution).

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use blake3::Hasher;

use crate::assets::{AssetIndex, plan_assets};
use crate::manifest::ManifestResolver;
use crate::model::{
    BuildPlan, BuildTask, ChapterId, InputFingerprint, OutputArtifact, Project, TaskId, TaskKind,
};
use crate::url::{CATALOG_KEY, HOME_KEY, LEGACY_READER_OUTPUT, UrlMapper, UrlMapping};

/// Image files found under the site root, keyed by their site-relative path
/// (`images/chapter 3/01.jpg`) with a blake3 hex content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePlanInput {
    pub files: BTreeMap<String, String>,
}

pub fn build_plan(
    project: &Project,
    assets: &AssetIndex,
    images: &ImagePlanInput,
    templates_hash: [u8; 32],
) -> Result<BuildPlan> {
    let config_hash = hash_config(project)?;
    let edition_hash = hash_edition(project)?;
    let (mut tasks, asset_manifest) =
        plan_assets(assets, project.config.assets.cache_busting, config_hash)?;

    let mut render_hasher = Hasher::new();
    render_hasher.update(b"panelsite.render.v1");
    render_hasher.update(&config_hash);
    render_hasher.update(&edition_hash);
    render_hasher.update(&templates_hash);
    render_hasher.update(&asset_manifest.hash());
    let render_hash = *render_hasher.finalize().as_bytes();

    let mapper = UrlMapper::new(&project.config);
    tasks.push(page_task(
        TaskKind::RenderHome,
        "render_home",
        &[],
        mapper.map(HOME_KEY),
        render_hash,
        &[],
    ));
    tasks.push(page_task(
        TaskKind::RenderCatalog,
        "render_catalog",
        &[],
        mapper.map(CATALOG_KEY),
        render_hash,
        &[],
    ));
    tasks.push(page_task(
        TaskKind::RenderRedirect,
        "render_redirect",
        &[],
        UrlMapping {
            href: LEGACY_READER_OUTPUT.to_string(),
            primary_output: PathBuf::from(LEGACY_READER_OUTPUT),
            fallback: None,
        },
        render_hash,
        &[],
    ));

    let resolver = ManifestResolver::new(&project.edition)
        .with_placeholder_pages(project.config.reader.placeholder_pages);
    let check_images = project.config.reader.check_images;
    let mut copied = BTreeSet::new();
    for chapter in project.edition.chapter_order() {
        let manifest = resolver.resolve(&chapter);
        let chapter_key = chapter.to_string();
        let mut page_inputs = Vec::new();
        for page in manifest.pages() {
            let content_hash = images.files.get(&page.file_path);
            page_inputs.push(page.file_path.clone());
            if check_images {
                page_inputs.push(content_hash.cloned().unwrap_or_else(|| "missing".to_string()));
            }
            if let Some(content_hash) = content_hash {
                if copied.insert(page.file_path.clone()) {
                    tasks.push(copy_image_task(&chapter, &page.file_path, content_hash));
                }
            }
        }
        tasks.push(page_task(
            TaskKind::RenderChapter {
                chapter: chapter.clone(),
            },
            "render_chapter",
            &[chapter_key.as_str()],
            mapper.chapter(&chapter),
            render_hash,
            &page_inputs,
        ));
    }

    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(BuildPlan { tasks })
}

fn page_task(
    kind: TaskKind,
    kind_key: &str,
    id_parts: &[&str],
    mapping: UrlMapping,
    render_hash: [u8; 32],
    inputs: &[String],
) -> BuildTask {
    let id = TaskId::new(kind_key, id_parts);
    let mut hasher = Hasher::new();
    hasher.update(b"panelsite.task.v1");
    add_str(&mut hasher, &id.0);
    add_str(&mut hasher, kind_key);
    hasher.update(&render_hash);
    add_u64(&mut hasher, inputs.len() as u64);
    for input in inputs {
        add_str(&mut hasher, input);
    }
    let mut outputs = vec![OutputArtifact {
        path: mapping.primary_output,
    }];
    if let Some(fallback) = mapping.fallback {
        outputs.push(OutputArtifact {
            path: fallback.from,
        });
    }
    BuildTask {
        id,
        kind,
        inputs_fingerprint: InputFingerprint(*hasher.finalize().as_bytes()),
        outputs,
    }
}

fn copy_image_task(chapter: &ChapterId, rel: &str, content_hash: &str) -> BuildTask {
    let id = TaskId::new("copy_image", &[rel]);
    let mut hasher = Hasher::new();
    hasher.update(b"panelsite.task.v1");
    add_str(&mut hasher, &id.0);
    add_str(&mut hasher, "CopyImage");
    add_str(&mut hasher, content_hash);
    BuildTask {
        id,
        kind: TaskKind::CopyImage {
            chapter: chapter.clone(),
            rel: rel.to_string(),
        },
        inputs_fingerprint: InputFingerprint(*hasher.finalize().as_bytes()),
        outputs: vec![OutputArtifact {
            path: PathBuf::from(rel),
        }],
    }
}

fn hash_config(project: &Project) -> Result<[u8; 32]> {
    let encoded =
        serde_json::to_vec(&project.config).context("failed to encode site config")?;
    Ok(*blake3::hash(&encoded).as_bytes())
}

fn hash_edition(project: &Project) -> Result<[u8; 32]> {
    let encoded =
        serde_json::to_vec(&project.edition).context("failed to encode edition rules")?;
    Ok(*blake3::hash(&encoded).as_bytes())
}

fn add_str(hasher: &mut Hasher, value: &str) {
    add_u64(hasher, value.len() as u64);
    hasher.update(value.as_bytes());
}

fn add_u64(hasher: &mut Hasher, value: u64) {
    hasher.update(&value.to_le_bytes());
}
