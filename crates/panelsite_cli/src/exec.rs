use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use panelsite_cache::CacheStore;
use panelsite_core::assets::{AssetManifest, AssetSourceId};
use panelsite_core::model::{BuildPlan, BuildTask, Project, TaskKind};
use panelsite_core::render::{DeferredLoader, ImageLoader};
use panelsite_core::templates::{SiteRenderer, TemplateSet};
use panelsite_core::url::{CATALOG_KEY, HOME_KEY, LEGACY_READER_OUTPUT, UrlMapper, UrlMapping};
use tracing::{debug, info, warn};

use crate::assets::{AssetSourceLookup, copy_asset_to_out};
use crate::images::FsImageLoader;

#[derive(Debug, Default)]
pub struct ExecSummary {
    pub executed: usize,
    pub skipped: usize,
    pub executed_ids: Vec<String>,
    pub skipped_ids: Vec<String>,
    /// Pages that failed to load while rendering chapters.
    pub failed_images: usize,
    /// Chapters rendered with the placeholder manifest.
    pub placeholder_chapters: usize,
    /// Outputs of tasks that left the plan and were deleted.
    pub removed_outputs: Vec<String>,
}

pub struct ExecInputs<'a> {
    pub asset_lookup: &'a AssetSourceLookup,
    pub asset_manifest: &'a AssetManifest,
    pub templates: &'a TemplateSet,
}

pub fn execute_plan(
    project: &Project,
    plan: &BuildPlan,
    out_dir: &Path,
    inputs: &ExecInputs<'_>,
    mut cache: Option<&mut dyn CacheStore>,
    regenerate_content: bool,
) -> Result<ExecSummary> {
    let mut report = ExecSummary::default();
    let build_date_ymd = build_date_ymd_now();
    let renderer = SiteRenderer::new(
        project,
        inputs.templates,
        inputs.asset_manifest,
        build_date_ymd,
    );
    let mapper = UrlMapper::new(&project.config);
    let fs_loader = FsImageLoader::new(&project.root);
    let loader: &dyn ImageLoader = if project.config.reader.check_images {
        &fs_loader
    } else {
        &DeferredLoader
    };

    for task in &plan.tasks {
        if should_skip_task(&mut cache, task, out_dir, regenerate_content)? {
            report.skipped += output_count(task);
            report.skipped_ids.push(task.id.0.clone());
            continue;
        }
        match &task.kind {
            TaskKind::CopyAsset {
                source, out_rel, ..
            } => {
                let source = AssetSourceId(source.clone());
                copy_asset_to_out(out_dir, out_rel, &source, inputs.asset_lookup)?;
            }
            TaskKind::CopyImage { rel, .. } => {
                copy_image(&project.root, out_dir, rel)?;
            }
            TaskKind::RenderChapter { chapter } => {
                let mapping = mapper.chapter(chapter);
                let rendered = renderer
                    .render_chapter_page(chapter, &mapping.primary_output, loader)
                    .with_context(|| format!("failed to render chapter {chapter}"))?;
                if rendered.summary.failed > 0 {
                    warn!(
                        chapter = %chapter,
                        failed = rendered.summary.failed,
                        "chapter rendered with missing pages"
                    );
                }
                if rendered.summary.placeholders > 0 {
                    report.placeholder_chapters += 1;
                }
                report.failed_images += rendered.summary.failed;
                write_page(out_dir, &mapping, &rendered.html, &renderer)?;
            }
            TaskKind::RenderCatalog => {
                let html = renderer.render_catalog_page()?;
                write_page(out_dir, &mapper.map(CATALOG_KEY), &html, &renderer)?;
            }
            TaskKind::RenderHome => {
                let html = renderer.render_home_page()?;
                write_page(out_dir, &mapper.map(HOME_KEY), &html, &renderer)?;
            }
            TaskKind::RenderRedirect => {
                let html = renderer.render_redirect_page()?;
                write_output(&out_dir.join(LEGACY_READER_OUTPUT), &html)?;
            }
        }
        debug!(task = %task.id.0, "executed task");
        report.executed += output_count(task);
        report.executed_ids.push(task.id.0.clone());
        cache_put(&mut cache, task);
    }

    if let Some(cache) = cache.as_mut() {
        report.removed_outputs = prune_stale(&mut **cache, plan, out_dir);
    }
    info!(
        executed = report.executed,
        skipped = report.skipped,
        failed_images = report.failed_images,
        "build finished"
    );
    Ok(report)
}

fn write_page(
    out_dir: &Path,
    mapping: &UrlMapping,
    html: &str,
    renderer: &SiteRenderer<'_>,
) -> Result<()> {
    write_output(&out_dir.join(&mapping.primary_output), html)?;
    if let Some(fallback) = &mapping.fallback {
        let moved = renderer.render_moved_page(&fallback.from, &fallback.to_href)?;
        write_output(&out_dir.join(&fallback.from), &moved)?;
    }
    Ok(())
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn copy_image(root: &Path, out_dir: &Path, rel: &str) -> Result<()> {
    let src = root.join(rel);
    let dest = out_dir.join(rel);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::copy(&src, &dest).with_context(|| {
        format!("failed to copy {} to {}", src.display(), dest.display())
    })?;
    Ok(())
}

/// Forgets cached tasks that left the plan and deletes their outputs unless a
/// live task still writes the same path.
fn prune_stale(cache: &mut dyn CacheStore, plan: &BuildPlan, out_dir: &Path) -> Vec<String> {
    let live_ids: BTreeSet<String> = plan.tasks.iter().map(|task| task.id.0.clone()).collect();
    let live_outputs: BTreeSet<String> = plan
        .tasks
        .iter()
        .flat_map(|task| task.outputs.iter())
        .map(|output| output.path.to_string_lossy().replace('\\', "/"))
        .collect();
    let dropped = match cache.retain(&live_ids) {
        Ok(dropped) => dropped,
        Err(err) => {
            warn!(%err, "cache prune failed");
            return Vec::new();
        }
    };
    let mut removed = Vec::new();
    for output in dropped {
        if live_outputs.contains(&output) {
            continue;
        }
        let path = out_dir.join(&output);
        if path.is_file() {
            match fs::remove_file(&path) {
                Ok(()) => removed.push(output),
                Err(err) => warn!(path = %path.display(), %err, "failed to remove stale output"),
            }
        }
    }
    removed
}

fn output_count(task: &BuildTask) -> usize {
    task.outputs.len().max(1)
}

fn outputs_exist(outputs: &[String], out_dir: &Path) -> bool {
    outputs.iter().all(|output| {
        fs::metadata(out_dir.join(output))
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    })
}

fn should_skip_task(
    cache: &mut Option<&mut dyn CacheStore>,
    task: &BuildTask,
    out_dir: &Path,
    regenerate_content: bool,
) -> Result<bool> {
    if regenerate_content && !is_copy_task(&task.kind) {
        return Ok(false);
    }
    let Some(cache) = cache.as_mut() else {
        return Ok(false);
    };
    if task.outputs.is_empty() {
        return Ok(false);
    }
    match cache.get(task.id.0.as_str()) {
        Ok(Some(cached)) => Ok(cached.inputs_fingerprint == task.inputs_fingerprint.0
            && outputs_exist(&cached.outputs, out_dir)),
        Ok(None) => Ok(false),
        Err(err) => {
            warn!(task = %task.id.0, %err, "cache get failed");
            Ok(false)
        }
    }
}

fn is_copy_task(kind: &TaskKind) -> bool {
    matches!(kind, TaskKind::CopyImage { .. } | TaskKind::CopyAsset { .. })
}

fn cache_put(cache: &mut Option<&mut dyn CacheStore>, task: &BuildTask) {
    let Some(cache) = cache.as_mut() else {
        return;
    };
    if task.outputs.is_empty() {
        return;
    }
    let outputs = task
        .outputs
        .iter()
        .map(|output| output.path.to_string_lossy().replace('\\', "/"))
        .collect::<Vec<_>>();
    if let Err(err) = cache.put(task.id.0.as_str(), task.inputs_fingerprint.0, &outputs) {
        warn!(task = %task.id.0, %err, "cache put failed");
    }
}

fn build_date_ymd_now() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{discover_assets, load_templates};
    use crate::config_loader::load_project;
    use panelsite_cache::SqliteCacheStore;
    use panelsite_core::plan::{ImagePlanInput, build_plan};
    use tempfile::TempDir;

    fn site(style: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("panelsite.yaml"),
            format!(
                "site:\n  id: demo\n  title: Demo\n  base_url: https://example.com/\n  language: en\n  url_style: {style}\nrules_file: rules.yaml\nreader:\n  check_images: false\n"
            ),
        )
        .unwrap();
        fs::write(
            temp.path().join("rules.yaml"),
            "id: tiny\ntitle: Tiny\nchapters: { min: 1, max: 3 }\nspecials: [{ token: \"2.5\", after: 2 }]\nrules:\n  - { id: 1, pages: \"1-3\", skip: [2] }\n  - { id: 2.5, pages: \"1-2\", extension: png }\n",
        )
        .unwrap();
        temp
    }

    fn build(root: &Path, out: &Path, cache: Option<&mut dyn CacheStore>) -> ExecSummary {
        let project = load_project(root).expect("project");
        let (index, lookup) = discover_assets(root).expect("assets");
        let templates = load_templates(&index, &lookup).expect("templates");
        let plan = build_plan(&project, &index, &ImagePlanInput::default(), templates.hash())
            .expect("plan");
        let manifest = panelsite_core::assets::build_asset_manifest(
            &index,
            project.config.assets.cache_busting,
        );
        let inputs = ExecInputs {
            asset_lookup: &lookup,
            asset_manifest: &manifest,
            templates: &templates,
        };
        execute_plan(&project, &plan, out, &inputs, cache, false).expect("exec")
    }

    #[test]
    fn html_style_writes_flat_pages() {
        let temp = site("html");
        let out = temp.path().join("out");
        let summary = build(temp.path(), &out, None);
        for rel in [
            "index.html",
            "chapters.html",
            "chapter.html",
            "chapter/1.html",
            "chapter/2.5.html",
            "chapter/3.html",
            "artifacts/css/reader.css",
            "artifacts/js/reader.js",
        ] {
            assert!(out.join(rel).is_file(), "missing {rel}");
        }
        assert_eq!(summary.placeholder_chapters, 2);
        let chapter = fs::read_to_string(out.join("chapter/1.html")).unwrap();
        assert!(chapter.contains("chapter%201/03.jpg"));
        assert!(!chapter.contains("chapter%201/02.jpg"));
    }

    #[test]
    fn pretty_with_fallback_writes_moved_pages() {
        let temp = site("pretty_with_fallback");
        let out = temp.path().join("out");
        build(temp.path(), &out, None);
        assert!(out.join("chapter/1/index.html").is_file());
        let moved = fs::read_to_string(out.join("chapter/1.html")).unwrap();
        assert!(moved.contains("http-equiv=\"refresh\""));
        assert!(out.join("chapters/index.html").is_file());
        assert!(out.join("chapters.html").is_file());
    }

    #[test]
    fn cache_skips_everything_on_second_run() {
        let temp = site("html");
        let out = temp.path().join("out");
        let mut cache = SqliteCacheStore::open_in_memory().unwrap();
        let first = build(temp.path(), &out, Some(&mut cache));
        assert_eq!(first.skipped, 0);
        let second = build(temp.path(), &out, Some(&mut cache));
        assert_eq!(second.executed, 0);
        assert_eq!(second.skipped, first.executed);
    }

    #[test]
    fn shrinking_the_range_removes_stale_chapters() {
        let temp = site("html");
        let out = temp.path().join("out");
        let mut cache = SqliteCacheStore::open_in_memory().unwrap();
        build(temp.path(), &out, Some(&mut cache));
        assert!(out.join("chapter/3.html").is_file());
        fs::write(
            temp.path().join("rules.yaml"),
            "id: tiny\ntitle: Tiny\nchapters: { min: 1, max: 2 }\nrules:\n  - { id: 1, pages: \"1-3\", skip: [2] }\n",
        )
        .unwrap();
        let summary = build(temp.path(), &out, Some(&mut cache));
        assert!(summary.removed_outputs.contains(&"chapter/3.html".to_string()));
        assert!(!out.join("chapter/3.html").exists());
        assert!(!out.join("chapter/2.5.html").exists());
    }
}
