use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use panelsite_cache::{CacheStore, SqliteCacheStore};
use panelsite_cli::assets::{discover_assets, load_templates};
use panelsite_cli::config_loader::load_project;
use panelsite_cli::exec::{ExecInputs, execute_plan};
use panelsite_cli::init::{DEFAULT_EDITION, InitOptions, init_site};
use panelsite_cli::precompress::{PrecompressOpts, precompress_outputs};
use panelsite_cli::preview::{LiveReader, PreviewOpts, run_preview};
use panelsite_cli::verify::run_verify;
use panelsite_cli::walk::walk_images;
use panelsite_core::assets::build_asset_manifest;
use panelsite_core::catalog::{build_catalog, label_for_width};
use panelsite_core::manifest::ManifestResolver;
use panelsite_core::model::{ChapterId, ManifestEntry, TaskKind};
use panelsite_core::navigator::ChapterNavigator;
use panelsite_core::plan::build_plan;
use panelsite_core::url::{SiteHref, UrlMapper};
use tracing::{Level, warn};

#[derive(Debug, Parser)]
#[command(name = "panelsite_cli", about = "Static chapter reader generator.")]
struct Cli {
    #[arg(long = "source-dir", short = 's', global = true)]
    source_dir: Option<PathBuf>,
    /// Log debug output to stderr.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Build the reader site from panelsite.yaml.")]
    Build {
        #[arg(long, value_name = "PATH", default_value = "out")]
        out: PathBuf,
        #[arg(long)]
        no_cache: bool,
        #[arg(long, value_name = "PATH")]
        cache_path: Option<PathBuf>,
        /// Re-render every page even when the cache says it is current.
        #[arg(long)]
        regenerate: bool,
        #[arg(long)]
        precompress: bool,
        #[arg(long)]
        preview: bool,
        #[arg(long, default_value = "127.0.0.1", requires = "preview")]
        preview_host: String,
        #[arg(long, default_value_t = 8080, requires = "preview")]
        preview_port: u16,
        #[arg(long, requires = "preview")]
        preview_no_open: bool,
    },
    #[command(about = "Print the page manifest of one chapter.")]
    Resolve {
        chapter: String,
        /// Fail instead of printing placeholders for chapters without a rule.
        #[arg(long)]
        strict: bool,
    },
    #[command(about = "Show which chapter a reader query lands on.")]
    Nav {
        #[arg(long, value_name = "QUERY")]
        query: Option<String>,
    },
    #[command(about = "List chapters as the catalog page shows them.")]
    Catalog {
        /// Viewport width in pixels; narrow widths use compact labels.
        #[arg(long)]
        width: Option<u32>,
    },
    #[command(about = "List build tasks without running them.")]
    Plan,
    #[command(about = "Check config, rule table and images.")]
    Verify {
        #[arg(long)]
        strict: bool,
    },
    #[command(about = "Serve a built site.")]
    Preview {
        #[arg(long, value_name = "PATH", default_value = "out")]
        out: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long)]
        no_open: bool,
        /// Serve the static chapter.html redirect instead of rendering it.
        #[arg(long)]
        no_live: bool,
    },
    #[command(about = "Initialize a new reader site.")]
    Init {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "http://localhost:8080/")]
        url: String,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long, default_value = DEFAULT_EDITION)]
        edition: String,
        #[arg(long)]
        copy_theme: bool,
        target_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match &cli.command {
        Command::Build {
            out,
            no_cache,
            cache_path,
            regenerate,
            precompress,
            preview,
            preview_host,
            preview_port,
            preview_no_open,
        } => run_build(
            &cli,
            BuildArgs {
                out,
                no_cache: *no_cache,
                cache_path: cache_path.as_ref(),
                regenerate: *regenerate,
                precompress: *precompress,
                preview: preview.then(|| (preview_host.as_str(), *preview_port, *preview_no_open)),
            },
        ),
        Command::Resolve { chapter, strict } => run_resolve(&cli, chapter, *strict),
        Command::Nav { query } => run_nav(&cli, query.as_deref()),
        Command::Catalog { width } => run_catalog(&cli, *width),
        Command::Plan => run_plan(&cli),
        Command::Verify { strict } => {
            let code = run_verify(&root_dir(&cli)?, *strict)?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Command::Preview {
            out,
            host,
            port,
            no_open,
            no_live,
        } => run_preview_command(&cli, out, host, *port, *no_open, *no_live),
        Command::Init {
            title,
            url,
            language,
            edition,
            copy_theme,
            target_dir,
        } => run_init(title, url, language, edition, *copy_theme, target_dir.as_ref()),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct BuildArgs<'a> {
    out: &'a Path,
    no_cache: bool,
    cache_path: Option<&'a PathBuf>,
    regenerate: bool,
    precompress: bool,
    /// Host, port and no-open when `--preview` is set.
    preview: Option<(&'a str, u16, bool)>,
}

fn run_build(cli: &Cli, args: BuildArgs<'_>) -> Result<()> {
    let root = root_dir(cli)?;
    let project = load_project(&root)?;
    let (asset_index, asset_lookup) = discover_assets(&root)
        .with_context(|| format!("failed to discover assets under {}", root.display()))?;
    let templates = load_templates(&asset_index, &asset_lookup)?;
    let images = walk_images(&root, &project.config.reader.images_dir)
        .context("failed to discover images")?;
    let asset_manifest = build_asset_manifest(&asset_index, project.config.assets.cache_busting);
    let plan = build_plan(&project, &asset_index, &images.plan_input(), templates.hash())?;

    let out_dir = resolve_under(&root, args.out);
    let output_count: usize = plan.tasks.iter().map(|task| task.outputs.len()).sum();

    let (mut cache, cache_state, cache_path) =
        open_cache_store(&root, args.no_cache, args.cache_path);
    let inputs = ExecInputs {
        asset_lookup: &asset_lookup,
        asset_manifest: &asset_manifest,
        templates: &templates,
    };
    let report = execute_plan(
        &project,
        &plan,
        &out_dir,
        &inputs,
        cache.as_mut().map(|store| store as &mut dyn CacheStore),
        args.regenerate,
    )?;
    println!("edition: {}", project.edition.id);
    println!("tasks: {}", plan.tasks.len());
    println!("outputs: {}", output_count);
    println!("out: {}", out_dir.display());
    println!("executed: {}", report.executed);
    println!("skipped: {}", report.skipped);
    println!("placeholder chapters: {}", report.placeholder_chapters);
    if report.failed_images > 0 {
        println!("failed images: {}", report.failed_images);
    }
    if !report.removed_outputs.is_empty() {
        println!("removed: {}", report.removed_outputs.len());
    }
    println!("cache: {}", cache_state);
    if let Some(path) = cache_path {
        println!("cache_path: {}", path.display());
    }

    if args.precompress {
        let summary = precompress_outputs(&out_dir, PrecompressOpts::default())?;
        println!("precompressed: {} gzip, {} brotli", summary.gzip, summary.brotli);
    }

    if let Some((host, port, no_open)) = args.preview {
        run_preview(PreviewOpts {
            out_dir,
            host: host.to_string(),
            port,
            no_open,
            index: "index.html".to_string(),
            live: Some(LiveReader {
                project,
                templates,
                asset_manifest,
            }),
        })?;
    }
    Ok(())
}

fn run_resolve(cli: &Cli, chapter: &str, strict: bool) -> Result<()> {
    let root = root_dir(cli)?;
    let project = load_project(&root)?;
    let id = ChapterId::parse_token(chapter)
        .with_context(|| format!("invalid chapter id '{chapter}'"))?;
    if !project.edition.is_known(&id) {
        warn!(
            chapter = %id,
            edition = %project.edition.id,
            "chapter is outside the edition range"
        );
    }
    let resolver = ManifestResolver::new(&project.edition)
        .with_placeholder_pages(project.config.reader.placeholder_pages);
    let manifest = if strict {
        resolver.resolve_strict(&id)?
    } else {
        resolver.resolve(&id)
    };
    println!("chapter: {}", manifest.chapter);
    println!(
        "source: {}",
        if manifest.is_placeholder() { "placeholder" } else { "rule" }
    );
    println!("entries: {}", manifest.entries.len());
    for entry in &manifest.entries {
        match entry {
            ManifestEntry::Page(page) => println!("page {:>3}: {}", page.page_number, page.file_path),
            ManifestEntry::Placeholder { slot } => println!("placeholder {slot}"),
        }
    }
    Ok(())
}

fn run_nav(cli: &Cli, query: Option<&str>) -> Result<()> {
    let root = root_dir(cli)?;
    let project = load_project(&root)?;
    let navigator = ChapterNavigator::from_query(&project.edition, query);
    println!("current: {}", navigator.current_chapter_id());
    println!(
        "previous: {}",
        navigator
            .previous()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "next: {}",
        navigator
            .next()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string())
    );
    for option in navigator.build_selector() {
        let marker = if option.selected { "*" } else { " " };
        println!("{marker} {} {}", option.label, option.href);
    }
    Ok(())
}

fn run_catalog(cli: &Cli, width: Option<u32>) -> Result<()> {
    let root = root_dir(cli)?;
    let project = load_project(&root)?;
    let hrefs = SiteHref::new(UrlMapper::new(&project.config), "");
    let threshold = project.config.reader.compact_label_max_width;
    for entry in build_catalog(&project.edition, &hrefs) {
        let label = match width {
            Some(width) => label_for_width(&entry.id, width, threshold),
            None => entry.label.clone(),
        };
        let marker = if entry.has_pages { " " } else { "~" };
        println!("{marker} {label}\t{}", entry.href);
    }
    Ok(())
}

fn run_plan(cli: &Cli) -> Result<()> {
    let root = root_dir(cli)?;
    let project = load_project(&root)?;
    let (asset_index, asset_lookup) = discover_assets(&root)?;
    let templates = load_templates(&asset_index, &asset_lookup)?;
    let images = walk_images(&root, &project.config.reader.images_dir)?;
    let plan = build_plan(&project, &asset_index, &images.plan_input(), templates.hash())?;
    println!("tasks: {}", plan.tasks.len());
    for task in &plan.tasks {
        println!("task: {} {}", kind_label(&task.kind), task.id.0);
    }
    Ok(())
}

fn run_preview_command(
    cli: &Cli,
    out: &Path,
    host: &str,
    port: u16,
    no_open: bool,
    no_live: bool,
) -> Result<()> {
    let root = root_dir(cli)?;
    let live = if no_live {
        None
    } else {
        let project = load_project(&root)?;
        let (asset_index, asset_lookup) = discover_assets(&root)?;
        let templates = load_templates(&asset_index, &asset_lookup)?;
        let asset_manifest =
            build_asset_manifest(&asset_index, project.config.assets.cache_busting);
        Some(LiveReader {
            project,
            templates,
            asset_manifest,
        })
    };
    run_preview(PreviewOpts {
        out_dir: resolve_under(&root, out),
        host: host.to_string(),
        port,
        no_open,
        index: "index.html".to_string(),
        live,
    })
}

fn run_init(
    title: &str,
    url: &str,
    language: &str,
    edition: &str,
    copy_theme: bool,
    target_dir: Option<&PathBuf>,
) -> Result<()> {
    let target_dir = match target_dir {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    init_site(InitOptions {
        title: title.to_string(),
        base_url: url.to_string(),
        language: language.to_string(),
        edition: edition.to_string(),
        copy_theme,
        target_dir: target_dir.clone(),
    })?;
    println!("initialized {}", target_dir.display());
    Ok(())
}

fn root_dir(cli: &Cli) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    Ok(match &cli.source_dir {
        Some(path) => resolve_under(&cwd, path),
        None => cwd,
    })
}

fn resolve_under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn open_cache_store(
    root: &Path,
    no_cache: bool,
    cache_path_override: Option<&PathBuf>,
) -> (Option<SqliteCacheStore>, &'static str, Option<PathBuf>) {
    if no_cache {
        return (None, "off", None);
    }
    let cache_path = cache_path_override
        .map(|path| resolve_under(root, path))
        .unwrap_or_else(|| root.join(".panelsite").join("cache.sqlite"));
    if let Some(parent) = cache_path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), %err, "failed to create cache directory");
            return (None, "off", Some(cache_path));
        }
    }
    match SqliteCacheStore::open(&cache_path) {
        Ok(store) => (Some(store), "on", Some(cache_path)),
        Err(err) => {
            warn!(path = %cache_path.display(), %err, "failed to open cache");
            (None, "off", Some(cache_path))
        }
    }
}

fn kind_label(kind: &TaskKind) -> &'static str {
    match kind {
        TaskKind::RenderChapter { .. } => "RenderChapter",
        TaskKind::RenderCatalog => "RenderCatalog",
        TaskKind::RenderHome => "RenderHome",
        TaskKind::RenderRedirect => "RenderRedirect",
        TaskKind::CopyImage { .. } => "CopyImage",
        TaskKind::CopyAsset { .. } => "CopyAsset",
    }
}
