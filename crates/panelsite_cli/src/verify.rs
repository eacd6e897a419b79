use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use anyhow::Result;
use panelsite_core::config::{CONFIG_FILE_NAME, parse_site_config};
use panelsite_core::consistency::{check_consistency, chapters_with_files};
use panelsite_core::manifest::ManifestResolver;
use panelsite_core::model::{Diagnostic, DiagnosticLevel, Edition, Project, SiteConfig};
use panelsite_core::rule_table::RuleTableError;
use panelsite_core::url::{CATALOG_KEY, HOME_KEY, LEGACY_READER_OUTPUT, UrlMapper};
use serde_yaml::Value;
use tracing::debug;

use crate::config_loader::load_edition;
use crate::images::{extension_matches, probe_image};
use crate::walk::walk_images;

#[derive(Debug, Clone)]
struct Issue {
    level: DiagnosticLevel,
    source_path: Option<String>,
    message: String,
}

#[derive(Debug, Default)]
struct Report {
    issues: Vec<Issue>,
}

impl Report {
    fn add(&mut self, level: DiagnosticLevel, source_path: Option<String>, message: String) {
        debug!(level = level_label(level), path = ?source_path, %message, "diagnostic");
        self.issues.push(Issue {
            level,
            source_path,
            message,
        });
    }

    fn error(&mut self, source_path: Option<String>, message: impl Into<String>) {
        self.add(DiagnosticLevel::Error, source_path, message.into());
    }

    fn warn(&mut self, source_path: Option<String>, message: impl Into<String>) {
        self.add(DiagnosticLevel::Warning, source_path, message.into());
    }

    fn extend(&mut self, diagnostics: Vec<Diagnostic>) {
        for diagnostic in diagnostics {
            self.add(diagnostic.level, diagnostic.source_path, diagnostic.message);
        }
    }

    fn count(&self, level: DiagnosticLevel) -> usize {
        self.issues.iter().filter(|issue| issue.level == level).count()
    }

    fn grouped(&self) -> BTreeMap<String, Vec<&Issue>> {
        let mut grouped: BTreeMap<String, Vec<&Issue>> = BTreeMap::new();
        for issue in &self.issues {
            let key = issue
                .source_path
                .clone()
                .unwrap_or_else(|| "<global>".to_string());
            grouped.entry(key).or_default().push(issue);
        }
        grouped
    }
}

#[derive(Debug, Default)]
struct ChapterStats {
    chapters: usize,
    with_rules: usize,
    with_files: usize,
    pages: usize,
}

/// Checks config, rule table and image tree. Returns the process exit code.
pub fn run_verify(root: &Path, strict: bool) -> Result<i32> {
    let mut report = Report::default();
    let mut stats = None;

    if let Some(config) = verify_config(root, &mut report) {
        if let Some(edition) = verify_edition(root, &config, &mut report) {
            let project = Project {
                root: root.to_path_buf(),
                config,
                edition,
            };
            stats = Some(verify_images(&project, &mut report)?);
            verify_url_collisions(&project, &mut report);
        }
    }

    print_report(&report, stats.as_ref());

    if report.count(DiagnosticLevel::Error) > 0 {
        return Ok(1);
    }
    if strict && report.count(DiagnosticLevel::Warning) > 0 {
        return Ok(1);
    }
    Ok(0)
}

fn verify_config(root: &Path, report: &mut Report) -> Option<SiteConfig> {
    let config_path = root.join(CONFIG_FILE_NAME);
    let source = Some(CONFIG_FILE_NAME.to_string());
    let raw = match fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(err) => {
            report.error(
                source,
                format!("failed to read config {}: {err}", config_path.display()),
            );
            return None;
        }
    };
    match serde_yaml::from_str::<Value>(&raw) {
        Ok(value) => warn_unknown_config_entries(&value, report, CONFIG_FILE_NAME),
        Err(err) => {
            report.error(source, format!("failed to parse YAML: {err}"));
            return None;
        }
    }
    match parse_site_config(&raw) {
        Ok(config) => Some(config),
        Err(err) => {
            report.error(source, format!("invalid config: {err:#}"));
            None
        }
    }
}

fn verify_edition(root: &Path, config: &SiteConfig, report: &mut Report) -> Option<Edition> {
    match load_edition(root, &config.edition) {
        Ok(edition) => Some(edition),
        Err(err) => {
            match err.downcast_ref::<RuleTableError>() {
                Some(RuleTableError::Invalid { name, violations }) => {
                    for violation in violations {
                        report.error(Some(name.clone()), violation.clone());
                    }
                }
                _ => report.error(Some(CONFIG_FILE_NAME.to_string()), format!("{err:#}")),
            }
            None
        }
    }
}

fn verify_images(project: &Project, report: &mut Report) -> Result<ChapterStats> {
    let images_dir = &project.config.reader.images_dir;
    let tree = walk_images(&project.root, images_dir)?;
    let files = tree.paths();
    let edition = &project.edition;
    report.extend(check_consistency(edition, &files, images_dir));

    let resolver = ManifestResolver::new(edition);
    let mut stats = ChapterStats {
        chapters: edition.chapter_order().len(),
        with_rules: edition.rules.len(),
        with_files: chapters_with_files(edition, &files).len(),
        pages: 0,
    };
    for rule in edition.rules.values() {
        let Ok(manifest) = resolver.resolve_strict(&rule.id) else {
            continue;
        };
        for page in manifest.pages() {
            stats.pages += 1;
            if !files.contains(&page.file_path) {
                continue;
            }
            let path = project.root.join(&page.file_path);
            match probe_image(&path) {
                Ok(probe) if !extension_matches(&path, probe.format) => report.warn(
                    Some(page.file_path.clone()),
                    format!(
                        "file content is {:?} but the extension says otherwise",
                        probe.format
                    ),
                ),
                Ok(_) => {}
                Err(err) => report.error(
                    Some(page.file_path.clone()),
                    format!("not a readable image: {err:#}"),
                ),
            }
        }
    }
    Ok(stats)
}

fn verify_url_collisions(project: &Project, report: &mut Report) {
    let mapper = UrlMapper::new(&project.config);
    let mut outputs: HashMap<String, String> = HashMap::new();
    let mut record = |owner: String, output: &Path, report: &mut Report| {
        let output = output.to_string_lossy().replace('\\', "/");
        if let Some(existing) = outputs.get(&output) {
            report.error(
                Some(output.clone()),
                format!("output collision between {existing} and {owner}"),
            );
        } else {
            outputs.insert(output, owner);
        }
    };
    record("home page".to_string(), &mapper.map(HOME_KEY).primary_output, report);
    let catalog = mapper.map(CATALOG_KEY);
    record("catalog".to_string(), &catalog.primary_output, report);
    if let Some(fallback) = &catalog.fallback {
        record("catalog".to_string(), &fallback.from, report);
    }
    record(
        "legacy reader link".to_string(),
        Path::new(LEGACY_READER_OUTPUT),
        report,
    );
    for chapter in project.edition.chapter_order() {
        let owner = format!("chapter {chapter}");
        let mapping = mapper.chapter(&chapter);
        record(owner.clone(), &mapping.primary_output, report);
        if let Some(fallback) = &mapping.fallback {
            record(owner, &fallback.from, report);
        }
    }
}

const CONFIG_KEYS: &[&str] = &[
    "site",
    "edition",
    "rules_file",
    "reader",
    "assets",
    "footer",
    "nav",
];

fn warn_unknown_config_entries(value: &Value, report: &mut Report, path: &str) {
    let Some(map) = value.as_mapping() else {
        report.warn(Some(path.to_string()), "config root must be a map");
        return;
    };
    for (key, value) in map {
        let key = key.as_str().unwrap_or("<non-string>");
        if !CONFIG_KEYS.contains(&key) {
            report.warn(Some(path.to_string()), format!("unknown config entry: {key}"));
            continue;
        }
        match key {
            "site" => warn_unknown_entries(
                value,
                report,
                path,
                "site",
                &[
                    "id",
                    "title",
                    "tagline",
                    "about",
                    "copyright",
                    "base_url",
                    "language",
                    "url_style",
                ],
            ),
            "reader" => warn_unknown_entries(
                value,
                report,
                path,
                "reader",
                &[
                    "placeholder_pages",
                    "compact_label_max_width",
                    "images_dir",
                    "check_images",
                    "featured_chapters",
                ],
            ),
            "assets" => warn_unknown_entries(value, report, path, "assets", &["cache_busting"]),
            "footer" => warn_unknown_entries(value, report, path, "footer", &["show_generator"]),
            "nav" => {
                if let Some(items) = value.as_sequence() {
                    for (idx, item) in items.iter().enumerate() {
                        warn_unknown_entries(
                            item,
                            report,
                            path,
                            &format!("nav[{idx}]"),
                            &["label", "href"],
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

fn warn_unknown_entries(
    value: &Value,
    report: &mut Report,
    path: &str,
    prefix: &str,
    allowed: &[&str],
) {
    let Some(map) = value.as_mapping() else {
        return;
    };
    for key in map.keys() {
        let key = key.as_str().unwrap_or("<non-string>");
        if !allowed.contains(&key) {
            report.warn(
                Some(path.to_string()),
                format!("unknown config entry: {prefix}.{key}"),
            );
        }
    }
}

fn level_label(level: DiagnosticLevel) -> &'static str {
    match level {
        DiagnosticLevel::Hint => "hint",
        DiagnosticLevel::Warning => "warning",
        DiagnosticLevel::Error => "error",
    }
}

fn print_report(report: &Report, stats: Option<&ChapterStats>) {
    println!(
        "errors: {} warnings: {} hints: {}",
        report.count(DiagnosticLevel::Error),
        report.count(DiagnosticLevel::Warning),
        report.count(DiagnosticLevel::Hint)
    );
    if let Some(stats) = stats {
        println!(
            "chapters: {} with rules: {} with images: {} pages: {}",
            stats.chapters, stats.with_rules, stats.with_files, stats.pages
        );
    }
    println!();
    println!("Diagnostics:");
    let grouped = report.grouped();
    if grouped.is_empty() {
        println!("none");
        return;
    }
    for (path, issues) in grouped {
        println!("{path}:");
        let mut seen = BTreeSet::new();
        for issue in issues {
            if seen.insert((issue.level, issue.message.as_str())) {
                println!("  {}: {}", level_label(issue.level), issue.message);
            }
        }
    }
}
