use std::path::Path;

use anyhow::{Context, Result, bail};
use panelsite_core::config::{CONFIG_FILE_NAME, load_site_config};
use panelsite_core::model::{Edition, EditionSource, Project, SiteConfig};
use panelsite_core::rule_table::{builtin_edition_names, load_builtin_edition, load_rule_table};
use tracing::debug;

pub fn load_config_for_build(root: &Path) -> Result<SiteConfig> {
    let config_path = root.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        bail!(
            "Missing {CONFIG_FILE_NAME} in {}. Run `panelsite_cli init --source-dir {}` to create one.",
            root.display(),
            root.display()
        );
    }
    load_site_config(&config_path)
}

pub fn load_edition(root: &Path, source: &EditionSource) -> Result<Edition> {
    let edition = match source {
        EditionSource::Builtin(name) => load_builtin_edition(name).with_context(|| {
            format!(
                "failed to load edition '{name}' (built-in editions: {})",
                builtin_edition_names().join(", ")
            )
        })?,
        EditionSource::File(path) => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            load_rule_table(&path)?
        }
    };
    debug!(
        edition = %edition.id,
        rules = edition.rules.len(),
        min = edition.range.min,
        max = edition.range.max,
        "loaded rule table"
    );
    Ok(edition)
}

/// Loads `panelsite.yaml` and the rule table it names.
pub fn load_project(root: &Path) -> Result<Project> {
    let config = load_config_for_build(root)?;
    let edition = load_edition(root, &config.edition)?;
    Ok(Project {
        root: root.to_path_buf(),
        config,
        edition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SITE: &str = "site:\n  id: demo\n  title: Demo\n  base_url: https://example.com/\n  language: en\n";

    #[test]
    fn missing_config_points_at_init() {
        let temp = TempDir::new().expect("tempdir");
        let err = load_project(temp.path()).expect_err("missing config");
        assert!(err.to_string().contains("panelsite_cli init"));
    }

    #[test]
    fn builtin_edition_is_loaded() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(temp.path().join(CONFIG_FILE_NAME), format!("{SITE}edition: archive\n"))
            .expect("write config");
        let project = load_project(temp.path()).expect("project");
        assert_eq!(project.edition.id, "archive");
        assert_eq!(project.edition.range.max, 204);
    }

    #[test]
    fn rules_file_is_resolved_against_the_site_root() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            format!("{SITE}rules_file: rules/mine.yaml\n"),
        )
        .expect("write config");
        fs::create_dir_all(temp.path().join("rules")).expect("mkdir");
        fs::write(
            temp.path().join("rules/mine.yaml"),
            "id: mine\ntitle: Mine\nchapters: { min: 1, max: 3 }\nrules:\n  - { id: 2, pages: \"1-4\" }\n",
        )
        .expect("write rules");
        let project = load_project(temp.path()).expect("project");
        assert_eq!(project.edition.id, "mine");
        assert_eq!(project.edition.rules.len(), 1);
    }

    #[test]
    fn unknown_builtin_lists_the_choices() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(temp.path().join(CONFIG_FILE_NAME), format!("{SITE}edition: nope\n"))
            .expect("write config");
        let err = load_project(temp.path()).expect_err("unknown edition");
        assert!(format!("{err:#}").contains("archive"));
    }
}
