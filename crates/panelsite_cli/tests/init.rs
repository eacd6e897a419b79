use std::fs;
use std::path::Path;

use panelsite_cli::config_loader::load_project;
use panelsite_cli::init::{InitOptions, init_site};
use tempfile::TempDir;

fn options(root: &Path, edition: &str, copy_theme: bool) -> InitOptions {
    InitOptions {
        title: "Demo Reader".to_string(),
        base_url: "https://example.com".to_string(),
        language: "en".to_string(),
        edition: edition.to_string(),
        copy_theme,
        target_dir: root.to_path_buf(),
    }
}

#[test]
fn init_creates_a_loadable_site() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    init_site(options(root, "classic", false)).expect("init");

    assert!(root.join("panelsite.yaml").is_file());
    assert!(root.join("images").is_dir());
    assert!(root.join("assets/README.md").is_file());
    assert!(!root.join("assets/css/reader.css").exists());

    let project = load_project(root).expect("load project");
    assert_eq!(project.config.site.id, "demo-reader");
    assert_eq!(project.config.site.base_url, "https://example.com/");
    assert_eq!(project.edition.id, "classic");
    assert_eq!(project.edition.range.max, 100);
}

#[test]
fn copy_theme_writes_editable_assets() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    init_site(options(root, "archive", true)).expect("init");
    let css = fs::read_to_string(root.join("assets/css/reader.css")).expect("read css");
    assert!(!css.trim().is_empty());
    assert!(root.join("assets/js/reader.js").is_file());
    assert!(!root.join("assets/templates").exists());
}

#[test]
fn init_aborts_if_config_exists() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    fs::write(root.join("panelsite.yaml"), "site:\n  id: test\n").expect("write config");
    let err = init_site(options(root, "archive", false)).expect_err("expected error");
    assert!(err.to_string().contains("panelsite.yaml"));
}

#[test]
fn init_aborts_if_images_dir_exists() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    fs::create_dir_all(root.join("images")).expect("create images");
    let err = init_site(options(root, "archive", false)).expect_err("expected error");
    assert!(err.to_string().contains("images"));
}

#[test]
fn init_rejects_unknown_edition() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    let err = init_site(options(root, "deluxe", false)).expect_err("expected error");
    assert!(err.to_string().contains("deluxe"));
    assert!(!root.join("panelsite.yaml").exists());
}
