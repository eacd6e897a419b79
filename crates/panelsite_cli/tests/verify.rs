use std::fs;
use std::path::Path;

use image::{ImageFormat, Rgb, RgbImage};
use panelsite_cli::verify::run_verify;
use tempfile::TempDir;

fn write_site(root: &Path) {
    fs::write(
        root.join("panelsite.yaml"),
        "site:\n  id: demo\n  title: Demo\n  base_url: https://example.com/\n  language: en\nrules_file: rules.yaml\n",
    )
    .expect("write config");
    fs::write(
        root.join("rules.yaml"),
        "id: demo\ntitle: Demo\nchapters: { min: 1, max: 2 }\ndefault_extension: png\nrules:\n  - { id: 1, pages: \"1-2\" }\n",
    )
    .expect("write rules");
    write_image(&root.join("images/chapter 1/01.png"), ImageFormat::Png);
    write_image(&root.join("images/chapter 1/02.png"), ImageFormat::Png);
}

fn write_image(path: &Path, format: ImageFormat) {
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    RgbImage::from_pixel(3, 3, Rgb([10, 20, 30]))
        .save_with_format(path, format)
        .expect("write image");
}

#[test]
fn clean_site_passes_strict() {
    let temp = TempDir::new().expect("tempdir");
    write_site(temp.path());
    assert_eq!(run_verify(temp.path(), true).expect("verify"), 0);
}

#[test]
fn stale_file_is_a_warning() {
    let temp = TempDir::new().expect("tempdir");
    write_site(temp.path());
    write_image(&temp.path().join("images/chapter 1/03.png"), ImageFormat::Png);
    assert_eq!(run_verify(temp.path(), false).expect("verify"), 0);
    assert_eq!(run_verify(temp.path(), true).expect("verify"), 1);
}

#[test]
fn missing_page_fails() {
    let temp = TempDir::new().expect("tempdir");
    write_site(temp.path());
    fs::remove_file(temp.path().join("images/chapter 1/02.png")).expect("remove page");
    assert_eq!(run_verify(temp.path(), false).expect("verify"), 1);
}

#[test]
fn undecodable_page_fails() {
    let temp = TempDir::new().expect("tempdir");
    write_site(temp.path());
    fs::write(temp.path().join("images/chapter 1/02.png"), b"not an image").expect("corrupt");
    assert_eq!(run_verify(temp.path(), false).expect("verify"), 1);
}

#[test]
fn wrong_extension_is_a_warning() {
    let temp = TempDir::new().expect("tempdir");
    write_site(temp.path());
    write_image(&temp.path().join("images/chapter 1/02.png"), ImageFormat::Jpeg);
    assert_eq!(run_verify(temp.path(), false).expect("verify"), 0);
    assert_eq!(run_verify(temp.path(), true).expect("verify"), 1);
}

#[test]
fn invalid_rule_table_fails() {
    let temp = TempDir::new().expect("tempdir");
    write_site(temp.path());
    fs::write(
        temp.path().join("rules.yaml"),
        "id: demo\ntitle: Demo\nchapters: { min: 5, max: 2 }\nrules:\n  - { id: 1, pages: \"4-2\" }\n",
    )
    .expect("write rules");
    assert_eq!(run_verify(temp.path(), false).expect("verify"), 1);
}
