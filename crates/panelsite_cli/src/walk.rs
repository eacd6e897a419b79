//! Image tree walker

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use panelsite_core::plan::ImagePlanInput;
use tracing::debug;
use walkdir::WalkDir;

/// Files under `images_dir`, keyed by their site-relative path.
#[derive(Debug, Clone, Default)]
pub struct ImageTree {
    pub files: BTreeMap<String, ImageFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub content_hash: String,
    pub size: u64,
}

impl ImageTree {
    pub fn paths(&self) -> BTreeSet<String> {
        self.files.keys().cloned().collect()
    }

    pub fn plan_input(&self) -> ImagePlanInput {
        ImagePlanInput {
            files: self
                .files
                .iter()
                .map(|(rel, file)| (rel.clone(), file.content_hash.clone()))
                .collect(),
        }
    }
}

/// Walks `root/images_dir`. A missing directory yields an empty tree.
pub fn walk_images(root: &Path, images_dir: &str) -> Result<ImageTree> {
    let base = root.join(images_dir);
    let mut tree = ImageTree::default();
    if !base.is_dir() {
        debug!(dir = %base.display(), "image directory not found");
        return Ok(tree);
    }
    let entries = WalkDir::new(&base)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to walk {}", base.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let rel = to_relative_path(root, path);
        tree.files.insert(
            rel,
            ImageFile {
                content_hash: blake3::hash(&bytes).to_hex().to_string(),
                size: bytes.len() as u64,
            },
        );
    }
    debug!(count = tree.files.len(), dir = %base.display(), "discovered image files");
    Ok(tree)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

pub fn to_relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn walk_collects_relative_paths_and_hashes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write_file(&root.join("images/chapter 1/01.jpg"), b"one");
        write_file(&root.join("images/chapter 1/02.png"), b"two");
        write_file(&root.join("images/.DS_Store"), b"junk");
        write_file(&root.join("images/chapter 2/.hidden/03.jpg"), b"junk");
        write_file(&root.join("other/readme.txt"), b"not an image");

        let tree = walk_images(root, "images").expect("walk");
        let paths: Vec<&str> = tree.files.keys().map(String::as_str).collect();
        assert_eq!(paths, ["images/chapter 1/01.jpg", "images/chapter 1/02.png"]);
        let first = &tree.files["images/chapter 1/01.jpg"];
        assert_eq!(first.content_hash, blake3::hash(b"one").to_hex().to_string());
        assert_eq!(first.size, 3);
        assert_eq!(tree.plan_input().files.len(), 2);
    }

    #[test]
    fn missing_images_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let tree = walk_images(temp.path(), "images").expect("walk");
        assert!(tree.files.is_empty());
    }
}
