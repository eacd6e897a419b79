use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use brotli::CompressorWriter;
use flate2::{Compression, GzBuilder};
use tracing::info;
use walkdir::WalkDir;

/// Text outputs worth compressing. Chapter images are already compressed.
const COMPRESSIBLE_EXTS: &[&str] = &["html", "css", "js", "json", "svg", "txt"];

#[derive(Debug, Clone, Copy)]
pub struct PrecompressOpts {
    pub gzip_level: u32,
    pub brotli_quality: u32,
}

impl Default for PrecompressOpts {
    fn default() -> Self {
        Self {
            gzip_level: 9,
            brotli_quality: 11,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrecompressSummary {
    pub gzip: usize,
    pub brotli: usize,
}

pub fn is_compressible_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(is_compressible_ext)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> Option<PathBuf> {
    let ext = path.extension().and_then(|ext| ext.to_str())?;
    if !is_compressible_ext(ext) {
        return None;
    }
    Some(path.with_extension(format!("{ext}.{suffix}")))
}

pub fn gzip_path_for(path: &Path) -> Option<PathBuf> {
    sibling_with_suffix(path, "gz")
}

pub fn brotli_path_for(path: &Path) -> Option<PathBuf> {
    sibling_with_suffix(path, "br")
}

/// Writes `.gz` and `.br` siblings for every compressible file in `out_dir`.
pub fn precompress_outputs(out_dir: &Path, opts: PrecompressOpts) -> Result<PrecompressSummary> {
    let mut summary = PrecompressSummary::default();
    let files: Vec<PathBuf> = WalkDir::new(out_dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_compressible_path(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    for path in files {
        let raw =
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        if let Some(gz_path) = gzip_path_for(&path) {
            let mut encoder = GzBuilder::new()
                .mtime(0)
                .write(Vec::new(), Compression::new(opts.gzip_level));
            encoder.write_all(&raw)?;
            write_compressed(&gz_path, &encoder.finish()?)?;
            summary.gzip += 1;
        }
        if let Some(br_path) = brotli_path_for(&path) {
            let mut encoder = CompressorWriter::new(Vec::new(), 4096, opts.brotli_quality, 22);
            encoder.write_all(&raw)?;
            write_compressed(&br_path, &encoder.into_inner())?;
            summary.brotli += 1;
        }
    }
    info!(gzip = summary.gzip, brotli = summary.brotli, "precompressed outputs");
    Ok(summary)
}

fn write_compressed(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn is_compressible_ext(ext: &str) -> bool {
    COMPRESSIBLE_EXTS
        .iter()
        .any(|candidate| ext.eq_ignore_ascii_case(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_text_outputs_get_siblings() {
        assert_eq!(
            gzip_path_for(Path::new("chapter/1.html")),
            Some(PathBuf::from("chapter/1.html.gz"))
        );
        assert_eq!(
            brotli_path_for(Path::new("artifacts/css/reader.css")),
            Some(PathBuf::from("artifacts/css/reader.css.br"))
        );
        assert_eq!(gzip_path_for(Path::new("images/chapter 1/01.jpg")), None);
        assert!(!is_compressible_path(Path::new("chapter.html.gz")));
    }
}
