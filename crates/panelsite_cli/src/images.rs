//! Image probing against the files on disk. Pages are never decoded in full;
//! only headers are read to learn the format and dimensions.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use image::{ImageFormat, ImageReader};
use panelsite_core::model::PageDescriptor;
use panelsite_core::render::{ImageLoader, LoadOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProbe {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

pub fn probe_image(path: &Path) -> Result<ImageProbe> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to guess format for {}", path.display()))?;
    let format = reader
        .format()
        .ok_or_else(|| anyhow!("unrecognized image format"))?;
    let (width, height) = reader
        .into_dimensions()
        .with_context(|| format!("failed to read dimensions of {}", path.display()))?;
    Ok(ImageProbe {
        format,
        width,
        height,
    })
}

/// Whether the file extension names the format found in the file header.
pub fn extension_matches(path: &Path, format: ImageFormat) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    ImageFormat::from_extension(ext) == Some(format)
}

/// Loads pages from the site tree, treating unreadable or undecodable files
/// as failures.
#[derive(Debug, Clone)]
pub struct FsImageLoader {
    root: PathBuf,
}

impl FsImageLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImageLoader for FsImageLoader {
    fn load(&self, page: &PageDescriptor) -> LoadOutcome {
        let path = self.root.join(&page.file_path);
        if !path.is_file() {
            return LoadOutcome::Failed("file not found".to_string());
        }
        match probe_image(&path) {
            Ok(probe) if probe.width == 0 || probe.height == 0 => {
                LoadOutcome::Failed("image has no pixels".to_string())
            }
            Ok(_) => LoadOutcome::Loaded,
            Err(err) => LoadOutcome::Failed(format!("{:#}", err.root_cause())),
        }
    }
}
